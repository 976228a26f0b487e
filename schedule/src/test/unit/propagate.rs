use enumset::EnumSet;
use kfuse_ir::{BinaryOp, Fusion, ParallelType, ReduceOp, UNROLL_TYPES, UnaryOp};

use crate::propagate::{inputs_outputs_with_inner_dim, parallelize_all_like, propagate_transforms, spanning_tree};
use crate::test::helpers::*;

fn extents(fusion: &Fusion, node: kfuse_ir::NodeId) -> Vec<String> {
    fusion.leaf_domains(node).unwrap().into_iter().map(|d| d.extent.to_string()).collect()
}

/// `T3 = T0 - broadcast(sum(T0, 1))`
fn normalization() -> (Fusion, [kfuse_ir::NodeId; 4]) {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([128, 1024]);
    let t1 = fusion.reduce(ReduceOp::Add, t0, &[1]).unwrap();
    let t2 = fusion.broadcast(t1, &[false, true]).unwrap();
    let t3 = fusion.binary(BinaryOp::Sub, t0, t2).unwrap();
    fusion.add_output(t3).unwrap();
    (fusion, [t0, t1, t2, t3])
}

#[test]
fn test_spanning_tree_prefers_full_mappings() {
    let (fusion, [t0, t1, t2, t3]) = normalization();
    let tree = spanning_tree(&fusion, t1).unwrap();
    let order: Vec<_> = tree.iter().map(|(n, _)| *n).collect();

    // The broadcast only carries the iteration axis, so it is reached last
    // even though it is adjacent to the reference.
    assert_eq!(order, vec![t1, t0, t3, t2]);
    assert_eq!(tree[0].1, vec![Some(0), Some(1)]);
    assert_eq!(tree[2].1, vec![Some(0), Some(1)]);
    assert_eq!(tree[3].1, vec![Some(0), None]);
}

#[test]
fn test_propagate_replays_splits() {
    let (mut fusion, [t0, t1, t2, t3]) = normalization();
    fusion.split(t1, 1, 4, true).unwrap();
    fusion.reorder(t1, &[(2, 0)]).unwrap();

    let reached = propagate_transforms(&mut fusion, t1).unwrap();
    assert_eq!(reached.len(), 4);

    assert_eq!(extents(&fusion, t1), vec!["4", "128", "256"]);
    assert_eq!(extents(&fusion, t0), vec!["4", "128", "256"]);
    assert_eq!(extents(&fusion, t3), vec!["4", "128", "256"]);
    for node in [t0, t3] {
        for (&a, &b) in fusion.node(node).unwrap().leaf().iter().zip(fusion.node(t1).unwrap().leaf()) {
            assert!(fusion.are_mapped(a, b));
        }
    }

    // The broadcast axis has no counterpart and goes innermost.
    let t2_leaf = fusion.leaf_domains(t2).unwrap();
    assert_eq!(t2_leaf.len(), 2);
    assert!(t2_leaf[1].is_broadcast());
    assert!(fusion.are_mapped(fusion.node(t2).unwrap().leaf()[0], fusion.node(t1).unwrap().leaf()[1]));
}

#[test]
fn test_propagate_keeps_rfactor_leaf() {
    let (mut fusion, t0, t1) = inner_reduction(128, 1024);
    fusion.split(t1, 1, 32, true).unwrap();
    fusion.parallelize(t1, 2, ParallelType::ThreadX).unwrap();
    let rf = fusion.rfactor(t1, &[1]).unwrap();

    propagate_transforms(&mut fusion, rf).unwrap();
    assert_eq!(fusion.ndims(t1).unwrap(), 2);
    assert_eq!(fusion.ndims(rf).unwrap(), 3);
    assert_eq!(extents(&fusion, t0), vec!["128", "32", "32"]);
}

#[test]
fn test_parallelize_all_like() {
    let (mut fusion, t0, t1) = inner_reduction(128, 1024);
    let t2 = fusion.unary(UnaryOp::Exp, t1).unwrap();
    fusion.split(t1, 1, 4, true).unwrap();
    fusion.parallelize(t1, 0, ParallelType::BlockX).unwrap();
    fusion.parallelize(t1, 1, ParallelType::ThreadX).unwrap();
    fusion.parallelize(t1, 2, ParallelType::Vectorize).unwrap();
    propagate_transforms(&mut fusion, t1).unwrap();

    parallelize_all_like(&mut fusion, t1, None, None, EnumSet::all() - UNROLL_TYPES).unwrap();
    assert_eq!(tags(&fusion, t0), vec![ParallelType::BlockX, ParallelType::ThreadX, ParallelType::Serial]);
    assert_eq!(tags(&fusion, t2), vec![ParallelType::BlockX]);

    parallelize_all_like(&mut fusion, t1, None, Some(&[t0]), UNROLL_TYPES).unwrap();
    assert_eq!(tags(&fusion, t0), vec![ParallelType::BlockX, ParallelType::ThreadX, ParallelType::Vectorize]);
}

#[test]
fn test_parallelize_all_like_position_limit() {
    let (mut fusion, t0, t1) = inner_reduction(128, 1024);
    fusion.parallelize(t1, 0, ParallelType::BlockX).unwrap();
    fusion.parallelize(t1, 1, ParallelType::ThreadX).unwrap();
    fusion.pad_to_multiple_of_warp(t1, 1).unwrap();
    propagate_transforms(&mut fusion, t1).unwrap();

    parallelize_all_like(&mut fusion, t1, Some(1), None, EnumSet::all()).unwrap();
    assert_eq!(tags(&fusion, t0), vec![ParallelType::BlockX, ParallelType::Serial]);

    parallelize_all_like(&mut fusion, t1, None, None, EnumSet::all()).unwrap();
    assert!(fusion.leaf_domains(t0).unwrap()[1].padded_to_warp);
}

#[test]
fn test_inner_dim_inner_reduction() {
    let (mut fusion, t0, t1) = inner_reduction(128, 1024);
    let t2 = fusion.unary(UnaryOp::Neg, t1).unwrap();
    fusion.add_output(t2).unwrap();
    propagate_transforms(&mut fusion, t1).unwrap();

    // The output's innermost axis is the iteration axis, not the reduced one.
    assert_eq!(inputs_outputs_with_inner_dim(&fusion, t1).unwrap(), vec![t0]);
}

#[test]
fn test_inner_dim_outer_reduction() {
    let (mut fusion, t0, t1) = outer_reduction(1024, 128);
    let t2 = fusion.unary(UnaryOp::Neg, t1).unwrap();
    fusion.add_output(t2).unwrap();
    propagate_transforms(&mut fusion, t1).unwrap();

    assert_eq!(inputs_outputs_with_inner_dim(&fusion, t1).unwrap(), vec![t0, t2]);
}
