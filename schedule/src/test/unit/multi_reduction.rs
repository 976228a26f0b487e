use std::collections::BTreeSet;

use kfuse_ir::{BinaryOp, Fusion, NodeId, NodeRole, ParallelType, ReduceOp};
use test_case::test_case;

use crate::error::ScheduleError;
use crate::multi_reduction::{MultiReduction, add_back_broadcasts, is_grid_allreduce, multi_reduction_inliner};
use crate::params::ReductionParams;
use crate::pipeline::validate;
use crate::reduction::{canonicalize_reduction_layout, schedule_reduction_tv};
use crate::test::helpers::*;

fn block_params() -> ReductionParams {
    ReductionParams {
        cross_block_inner_reduction: true,
        block_dim_inner_reduction: ParallelType::ThreadX,
        grid_dim_iter_dom: ParallelType::BlockX,
        ..Default::default()
    }
}

fn schedule(fusion: &mut Fusion, params: &ReductionParams, node: NodeId) -> NodeId {
    let has_iter_axis = canonicalize_reduction_layout(fusion, node).unwrap();
    schedule_reduction_tv(fusion, params, node, has_iter_axis).unwrap()
}

fn group(reduction: NodeId, reference: NodeId, reductions: Vec<NodeId>) -> MultiReduction {
    MultiReduction {
        reduction,
        reference,
        reductions,
        cached_inputs: Vec::new(),
        cached_outputs: Vec::new(),
        placeholders: Vec::new(),
    }
}

/// `T0 -> cache -> reduction -> cache -> T1`, the layout the kernel pipeline builds.
fn cached_reduction(shape: [usize; 2], axis: usize) -> (Fusion, NodeId, NodeId, NodeId) {
    let mut fusion = Fusion::new();
    let t0 = fusion.input(shape);
    let t1 = fusion.reduce(ReduceOp::Add, t0, &[axis]).unwrap();
    fusion.add_output(t1).unwrap();
    let c0 = fusion.cache_after(t0).unwrap();
    let c1 = fusion.cache_before(t1).unwrap();
    (fusion, c0, c1, t1)
}

#[test]
fn test_sibling_reductions_share_schedule() {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([128, 1024]);
    let t1 = fusion.reduce(ReduceOp::Add, t0, &[1]).unwrap();
    let t2 = fusion.reduce(ReduceOp::Max, t0, &[1]).unwrap();
    fusion.add_output(t1).unwrap();
    fusion.add_output(t2).unwrap();

    let rf = schedule(&mut fusion, &block_params(), t1);
    multi_reduction_inliner(&mut fusion, &block_params(), &group(t1, rf, vec![t1, t2])).unwrap();

    assert_eq!(fusion.node(t2).unwrap().role(), NodeRole::RFactorConsumer);
    let producers = fusion.producers(t2).unwrap();
    assert_eq!(producers.len(), 1);
    let rf2 = producers[0];
    assert_eq!(fusion.node(rf2).unwrap().role(), NodeRole::RFactorProducer);
    assert_eq!(tags(&fusion, rf2), tags(&fusion, rf));
    assert_eq!(tags(&fusion, t2), tags(&fusion, t1));
    assert_eq!(tags(&fusion, t1), vec![ParallelType::BlockX, ParallelType::ThreadX]);

    // Inlined down to the first reduction axis.
    assert_eq!(fusion.node(rf).unwrap().compute_at, 1);
    assert_eq!(fusion.node(rf2).unwrap().compute_at, 1);
}

#[test]
fn test_grouped_reduction() {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([128, 1024]);
    let t1 = fusion.input([128, 1024]);
    let outs = fusion.grouped_reduce(&[(ReduceOp::Add, t0), (ReduceOp::Max, t1)], &[1]).unwrap();
    for &out in &outs {
        fusion.add_output(out).unwrap();
    }

    let rf = schedule(&mut fusion, &block_params(), outs[0]);
    multi_reduction_inliner(&mut fusion, &block_params(), &group(outs[0], rf, outs.clone())).unwrap();

    assert_eq!(fusion.node(outs[1]).unwrap().role(), NodeRole::RFactorConsumer);
    assert_eq!(tags(&fusion, outs[1]), tags(&fusion, outs[0]));
    validate(&fusion, &[]).unwrap();
}

#[test]
fn test_grouped_reduction_without_rfactor() {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([128, 1024]);
    let t1 = fusion.reduce(ReduceOp::Add, t0, &[1]).unwrap();
    let grouped = fusion.grouped_reduce(&[(ReduceOp::Add, t0), (ReduceOp::Min, t0)], &[1]).unwrap();

    let rf = schedule(&mut fusion, &block_params(), t1);
    let err = multi_reduction_inliner(&mut fusion, &block_params(), &group(t1, rf, vec![t1, grouped[0]])).unwrap_err();
    assert_eq!(err, ScheduleError::MissingRFactor { node: grouped[0] });
}

#[test]
fn test_unreachable_reduction() {
    let (mut fusion, _, t1) = inner_reduction(128, 1024);
    let other = fusion.input([64, 64]);
    let t3 = fusion.reduce(ReduceOp::Add, other, &[1]).unwrap();

    let rf = schedule(&mut fusion, &block_params(), t1);
    let err = multi_reduction_inliner(&mut fusion, &block_params(), &group(t1, rf, vec![t1, t3])).unwrap_err();
    assert_eq!(err, ScheduleError::Unreachable { node: t3, reference: rf });
}

#[test]
fn test_add_back_broadcasts() {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([8, 16]);
    let t1 = fusion.broadcast(t0, &[true, false, false]).unwrap();
    let t2 = fusion.reduce(ReduceOp::Add, t1, &[1, 2]).unwrap();

    let positions = add_back_broadcasts(&fusion, t2, &BTreeSet::from([0, 1])).unwrap();
    assert_eq!(positions, vec![1, 2]);
    let positions = add_back_broadcasts(&fusion, t2, &BTreeSet::from([1])).unwrap();
    assert_eq!(positions, vec![2]);
}

#[test_case(ParallelType::BlockX, ParallelType::BlockX, true ; "same grid dimension")]
#[test_case(ParallelType::BlockX, ParallelType::BlockY, false ; "different grid dimension")]
#[test_case(ParallelType::ThreadX, ParallelType::ThreadX, false ; "block reduction")]
fn test_grid_allreduce(reduction: ParallelType, broadcast: ParallelType, expected: bool) {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([128, 1024]);
    let t1 = fusion.reduce(ReduceOp::Add, t0, &[1]).unwrap();
    let t2 = fusion.broadcast(t1, &[false, true]).unwrap();
    let t3 = fusion.binary(BinaryOp::Sub, t0, t2).unwrap();
    fusion.add_output(t3).unwrap();

    fusion.parallelize(t1, 1, reduction).unwrap();
    fusion.parallelize(t2, 1, broadcast).unwrap();
    assert_eq!(is_grid_allreduce(&fusion, t1).unwrap(), expected);
}

#[test]
fn test_grid_allreduce_requires_local_memory() {
    let mut fusion = Fusion::new();
    let t0 = fusion.input([128, 1024]);
    let t1 = fusion.reduce(ReduceOp::Add, t0, &[1]).unwrap();
    let t2 = fusion.broadcast(t1, &[false, true]).unwrap();
    fusion.add_output(t1).unwrap();
    fusion.add_output(t2).unwrap();

    fusion.parallelize(t1, 1, ParallelType::BlockX).unwrap();
    fusion.parallelize(t2, 1, ParallelType::BlockX).unwrap();
    assert!(!is_grid_allreduce(&fusion, t1).unwrap());
}

#[test]
fn test_vectorized_cache_keeps_vectorize() {
    let (mut fusion, c0, c1, t1) = cached_reduction([128, 1024], 1);
    let params = vectorized_inner_params();
    let rf = schedule(&mut fusion, &params, c1);
    let group = MultiReduction { cached_inputs: vec![c0], cached_outputs: vec![(c1, t1)], ..group(c1, rf, vec![c1]) };
    multi_reduction_inliner(&mut fusion, &params, &group).unwrap();

    // The input copy reads along the reduced axis and stays vectorized; the
    // reduction itself reads from registers.
    assert_eq!(tags(&fusion, c0).last(), Some(&ParallelType::Vectorize));
    assert!(!tags(&fusion, rf).contains(&ParallelType::Vectorize));
    assert!(!tags(&fusion, t1).contains(&ParallelType::Vectorize));
    assert_eq!(tags(&fusion, c1), vec![ParallelType::BlockX, ParallelType::ThreadY, ParallelType::ThreadX]);

    assert_eq!(fusion.node(rf).unwrap().compute_at, 2);
    assert_eq!(fusion.node(c1).unwrap().compute_at, 2);
}

#[test]
fn test_unvectorized_unroll_covers_all_caches() {
    let (mut fusion, c0, c1, t1) = cached_reduction([128, 1024], 1);
    let params = ReductionParams { unroll_factor_inner_reduction: 4, ..block_params() };
    let rf = schedule(&mut fusion, &params, c1);
    let group = MultiReduction { cached_inputs: vec![c0], cached_outputs: vec![(c1, t1)], ..group(c1, rf, vec![c1]) };
    multi_reduction_inliner(&mut fusion, &params, &group).unwrap();

    assert!(tags(&fusion, c0).contains(&ParallelType::Unroll));
    assert!(!tags(&fusion, rf).contains(&ParallelType::Unroll));
}

#[test]
fn test_outer_grid_groups_vectorized_reduction() {
    let (mut fusion, c0, c1, t1) = cached_reduction([4096, 1024], 0);
    let params = outer_grid_persistent_params(4, 4);
    let rf = schedule(&mut fusion, &params, c1);
    let group = MultiReduction { cached_inputs: vec![c0], cached_outputs: vec![(c1, t1)], ..group(c1, rf, vec![c1]) };
    multi_reduction_inliner(&mut fusion, &params, &group).unwrap();

    assert!(tags(&fusion, c1).contains(&ParallelType::Group));
    assert!(!tags(&fusion, c1).contains(&ParallelType::Vectorize));
    assert!(!tags(&fusion, rf).contains(&ParallelType::Vectorize));
    // Both ends of the kernel are contiguous along the iteration axis.
    assert_eq!(tags(&fusion, c0).last(), Some(&ParallelType::Vectorize));
    assert_eq!(tags(&fusion, t1), vec![ParallelType::BlockX, ParallelType::ThreadX, ParallelType::Vectorize]);
}
