//! Strategies for axes and reduction parameters.

use kfuse_ir::{Extent, IterDomain, IterKind, ParallelType};
use proptest::prelude::*;
use strum::IntoEnumIterator;

use crate::params::{LaunchParams, ReductionParams};
use crate::test::helpers::outer_grid_persistent_params;

pub fn arb_parallel_type() -> impl Strategy<Value = ParallelType> {
    prop::sample::select(ParallelType::iter().collect::<Vec<_>>())
}

pub fn arb_extent() -> impl Strategy<Value = Extent> {
    prop_oneof![
        3 => (1usize..=1024).prop_map(Extent::from),
        1 => Just(Extent::symbol("n")),
    ]
}

pub fn arb_axis() -> impl Strategy<Value = IterDomain> {
    let kind = prop_oneof![Just(IterKind::Iteration), Just(IterKind::Reduction), Just(IterKind::Broadcast)];
    (kind, arb_extent(), arb_parallel_type()).prop_map(|(kind, extent, parallel)| {
        let mut axis = match kind {
            IterKind::Broadcast => IterDomain::broadcast(),
            kind => IterDomain::new(extent, kind),
        };
        axis.parallel = parallel;
        axis
    })
}

/// Valid parameters for a 2-D reduction over the contiguous axis.
pub fn arb_inner_params() -> impl Strategy<Value = ReductionParams> {
    let reduction = (
        any::<bool>(),
        any::<bool>(),
        prop::sample::select(vec![1usize, 2, 4]),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        1usize..=8,
    );
    let iteration = (
        prop::sample::select(vec![ParallelType::Serial, ParallelType::ThreadY]),
        prop::sample::select(vec![ParallelType::Serial, ParallelType::BlockX, ParallelType::BlockY]),
        prop::sample::select(vec![1usize, 2]),
        any::<bool>(),
    );
    (reduction, iteration).prop_map(
        |((persistent, vectorize, unroll, cross_block, cross_grid, split_grid, batches), (block_iter, grid_iter, unroll_iter, split_iter))| {
            ReductionParams {
                fastest_dim: true,
                persistent_kernel: persistent,
                vectorize_inner_reduction: vectorize,
                unroll_factor_inner_reduction: unroll,
                cross_block_inner_reduction: cross_block || persistent,
                cross_grid_inner_reduction: cross_grid,
                split_grid_dim_inner_reduction: split_grid,
                batches_per_block_inner_reduction: batches,
                block_dim_inner_reduction: ParallelType::ThreadX,
                grid_dim_inner_reduction: ParallelType::BlockZ,
                block_dim_iter_dom: block_iter,
                grid_dim_iter_dom: grid_iter,
                unroll_factor_iter_dom: unroll_iter,
                split_grid_dim_iter_dom_outer: split_iter,
                ..Default::default()
            }
        },
    )
}

/// Valid parameters for a 3-D `[iter, outer_reduce, inner_reduce]` reduction.
pub fn arb_3d_params() -> impl Strategy<Value = ReductionParams> {
    let outer = (
        any::<bool>(),
        any::<bool>(),
        prop::sample::select(vec![1usize, 2, 4]),
        1usize..=4,
        prop::sample::select(vec![ParallelType::Serial, ParallelType::ThreadZ]),
    );
    (arb_inner_params(), outer).prop_map(|(inner, (cross_block, cross_grid, unroll, batches, block_iter))| {
        ReductionParams {
            schedule_3d: true,
            cross_block_outer_reduction: cross_block || inner.persistent_kernel,
            cross_grid_outer_reduction: cross_grid,
            unroll_factor_outer_reduction: unroll,
            batches_per_block_outer_reduction: batches,
            block_dim_outer_reduction: ParallelType::ThreadY,
            grid_dim_outer_reduction: ParallelType::BlockY,
            block_dim_iter_dom: block_iter,
            grid_dim_iter_dom: ParallelType::BlockX,
            ..inner
        }
    })
}

/// Outer-grid persistent parameters with static launch dimensions.
pub fn arb_outer_grid_params() -> impl Strategy<Value = ReductionParams> {
    (
        prop::sample::select(vec![1usize, 2, 4, 8]),
        prop::sample::select(vec![1usize, 2, 4, 8]),
        prop::sample::select(vec![8usize, 16, 32]),
        prop::sample::select(vec![2usize, 4, 8]),
        prop::sample::select(vec![2usize, 4]),
    )
        .prop_map(|(batches, unroll, bdimx, bdimy, unroll_iter)| {
            let params = outer_grid_persistent_params(batches, unroll.min(batches));
            ReductionParams {
                unroll_factor_iter_dom: unroll_iter,
                lparams: LaunchParams { bdimx: Some(bdimx), bdimy: Some(bdimy), ..params.lparams },
                ..params
            }
        })
}
