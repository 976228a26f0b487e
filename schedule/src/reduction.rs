//! Scheduling of a single reduction node.
//!
//! Turns the [`AxisRoles`] of a node laid out as `[broadcasts, iter*, reduce+]`
//! into the split and tagged loop nest a [`ReductionParams`] describes, then
//! materializes the partial reduction. Formats, outermost first:
//!
//! ```text
//! inner, persistent:       [grid, batch, unswitch, unroll, thread, vectorize]
//! inner, non-persistent:   [grid, remainder, unswitch, unroll, thread, vectorize]
//! outer, persistent:       [grid, batch, unroll, thread]
//! outer, non-persistent:   [grid, remainder, unroll, thread]
//! iteration:               [grid, unswitch, unroll, thread, vectorize]
//! ```

use itertools::Itertools;
use kfuse_ir::{Extent, Fusion, NodeId, ParallelType};
use snafu::{OptionExt, ensure};
use tracing::{debug, trace};

use crate::error::*;
use crate::params::ReductionParams;
use crate::rfactor::sort_and_rfactor;

/// Leaf positions of the axes a reduction schedule splits and tags.
///
/// The inner reduction is the innermost reduction axis; a 3-D schedule also
/// takes the outermost reduction axis as its outer reduction. The iteration
/// role goes to the innermost iteration axis in front of the reductions.
/// Broadcasts and any further iteration or reduction axes get no role and
/// stay serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRoles {
    pub iter: Option<usize>,
    pub outer_reduce: Option<usize>,
    pub inner_reduce: usize,
}

impl AxisRoles {
    /// Locate the roles in the current leaf domain of `node`.
    pub fn resolve(fusion: &Fusion, params: &ReductionParams, node: NodeId, has_iter_axis: bool) -> Result<Self> {
        let leaf = fusion.leaf_domains(node)?;
        let reductions = leaf.iter().positions(|d| d.is_reduction()).collect::<Vec<_>>();
        let (&first_reduce, &inner_reduce) =
            reductions.first().zip(reductions.last()).context(NotAReductionSnafu { node })?;

        let outer_reduce = if params.schedule_3d {
            ensure!(
                reductions.len() >= 2,
                InsufficientReductionAxesSnafu { node, required: 2usize, found: reductions.len() }
            );
            Some(first_reduce)
        } else {
            None
        };

        // Splits only ever insert axes behind the split position, so every
        // role must sit in front of the roles scheduled before it.
        let iter = if has_iter_axis {
            let pos = leaf[..first_reduce]
                .iter()
                .rposition(|d| d.is_iteration())
                .context(AxisRoleMismatchSnafu { node, pos: first_reduce, role: "iteration" })?;
            Some(pos)
        } else {
            None
        };

        Ok(Self { iter, outer_reduce, inner_reduce })
    }
}

/// Reorder `node` to `[broadcasts, iteration axes, reductions]`, keeping the
/// relative order inside each group. Returns whether the node has an
/// iteration axis.
pub fn canonicalize_reduction_layout(fusion: &mut Fusion, node: NodeId) -> Result<bool> {
    let leaf = fusion.leaf_domains(node)?;
    let group = |i: &usize| match &leaf[*i] {
        d if d.is_broadcast() => 0,
        d if d.is_reduction() => 2,
        _ => 1,
    };
    let perm = (0..leaf.len()).sorted_by_key(group).collect::<Vec<_>>();
    ensure!(perm.last().is_some_and(|i| leaf[*i].is_reduction()), NotAReductionSnafu { node });
    let has_iter_axis = perm.iter().any(|i| group(i) == 1);
    fusion.reorder_perm(node, &perm)?;
    Ok(has_iter_axis)
}

// ============================================================================
// Split helpers. Each returns the position of the axis still to be scheduled.
// ============================================================================

fn tag(fusion: &mut Fusion, node: NodeId, axis: usize, ptype: ParallelType) -> Result<()> {
    trace!(axis, %ptype, "tag");
    Ok(fusion.parallelize_with_siblings(node, axis as isize, ptype)?)
}

/// `[.., a, ..] -> [.., a/f, V{f}, ..]`
fn vectorize(fusion: &mut Fusion, node: NodeId, axis: usize, factor: usize) -> Result<usize> {
    fusion.split(node, axis as isize, factor, true)?;
    tag(fusion, node, axis + 1, ParallelType::Vectorize)?;
    Ok(axis)
}

/// Inner split by the runtime launch dimension of `ptype`.
fn inner_parallel(fusion: &mut Fusion, node: NodeId, axis: usize, ptype: ParallelType) -> Result<usize> {
    fusion.split(node, axis as isize, Extent::parallel_dim(ptype), true)?;
    tag(fusion, node, axis + 1, ptype)?;
    Ok(axis)
}

fn inner_parallel_static(
    fusion: &mut Fusion,
    node: NodeId,
    axis: usize,
    ptype: ParallelType,
    factor: usize,
) -> Result<usize> {
    fusion.split(node, axis as isize, factor, true)?;
    tag(fusion, node, axis + 1, ptype)?;
    Ok(axis)
}

fn inner_unswitch(fusion: &mut Fusion, node: NodeId, axis: usize) -> Result<usize> {
    fusion.split(node, axis as isize, 1, true)?;
    tag(fusion, node, axis + 1, ParallelType::Unswitch)?;
    Ok(axis)
}

fn inner_unroll(fusion: &mut Fusion, node: NodeId, axis: usize, factor: usize) -> Result<usize> {
    fusion.split(node, axis as isize, factor, true)?;
    tag(fusion, node, axis + 1, ParallelType::Unroll)?;
    Ok(axis)
}

/// Outer split by the runtime launch dimension of `ptype`.
fn outer_parallel(fusion: &mut Fusion, node: NodeId, axis: usize, ptype: ParallelType) -> Result<usize> {
    fusion.split(node, axis as isize, Extent::parallel_dim(ptype), false)?;
    tag(fusion, node, axis, ptype)?;
    Ok(axis + 1)
}

fn outer_unswitch(fusion: &mut Fusion, node: NodeId, axis: usize) -> Result<usize> {
    fusion.split(node, axis as isize, 1, false)?;
    tag(fusion, node, axis, ParallelType::Unswitch)?;
    Ok(axis + 1)
}

fn outer_unroll(fusion: &mut Fusion, node: NodeId, axis: usize, factor: usize) -> Result<usize> {
    fusion.split(node, axis as isize, factor, false)?;
    tag(fusion, node, axis, ParallelType::Unroll)?;
    Ok(axis + 1)
}

// ============================================================================
// Regimes
// ============================================================================

fn schedule_outer_grid_persistent(
    fusion: &mut Fusion,
    params: &ReductionParams,
    node: NodeId,
    axis: usize,
) -> Result<()> {
    ensure!(params.static_bdimy, DynamicBlockDimSnafu { dim: "blockDim.y" });
    let bdimy = params.lparams.bdimy().context(MissingLaunchDimSnafu { dim: "blockDim.y" })?;
    inner_parallel_static(fusion, node, axis, params.block_dim_inner_reduction, bdimy)?;
    fusion.split(node, axis as isize, params.batches_per_block_inner_reduction, true)?;
    tag(fusion, node, axis, params.grid_dim_inner_reduction)?;

    // Unswitch the whole batch when it is unrolled entirely, otherwise only
    // the unrolled part of it.
    if params.batches_per_block_inner_reduction == params.unroll_factor_inner_reduction {
        outer_unswitch(fusion, node, axis + 1)?;
    } else {
        fusion.split(node, (axis + 1) as isize, params.unroll_factor_inner_reduction, true)?;
        outer_unswitch(fusion, node, axis + 2)?;
    }
    Ok(())
}

fn schedule_inner_persistent(fusion: &mut Fusion, params: &ReductionParams, node: NodeId, axis: usize) -> Result<()> {
    if params.vectorize_inner_reduction {
        vectorize(fusion, node, axis, params.unroll_factor_inner_reduction)?;
    }
    let mut outer_i = axis;
    if params.cross_grid_inner_reduction {
        outer_i = outer_parallel(fusion, node, outer_i, params.grid_dim_inner_reduction)?;
    }

    fusion.split(node, outer_i as isize, params.batches_per_block_inner_reduction, false)?;
    outer_i += 1;

    outer_i = outer_unswitch(fusion, node, outer_i)?;

    if !params.vectorize_inner_reduction && params.unroll_factor_inner_reduction > 1 {
        outer_i = outer_unroll(fusion, node, outer_i, params.unroll_factor_inner_reduction)?;
    }

    tag(fusion, node, outer_i, params.block_dim_inner_reduction)?;
    if params.pad_inner_reduction_to_warp {
        fusion.pad_to_multiple_of_warp(node, outer_i as isize)?;
    }
    Ok(())
}

fn schedule_inner_non_persistent(
    fusion: &mut Fusion,
    params: &ReductionParams,
    node: NodeId,
    axis: usize,
) -> Result<()> {
    if params.vectorize_inner_reduction {
        vectorize(fusion, node, axis, params.unroll_factor_inner_reduction)?;
    }

    if params.cross_block_inner_reduction {
        inner_parallel(fusion, node, axis, params.block_dim_inner_reduction)?;
        if params.pad_inner_reduction_to_warp {
            fusion.pad_to_multiple_of_warp(node, (axis + 1) as isize)?;
        }
    }

    if !params.vectorize_inner_reduction && params.unroll_factor_inner_reduction > 1 {
        inner_unroll(fusion, node, axis, params.unroll_factor_inner_reduction)?;
    }

    inner_unswitch(fusion, node, axis)?;

    if params.cross_grid_inner_reduction {
        if params.split_grid_dim_inner_reduction {
            outer_parallel(fusion, node, axis, params.grid_dim_inner_reduction)?;
        } else {
            tag(fusion, node, axis, params.grid_dim_inner_reduction)?;
        }
    }
    Ok(())
}

fn schedule_outer_reduction(fusion: &mut Fusion, params: &ReductionParams, node: NodeId, axis: usize) -> Result<()> {
    if params.persistent_kernel {
        let mut outer_i = axis;
        if params.cross_grid_outer_reduction {
            outer_i = outer_parallel(fusion, node, outer_i, params.grid_dim_outer_reduction)?;
        }

        fusion.split(node, outer_i as isize, params.batches_per_block_outer_reduction, false)?;
        outer_i += 1;

        if params.unroll_factor_outer_reduction > 1 {
            outer_i = outer_unroll(fusion, node, outer_i, params.unroll_factor_outer_reduction)?;
        }

        tag(fusion, node, outer_i, params.block_dim_outer_reduction)?;
    } else {
        if params.cross_block_outer_reduction {
            inner_parallel(fusion, node, axis, params.block_dim_outer_reduction)?;
        }

        if params.unroll_factor_outer_reduction > 1 {
            inner_unroll(fusion, node, axis, params.unroll_factor_outer_reduction)?;
        }

        if params.cross_grid_outer_reduction {
            outer_parallel(fusion, node, axis, params.grid_dim_outer_reduction)?;
        }
    }
    Ok(())
}

fn schedule_iteration(fusion: &mut Fusion, params: &ReductionParams, node: NodeId, axis: usize) -> Result<()> {
    let outer_grid_persistence = params.is_outer_grid_persistence();

    if params.vectorize_iter_dom {
        vectorize(fusion, node, axis, params.unroll_factor_iter_dom)?;
    }

    if params.block_dim_iter_dom.is_thread() {
        if outer_grid_persistence {
            ensure!(params.static_bdimx, DynamicBlockDimSnafu { dim: "blockDim.x" });
            let bdimx = params.lparams.bdimx().context(MissingLaunchDimSnafu { dim: "blockDim.x" })?;
            inner_parallel_static(fusion, node, axis, params.block_dim_iter_dom, bdimx)?;
        } else {
            inner_parallel(fusion, node, axis, params.block_dim_iter_dom)?;
        }
    }

    if !params.vectorize_iter_dom && params.unroll_factor_iter_dom > 1 {
        inner_unroll(fusion, node, axis, params.unroll_factor_iter_dom)?;
    }

    // Unswitching the iteration domain is not known to pay off under outer
    // grid persistence.
    if params.unroll_factor_iter_dom > 1 && !outer_grid_persistence {
        inner_unswitch(fusion, node, axis)?;
    }

    if params.grid_dim_iter_dom.is_thread() {
        if params.split_grid_dim_iter_dom_outer {
            outer_parallel(fusion, node, axis, params.grid_dim_iter_dom)?;
        } else if params.split_grid_dim_iter_dom_inner {
            inner_parallel(fusion, node, axis, params.grid_dim_iter_dom)?;
        } else {
            tag(fusion, node, axis, params.grid_dim_iter_dom)?;
        }
    }
    Ok(())
}

/// Fatal parameter/layout combinations.
pub fn check_preconditions(
    fusion: &Fusion,
    params: &ReductionParams,
    node: NodeId,
    has_iter_axis: bool,
) -> Result<AxisRoles> {
    let roles = AxisRoles::resolve(fusion, params, node, has_iter_axis)?;
    ensure!(!(params.fastest_dim && params.vectorize_iter_dom), IterVectorizeOnInnerReductionSnafu);
    ensure!(!(!params.fastest_dim && params.vectorize_inner_reduction), ReductionVectorizeOnOuterReductionSnafu);
    ensure!(!(params.multiple_reds_per_blk && !has_iter_axis), MultipleReductionsWithoutIterAxisSnafu);
    ensure!(!(params.unroll_factor_iter_dom > 1 && !has_iter_axis), IterUnrollWithoutIterAxisSnafu);
    Ok(roles)
}

/// Schedule `node` as `params` describes and materialize its partial reduction.
///
/// Returns the rfactor producer, which becomes the propagation reference.
#[tracing::instrument(skip_all, fields(node = %node, has_iter_axis = has_iter_axis))]
pub fn schedule_reduction_tv(
    fusion: &mut Fusion,
    params: &ReductionParams,
    node: NodeId,
    has_iter_axis: bool,
) -> Result<NodeId> {
    let roles = check_preconditions(fusion, params, node, has_iter_axis)?;
    let outer_grid_persistence = params.is_outer_grid_persistence();
    debug!(%params, ?roles, "scheduling reduction");

    let inner = roles.inner_reduce;
    if outer_grid_persistence {
        schedule_outer_grid_persistent(fusion, params, node, inner)?;
    } else if params.persistent_kernel {
        schedule_inner_persistent(fusion, params, node, inner)?;
    } else {
        schedule_inner_non_persistent(fusion, params, node, inner)?;
    }

    if let Some(outer) = roles.outer_reduce {
        schedule_outer_reduction(fusion, params, node, outer)?;
    }

    if let Some(iter) = roles.iter {
        schedule_iteration(fusion, params, node, iter)?;
    }
    debug!(domain = %fusion.display_node(node), "split and tagged");

    let rf = sort_and_rfactor(fusion, node)?;

    // Vectorized accesses must be innermost; the canonical order does not
    // guarantee it once the batch split and unswitch wrap the axis.
    if outer_grid_persistence {
        let leaf = fusion.leaf_domains(rf)?;
        let pos = leaf
            .iter()
            .position(|d| d.parallel == ParallelType::Vectorize)
            .context(VectorizedAxisNotFoundSnafu { node: rf })?;
        fusion.reorder(rf, &[(pos as isize, -1)])?;
        debug!(domain = %fusion.display_node(rf), "moved vectorized axis innermost");
    }

    Ok(rf)
}
