//! Canonical axis ordering.
//!
//! Every axis falls into one of twelve classes; sorting a node's leaf axes by
//! class (stable, outermost first) yields the loop order the rest of the
//! scheduler relies on: grid and block iteration axes outside, serial and
//! unswitched loops in the middle, unrolled and vectorized reduction lanes
//! innermost.

use itertools::Itertools;
use kfuse_ir::{Fusion, IterDomain, NodeId, ParallelType};

use crate::error::Result;

/// Ordering class of an axis, declared outermost first so that `Ord` is the
/// placement rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
pub enum AxisClass {
    /// Iteration axis bound to a grid index.
    IterBlock,
    /// Iteration axis bound to a thread index.
    IterThread,
    IterConst,
    IterSymbolic,
    ReductionSymbolic,
    IterUnswitch,
    IterUnrolled,
    Broadcast,
    ReductionThread,
    ReductionUnswitch,
    ReductionConst,
    /// Vectorized, misaligned-vectorized or unrolled reduction lane.
    ReductionUnrolled,
}

/// Classify one axis. The first matching rule wins, starting from the innermost class.
pub fn classify(axis: &IterDomain) -> AxisClass {
    let ptype = axis.parallel;
    let reduction = axis.is_reduction();
    let is_const = axis.extent.is_const();

    if reduction && ptype.is_unrolled() {
        AxisClass::ReductionUnrolled
    } else if reduction && is_const {
        AxisClass::ReductionConst
    } else if reduction && ptype == ParallelType::Unswitch {
        AxisClass::ReductionUnswitch
    } else if reduction && ptype.is_thread() {
        AxisClass::ReductionThread
    } else if axis.is_broadcast() {
        AxisClass::Broadcast
    } else if !reduction && ptype.is_unrolled() {
        AxisClass::IterUnrolled
    } else if !reduction && ptype == ParallelType::Unswitch {
        AxisClass::IterUnswitch
    } else if reduction {
        AxisClass::ReductionSymbolic
    } else if ptype.is_block_dim() {
        AxisClass::IterBlock
    } else if ptype.is_thread_dim() {
        AxisClass::IterThread
    } else if is_const {
        AxisClass::IterConst
    } else {
        AxisClass::IterSymbolic
    }
}

/// Stable order of the given axes: `order[new] = old`.
pub fn sorted_positions<'a>(axes: impl IntoIterator<Item = &'a IterDomain>) -> Vec<usize> {
    axes.into_iter().enumerate().sorted_by_key(|(_, axis)| classify(axis)).map(|(i, _)| i).collect()
}

/// Canonical permutation of `node`'s leaf, `perm[new] = old`.
pub fn canonical_order(fusion: &Fusion, node: NodeId) -> Result<Vec<usize>> {
    Ok(sorted_positions(fusion.leaf_domains(node)?))
}
