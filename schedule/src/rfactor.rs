//! Partial-reduction materialization.

use kfuse_ir::{Fusion, NodeId, ParallelType};
use tracing::{debug, trace};

use crate::error::*;
use crate::ordering::canonical_order;

/// Reorder `node` canonically and rfactor its non-thread reduction axes.
///
/// Thread-bound reduction axes stay in `node`: the hardware collective
/// combines them. When every reduction axis is a candidate, an extent-one
/// unswitch marker is left behind so the node keeps a reduction of its own.
/// Returns the partial-reduction producer, or `node` itself when nothing is
/// left to materialize.
#[tracing::instrument(skip_all, fields(node = %node))]
pub fn sort_and_rfactor(fusion: &mut Fusion, node: NodeId) -> Result<NodeId> {
    let perm = canonical_order(fusion, node)?;
    let mut placed = vec![false; fusion.ndims(node)?];
    for &old in &perm {
        if let Some(slot) = placed.get_mut(old) {
            *slot = true;
        }
    }
    if let Some(axis) = placed.iter().position(|p| !p) {
        return AxisNotInOrderingSnafu { node, axis }.fail();
    }
    fusion.reorder_perm(node, &perm)?;

    let mut reduction_dims = 0;
    let mut rfactor_axes = Vec::new();
    let mut rfactor_axes_no_unswitch = Vec::new();
    for (i, axis) in fusion.leaf_domains(node)?.into_iter().enumerate() {
        if !axis.is_reduction() {
            continue;
        }
        reduction_dims += 1;
        if axis.parallel.is_thread() {
            continue;
        }
        if !(axis.parallel == ParallelType::Unswitch && axis.extent.is_one()) {
            rfactor_axes_no_unswitch.push(i);
        }
        rfactor_axes.push(i);
    }

    let axes = if reduction_dims == rfactor_axes.len() { rfactor_axes_no_unswitch } else { rfactor_axes };
    trace!(?axes, reduction_dims, "selected rfactor axes");
    let rf = fusion.rfactor(node, &axes)?;
    debug!(domain = %fusion.display_node(rf), "materialized partial reduction");
    Ok(rf)
}
