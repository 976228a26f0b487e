//! Persistent-buffer projection.
//!
//! A persistent buffer stays resident until every branch reading it has
//! resolved. Branches that reach a resolution point without passing through a
//! reduction can recompute the buffer from its inputs instead, so only the
//! reduction-bound branch keeps it live.

use kfuse_ir::{BinaryOp, Fusion, NodeId};
use snafu::{OptionExt, ensure};
use tracing::debug;

use crate::error::*;

/// Output of the buffer-liveness analysis for one kernel.
///
/// `resolution_points[i]` belongs to `persistent_buffers[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentBufferInfo {
    pub persistent_buffers: Vec<NodeId>,
    pub resolution_points: Vec<Vec<NodeId>>,
    /// Buffers that may be recomputed from fusion inputs.
    pub projectable: Vec<NodeId>,
}

/// Immediate consumers of `buffer` on reduction-free paths to its resolution points.
pub fn non_reducing_uses(fusion: &Fusion, buffer: NodeId, resolution_points: &[NodeId]) -> Result<Vec<NodeId>> {
    let mut uses = Vec::new();
    for &point in resolution_points {
        'chains: for chain in fusion.dependency_chains(buffer, point)? {
            for &node in &chain {
                if fusion.has_reduction(node)? {
                    continue 'chains;
                }
            }
            // chain[0] is the buffer itself.
            if let Some(&use_) = chain.get(1)
                && !uses.contains(&use_)
            {
                uses.push(use_);
            }
        }
    }
    Ok(uses)
}

/// Recompute projectable buffers along their non-reducing branches.
///
/// Every rewired consumer gets its own clone plus a placeholder output
/// `clone + buffer` that keeps both connected for schedule propagation. The
/// placeholders are returned so the inliner can drop them again.
#[tracing::instrument(skip_all, fields(buffers = info.persistent_buffers.len()))]
pub fn project_persistent_buffers(fusion: &mut Fusion, info: &PersistentBufferInfo) -> Result<Vec<NodeId>> {
    ensure!(
        info.persistent_buffers.len() == info.resolution_points.len(),
        ResolutionPointMismatchSnafu { buffers: info.persistent_buffers.len(), points: info.resolution_points.len() }
    );

    let mut placeholders = Vec::new();
    for (&buffer, points) in info.persistent_buffers.iter().zip(&info.resolution_points) {
        if !info.projectable.contains(&buffer) {
            continue;
        }
        for use_ in non_reducing_uses(fusion, buffer, points)? {
            let def = fusion.node(use_)?.definition().context(kfuse_ir::error::NoDefinitionSnafu { node: use_ })?;
            let replica = fusion.recompute(buffer)?;
            let placeholder = fusion.binary(BinaryOp::Add, replica, buffer)?;
            fusion.add_output(placeholder)?;
            fusion.replace_input(def, buffer, replica)?;
            debug!(%buffer, %use_, %replica, %placeholder, "projected buffer");
            placeholders.push(placeholder);
        }
    }
    Ok(placeholders)
}
