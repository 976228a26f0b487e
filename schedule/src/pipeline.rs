//! End-to-end scheduling of one reduction kernel.

use kfuse_ir::{Fusion, NodeId};
use snafu::{OptionExt, ensure};
use tracing::{debug, info};

use crate::config::ScheduleConfig;
use crate::error::*;
use crate::multi_reduction::{MultiReduction, multi_reduction_inliner};
use crate::params::ReductionParams;
use crate::projection::{PersistentBufferInfo, project_persistent_buffers};
use crate::reduction::{canonicalize_reduction_layout, schedule_reduction_tv};

/// Nodes that anchor a scheduled reduction kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledReduction {
    /// Node every other node was scheduled like.
    pub reference: NodeId,
    /// The reduction scheduled directly.
    pub reduction: NodeId,
}

/// Schedule every node of `fusion` for a single reduction kernel.
///
/// Projects persistent buffers when requested, caches inputs and outputs,
/// schedules the first reduction and propagates its schedule to the rest of
/// the graph.
#[tracing::instrument(skip_all, fields(persistent = params.persistent_kernel, fastest_dim = params.fastest_dim))]
pub fn schedule_reduction_kernel(
    fusion: &mut Fusion,
    params: &ReductionParams,
    config: &ScheduleConfig,
    buffers: &PersistentBufferInfo,
) -> Result<ScheduledReduction> {
    let outputs = fusion.outputs().to_vec();

    let placeholders = if params.persistent_kernel && params.project_persistent_buffers && config.project_buffers {
        project_persistent_buffers(fusion, buffers)?
    } else {
        Vec::new()
    };

    let mut cached_inputs = Vec::new();
    for input in fusion.inputs().to_vec() {
        if !fusion.consumers(input)?.is_empty() {
            cached_inputs.push(fusion.cache_after(input)?);
        }
    }
    let mut cached_outputs = Vec::new();
    for output in outputs {
        if fusion.node(output)?.definition().is_some() {
            cached_outputs.push((fusion.cache_before(output)?, output));
        }
    }

    let mut reductions = Vec::new();
    for node in fusion.nodes().collect::<Vec<_>>() {
        if fusion.is_reduction_output(node)? {
            reductions.push(node);
        }
    }
    let reduction = *reductions.first().context(NoReductionSnafu)?;
    debug!(?reductions, cached_inputs = cached_inputs.len(), cached_outputs = cached_outputs.len(), "prepared");

    let has_iter_axis = canonicalize_reduction_layout(fusion, reduction)?;
    let reference = schedule_reduction_tv(fusion, params, reduction, has_iter_axis)?;

    let group = MultiReduction { reduction, reference, reductions, cached_inputs, cached_outputs, placeholders };
    multi_reduction_inliner(fusion, params, &group)?;

    if config.validate {
        validate(fusion, &group.placeholders)?;
    }
    info!(%reference, %reduction, "scheduled reduction kernel");
    Ok(ScheduledReduction { reference, reduction })
}

/// Sibling outputs carry identical tags and no placeholder survived.
pub fn validate(fusion: &Fusion, placeholders: &[NodeId]) -> Result<()> {
    for node in fusion.nodes() {
        let leaf = fusion.leaf_domains(node)?;
        for sibling in fusion.siblings(node)? {
            for (pos, (a, b)) in leaf.iter().zip(fusion.leaf_domains(sibling)?).enumerate() {
                ensure!(
                    a.parallel == b.parallel,
                    SiblingMismatchSnafu { node, sibling, pos, expected: a.parallel, found: b.parallel }
                );
            }
        }
    }
    for &node in placeholders {
        ensure!(!fusion.is_output(node), PlaceholderLeftSnafu { node });
    }
    Ok(())
}
