//! Applying one reduction's schedule to every reduction of the kernel.

use std::collections::BTreeSet;

use enumset::{EnumSet, enum_set};
use kfuse_ir::{ExprKind, Fusion, MemoryType, NodeId, NodeRole, ParallelType, UNROLL_TYPES};
use snafu::ensure;
use tracing::debug;

use crate::error::*;
use crate::inline::inline_most;
use crate::params::ReductionParams;
use crate::propagate::{inputs_outputs_with_inner_dim, parallelize_all_like, propagate_transforms};

/// Nodes of one reduction kernel the inliner works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiReduction {
    /// The reduction that was scheduled directly.
    pub reduction: NodeId,
    /// Its rfactor producer, or `reduction` itself if nothing was materialized.
    pub reference: NodeId,
    /// Every reduction of the kernel, `reduction` included.
    pub reductions: Vec<NodeId>,
    /// Copies of fusion inputs.
    pub cached_inputs: Vec<NodeId>,
    /// `(cache, output)` pairs; the output copies the cache.
    pub cached_outputs: Vec<(NodeId, NodeId)>,
    /// Temporary outputs added by buffer projection.
    pub placeholders: Vec<NodeId>,
}

/// Leaf positions of `node` for `non_broadcast` positions counted without broadcasts.
pub fn add_back_broadcasts(fusion: &Fusion, node: NodeId, non_broadcast: &BTreeSet<usize>) -> Result<Vec<usize>> {
    Ok(fusion
        .leaf_domains(node)?
        .into_iter()
        .enumerate()
        .filter(|(_, d)| !d.is_broadcast())
        .enumerate()
        .filter(|(nb, _)| non_broadcast.contains(nb))
        .map(|(_, (i, _))| i)
        .collect())
}

/// Whether `node`'s grid reduction feeds a broadcast parallelized on the same
/// grid dimension, which makes it an allreduce.
pub fn is_grid_allreduce(fusion: &Fusion, node: NodeId) -> Result<bool> {
    let tv = fusion.node(node)?;
    if tv.memory != MemoryType::Local {
        return Ok(false);
    }
    let reduction_types: EnumSet<ParallelType> = fusion
        .leaf_domains(node)?
        .into_iter()
        .filter(|d| d.is_reduction() && d.parallel.is_block_dim())
        .map(|d| d.parallel)
        .collect();
    if reduction_types.is_empty() {
        return Ok(false);
    }

    for &use_ in tv.uses() {
        let expr = fusion.expr(use_);
        if !matches!(expr.kind, ExprKind::Broadcast(_)) {
            continue;
        }
        for &out in &expr.outputs {
            if fusion.leaf_domains(out)?.iter().any(|d| d.parallel.is_block_dim() && reduction_types.contains(d.parallel)) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Rfactor positions of `reference`, counted without broadcasts.
fn non_broadcast_rfactor_axes(fusion: &Fusion, reference: NodeId) -> Result<BTreeSet<usize>> {
    Ok(fusion
        .leaf_domains(reference)?
        .into_iter()
        .filter(|d| !d.is_broadcast())
        .enumerate()
        .filter(|(_, d)| d.is_reduction() && d.rfactor_product)
        .map(|(i, _)| i)
        .collect())
}

/// Propagate the reference schedule, finalize unroll/vectorize membership and inline.
#[tracing::instrument(skip_all, fields(reduction = %group.reduction, reference = %group.reference))]
pub fn multi_reduction_inliner(fusion: &mut Fusion, params: &ReductionParams, group: &MultiReduction) -> Result<()> {
    let (reduction, reference) = (group.reduction, group.reference);
    let outer_grid_persistence = params.is_outer_grid_persistence();

    // Transforms first; the other reductions are rfactored against the result.
    let reached = propagate_transforms(fusion, reference)?;
    for &node in &group.reductions {
        ensure!(reached.contains(&node), UnreachableSnafu { node, reference });
    }

    if reference != reduction {
        let rfactor_axes = non_broadcast_rfactor_axes(fusion, reference)?;
        for &node in &group.reductions {
            let grouped = matches!(fusion.definition(node)?.map(|e| &e.kind), Some(ExprKind::GroupedReduction(_)));
            if node == reduction || grouped {
                // Materialized together with the scheduled reduction.
                ensure!(fusion.node(node)?.role() == NodeRole::RFactorConsumer, MissingRFactorSnafu { node });
                continue;
            }
            let axes = add_back_broadcasts(fusion, node, &rfactor_axes)?;
            fusion.rfactor(node, &axes)?;
        }
    }

    parallelize_all_like(fusion, reference, None, None, EnumSet::all() - UNROLL_TYPES)?;

    if params.is_unrolled() {
        let vectorize = params.is_vectorized();
        let vectorizable = inputs_outputs_with_inner_dim(fusion, reference)?;
        let is_copy = |fusion: &Fusion, node: NodeId| -> Result<bool> {
            Ok(fusion.definition(node)?.is_some_and(|e| e.kind == ExprKind::Set))
        };

        let mut unrolled = Vec::new();
        for &cached in &group.cached_inputs {
            if !vectorize {
                unrolled.push(cached);
                continue;
            }
            let producers = fusion.producers(cached)?;
            if producers.len() == 1 && is_copy(fusion, cached)? && vectorizable.contains(&producers[0]) {
                unrolled.push(cached);
            }
        }
        for &(_, output) in &group.cached_outputs {
            if !vectorize || (is_copy(fusion, output)? && vectorizable.contains(&output)) {
                unrolled.push(output);
            }
        }
        debug!(?unrolled, "unrolled inputs and outputs");

        if !unrolled.is_empty() {
            parallelize_all_like(fusion, reference, None, Some(&unrolled), UNROLL_TYPES)?;
        }

        // Strip unroll tags from the reduction itself unless it was selected
        // above. Grid reductions under outer grid persistence group the
        // vectorized axis instead.
        let mut strip = vec![reference];
        if reduction != reference {
            strip.push(reduction);
        }
        for node in strip {
            if unrolled.contains(&node) {
                continue;
            }
            let tags: Vec<ParallelType> = fusion.leaf_domains(node)?.iter().map(|d| d.parallel).collect();
            for (i, ptype) in tags.into_iter().enumerate() {
                if outer_grid_persistence && group.reductions.contains(&node) && ptype == ParallelType::Vectorize {
                    fusion.parallelize_with_siblings(node, i as isize, ParallelType::Group)?;
                } else if ptype.is_unrolled() {
                    fusion.parallelize_with_siblings(node, i as isize, ParallelType::Serial)?;
                }
            }
        }
    }

    let mut allreduce = Vec::new();
    for &node in &group.reductions {
        if node != reduction && is_grid_allreduce(fusion, node)? {
            allreduce.push(node);
        }
    }
    if !allreduce.is_empty() {
        debug!(?allreduce, "grouping allreduce reductions");
        parallelize_all_like(fusion, reduction, None, Some(&allreduce), enum_set!(ParallelType::Group))?;
    }

    // Placeholders only kept propagation connected; they would constrain inlining.
    for &placeholder in &group.placeholders {
        fusion.remove_output(placeholder)?;
    }

    inline_most(fusion)
}
