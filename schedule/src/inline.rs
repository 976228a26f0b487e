//! Maximal inlining.

use kfuse_ir::{Fusion, NodeId, ParallelType};
use tracing::{debug, trace};

use crate::error::Result;

/// Deepest leaf position at which `producer` can be computed inside every consumer.
///
/// Positions must line up with exactly mapped consumer axes (a producer
/// broadcast lines up with anything). Reduction and vectorized axes are never
/// shared.
pub fn max_inline_position(fusion: &Fusion, producer: NodeId) -> Result<usize> {
    let leaf = fusion.node(producer)?.leaf();
    let mut limit = leaf
        .iter()
        .position(|&a| {
            let d = fusion.axis(a);
            d.is_reduction() || matches!(d.parallel, ParallelType::Vectorize | ParallelType::MisalignedVectorize)
        })
        .unwrap_or(leaf.len());

    for consumer in fusion.consumers(producer)? {
        let c_leaf = fusion.node(consumer)?.leaf();
        let shared = leaf
            .iter()
            .zip(c_leaf)
            .take(limit)
            .take_while(|&(&p, &c)| fusion.are_mapped(p, c) || fusion.axis(p).is_broadcast())
            .count();
        limit = limit.min(shared);
    }
    Ok(limit)
}

/// Inline every non-input node into its consumers as deeply as possible.
#[tracing::instrument(skip_all)]
pub fn inline_most(fusion: &mut Fusion) -> Result<()> {
    let nodes: Vec<NodeId> = fusion.nodes().collect();
    let mut inlined = 0usize;
    for node in nodes {
        if fusion.is_input(node) || fusion.consumers(node)?.is_empty() {
            continue;
        }
        let pos = max_inline_position(fusion, node)?;
        trace!(%node, pos, "compute at");
        fusion.set_compute_at(node, pos)?;
        inlined += usize::from(pos > 0);
    }
    debug!(inlined, "inlined");
    Ok(())
}
