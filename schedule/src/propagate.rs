//! Schedule propagation from a reference node to the rest of the fusion.
//!
//! The reference's root positions are carried across producer, consumer and
//! sibling edges; every node is reached along the path that preserves the
//! most of them (a maximum spanning tree keyed by mapped root positions) and
//! then replays the reference's transform history through that mapping.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use enumset::EnumSet;
use kfuse_ir::{AxisId, Fusion, NodeId, NodeRole, ParallelType};
use tracing::{debug, trace};

use crate::error::Result;

/// For each root position of the reference, the matching root position of a node.
pub type RootInfo = Vec<Option<usize>>;

fn mapped_count(info: &RootInfo) -> usize {
    info.iter().filter(|p| p.is_some()).count()
}

/// Carry `info` from `from` to `to` through `pairs` of `(from position, to position)`.
///
/// A position only survives when both sides agree on being a broadcast.
fn carry(fusion: &Fusion, from: NodeId, to: NodeId, info: &RootInfo, pairs: &[(usize, usize)]) -> Result<RootInfo> {
    let from_root = fusion.node(from)?.root();
    let to_root = fusion.node(to)?.root();
    Ok(info
        .iter()
        .map(|pos| {
            let pos = (*pos)?;
            let &(_, dst) = pairs.iter().find(|(src, _)| *src == pos)?;
            let same_kind = fusion.axis(from_root[pos]).is_broadcast() == fusion.axis(to_root[dst]).is_broadcast();
            same_kind.then_some(dst)
        })
        .collect())
}

/// Neighbors of `node` with the information each edge would carry.
fn neighbors(fusion: &Fusion, node: NodeId, info: &RootInfo) -> Result<Vec<(NodeId, RootInfo)>> {
    let mut out = Vec::new();
    for sibling in fusion.siblings(node)? {
        out.push((sibling, info.clone()));
    }
    for producer in fusion.producers(node)? {
        let pairs: Vec<(usize, usize)> = fusion.root_map(producer, node)?.into_iter().map(|(p, c)| (c, p)).collect();
        out.push((producer, carry(fusion, node, producer, info, &pairs)?));
    }
    for consumer in fusion.consumers(node)? {
        let pairs = fusion.root_map(node, consumer)?;
        out.push((consumer, carry(fusion, node, consumer, info, &pairs)?));
    }
    Ok(out)
}

/// Maximum-information traversal from `reference`; returns each reached node
/// with its root mapping, in visiting order.
pub fn spanning_tree(fusion: &Fusion, reference: NodeId) -> Result<Vec<(NodeId, RootInfo)>> {
    let root_len = fusion.node(reference)?.root().len();
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut seq = 0usize;
    let mut heap = BinaryHeap::new();
    heap.push((root_len, Reverse(seq), reference, (0..root_len).map(Some).collect::<RootInfo>()));

    while let Some((score, _, node, info)) = heap.pop() {
        if !visited.insert(node) {
            continue;
        }
        trace!(%node, score, "visit");
        for (next, next_info) in neighbors(fusion, node, &info)? {
            if visited.contains(&next) {
                continue;
            }
            seq += 1;
            heap.push((mapped_count(&next_info), Reverse(seq), next, next_info));
        }
        order.push((node, info));
    }
    Ok(order)
}

/// Replay the reference's splits and reorders onto every connected node.
///
/// Root axes are exactly mapped along the way. Nodes whose leaf came out of
/// an rfactor keep it.
#[tracing::instrument(skip_all, fields(reference = %reference))]
pub fn propagate_transforms(fusion: &mut Fusion, reference: NodeId) -> Result<Vec<NodeId>> {
    let tree = spanning_tree(fusion, reference)?;
    let ref_root = fusion.node(reference)?.root().to_vec();
    let mut reached = Vec::with_capacity(tree.len());

    for (node, info) in tree {
        let root = fusion.node(node)?.root().to_vec();
        for (i, pos) in info.iter().enumerate() {
            if let Some(pos) = pos {
                fusion.map_axes(ref_root[i], root[*pos]);
            }
        }
        reached.push(node);
        if node == reference || fusion.node(node)?.role() != NodeRole::Plain {
            continue;
        }
        fusion.replay(node, reference, &info)?;
        trace!(domain = %fusion.display_node(node), "replayed");
    }
    debug!(nodes = reached.len(), "propagated transforms");
    Ok(reached)
}

/// Copy parallel tags in `types` from `reference` onto exactly mapped axes.
///
/// Only the first `pos` reference axes are considered (all of them when `pos`
/// is `None`). `selected` restricts the targets; `None` means every node.
pub fn parallelize_all_like(
    fusion: &mut Fusion,
    reference: NodeId,
    pos: Option<usize>,
    selected: Option<&[NodeId]>,
    types: EnumSet<ParallelType>,
) -> Result<()> {
    let ref_leaf = fusion.node(reference)?.leaf().to_vec();
    let ref_leaf = &ref_leaf[..pos.unwrap_or(ref_leaf.len()).min(ref_leaf.len())];
    let targets: Vec<NodeId> = match selected {
        Some(nodes) => nodes.to_vec(),
        None => fusion.nodes().collect(),
    };

    for node in targets {
        let leaf = fusion.node(node)?.leaf().to_vec();
        for axis in leaf {
            let Some(&r) = ref_leaf.iter().find(|&&r| fusion.are_mapped(r, axis)) else {
                continue;
            };
            let source = fusion.axis(r);
            if !types.contains(source.parallel) {
                continue;
            }
            let (ptype, padded) = (source.parallel, source.padded_to_warp);
            let target = fusion.axis_mut(axis);
            target.parallel = ptype;
            target.padded_to_warp = padded;
        }
    }
    Ok(())
}

/// Fusion inputs and outputs whose innermost logical axis is the reference's
/// innermost logical axis.
pub fn inputs_outputs_with_inner_dim(fusion: &Fusion, reference: NodeId) -> Result<Vec<NodeId>> {
    let Some(inner) = innermost_root(fusion, reference)? else {
        return Ok(Vec::new());
    };
    let mut found = Vec::new();
    for &node in fusion.inputs().iter().chain(fusion.outputs()) {
        if found.contains(&node) {
            continue;
        }
        if let Some(axis) = innermost_root(fusion, node)?
            && fusion.are_mapped(axis, inner)
        {
            found.push(node);
        }
    }
    Ok(found)
}

fn innermost_root(fusion: &Fusion, node: NodeId) -> Result<Option<AxisId>> {
    Ok(fusion.node(node)?.root().iter().rev().copied().find(|&a| !fusion.axis(a).is_broadcast()))
}
