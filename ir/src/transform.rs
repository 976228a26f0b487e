//! Loop-structure transforms on leaf domains.
//!
//! Every transform that changes a node's leaf shape is applied to the node's
//! siblings as well, so outputs of one multi-output expression keep identical
//! leaf domains.

use std::collections::BTreeSet;

use smallvec::{SmallVec, smallvec};
use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::error::*;
use crate::{AxisId, AxisOrigin, ExprId, Extent, IterDomain, IterKind, MemoryType, NodeId, NodeRole, ParallelType, Transform};

impl crate::Fusion {
    fn normalize_pos(&self, node: NodeId, pos: isize) -> Result<usize> {
        let ndims = self.ndims(node)?;
        let idx = if pos < 0 { ndims as isize + pos } else { pos };
        ensure!(idx >= 0 && (idx as usize) < ndims, AxisOutOfBoundsSnafu { node, axis: pos, ndims });
        Ok(idx as usize)
    }

    /// Create the two children of `axis`.
    fn split_axis(
        &mut self,
        node: NodeId,
        pos: usize,
        axis: AxisId,
        factor: &Extent,
        inner_split: bool,
    ) -> Result<(AxisId, AxisId)> {
        ensure!(!factor.is_zero(), ZeroSplitFactorSnafu { node, axis: pos });
        let src = self.axis(axis).clone();
        let (outer, inner) = if src.is_broadcast() {
            (Extent::Const(1), Extent::Const(1))
        } else {
            let rest = src.extent.ceil_div(factor);
            if inner_split { (rest, factor.clone()) } else { (factor.clone(), rest) }
        };
        let o = self.new_axis(src.derived(outer, AxisOrigin::SplitOuter(axis)));
        let i = self.new_axis(src.derived(inner, AxisOrigin::SplitInner(axis)));
        Ok((o, i))
    }

    /// Split leaf axis `pos` of `node` (and its siblings) by `factor`.
    ///
    /// With `inner_split` the inner child has extent `factor` and the outer one
    /// `⌈n / factor⌉`; otherwise the roles are swapped.
    pub fn split(&mut self, node: NodeId, pos: isize, factor: impl Into<Extent>, inner_split: bool) -> Result<()> {
        let pos = self.normalize_pos(node, pos)?;
        let factor = factor.into();
        for n in self.with_siblings(node)? {
            let axis = self.node(n)?.leaf[pos];
            let (o, i) = self.split_axis(n, pos, axis, &factor, inner_split)?;
            let tv = self.node_mut(n)?;
            tv.leaf.splice(pos..=pos, [o, i]);
            tv.history.push(Transform::Split { axis: pos, factor: factor.clone(), inner_split });
        }
        trace!(%node, pos, %factor, inner_split, "split");
        Ok(())
    }

    /// Move leaf axes according to `(from, to)` pairs; unnamed axes keep their relative order.
    pub fn reorder(&mut self, node: NodeId, moves: &[(isize, isize)]) -> Result<()> {
        let ndims = self.ndims(node)?;
        let mut new_to_old: Vec<Option<usize>> = vec![None; ndims];
        let mut taken = vec![false; ndims];
        for &(from, to) in moves {
            let from = self.normalize_pos(node, from)?;
            let to = self.normalize_pos(node, to)?;
            ensure!(!taken[from], InvalidReorderSnafu { node, reason: "duplicate source axis" });
            ensure!(new_to_old[to].is_none(), InvalidReorderSnafu { node, reason: "duplicate destination axis" });
            taken[from] = true;
            new_to_old[to] = Some(from);
        }

        let mut rest = (0..ndims).filter(|&i| !taken[i]);
        let perm = new_to_old
            .into_iter()
            .map(|slot| slot.or_else(|| rest.next()))
            .collect::<Option<Vec<_>>>()
            .context(InvalidReorderSnafu { node, reason: "incomplete permutation" })?;
        self.reorder_perm(node, &perm)
    }

    /// Apply `perm[new] = old` to the leaf of `node` and its siblings.
    pub fn reorder_perm(&mut self, node: NodeId, perm: &[usize]) -> Result<()> {
        let ndims = self.ndims(node)?;
        ensure!(perm.len() == ndims, InvalidReorderSnafu { node, reason: "permutation length differs from rank" });
        let mut seen = vec![false; ndims];
        for &old in perm {
            ensure!(old < ndims && !seen[old], InvalidReorderSnafu { node, reason: "not a permutation" });
            seen[old] = true;
        }
        if perm.iter().enumerate().all(|(new, &old)| new == old) {
            return Ok(());
        }
        for n in self.with_siblings(node)? {
            let tv = self.node_mut(n)?;
            tv.leaf = perm.iter().map(|&old| tv.leaf[old]).collect();
            tv.history.push(Transform::Reorder { perm: perm.to_vec() });
        }
        trace!(%node, ?perm, "reorder");
        Ok(())
    }

    /// Tag leaf axis `pos` of `node` only.
    pub fn parallelize(&mut self, node: NodeId, pos: isize, ptype: ParallelType) -> Result<()> {
        let axis = self.leaf_axis(node, pos)?;
        self.axis_mut(axis).parallel = ptype;
        Ok(())
    }

    /// Tag leaf axis `pos` of `node` and of each sibling.
    pub fn parallelize_with_siblings(&mut self, node: NodeId, pos: isize, ptype: ParallelType) -> Result<()> {
        for n in self.with_siblings(node)? {
            self.parallelize(n, pos, ptype)?;
        }
        Ok(())
    }

    /// Round the launch extent of leaf axis `pos` up to a warp multiple.
    pub fn pad_to_multiple_of_warp(&mut self, node: NodeId, pos: isize) -> Result<()> {
        for n in self.with_siblings(node)? {
            let axis = self.leaf_axis(n, pos)?;
            self.axis_mut(axis).padded_to_warp = true;
        }
        Ok(())
    }

    /// Split the reduction defining `node` in two.
    ///
    /// Leaf reduction axes at `positions` are reduced by a new producer node; the
    /// remaining reduction axes are reduced by `node` over the producer's
    /// results. Siblings of a grouped reduction get matching producers. Returns
    /// the producer standing in for `node`. An empty `positions` leaves the
    /// graph untouched and returns `node`.
    pub fn rfactor(&mut self, node: NodeId, positions: &[usize]) -> Result<NodeId> {
        let def = self.node(node)?.definition.context(NotAReductionSnafu { node })?;
        ensure!(self.expr(def).kind.is_reduction(), NotAReductionSnafu { node });

        let leaf = self.node(node)?.leaf.clone();
        for &p in positions {
            ensure!(p < leaf.len(), AxisOutOfBoundsSnafu { node, axis: p as isize, ndims: leaf.len() });
            ensure!(self.axis(leaf[p]).is_reduction(), RFactorNonReductionSnafu { node, axis: p });
        }
        if positions.is_empty() {
            return Ok(node);
        }
        let selected: BTreeSet<usize> = positions.iter().copied().collect();
        let reductions = leaf.iter().filter(|&&a| self.axis(a).is_reduction()).count();
        ensure!(selected.len() < reductions, RFactorAllReductionsSnafu { node });

        let (kind, inputs, outputs) = {
            let e = self.expr(def);
            (e.kind.clone(), e.inputs.clone(), e.outputs.clone())
        };

        let mut producers: SmallVec<[NodeId; 1]> = SmallVec::new();
        for &out in &outputs {
            let (root, leaf, history) = {
                let n = self.node(out)?;
                (n.root.clone(), n.leaf.clone(), n.history.clone())
            };
            let p_root = self.clone_axes(&root);
            let p_leaf = self.clone_axes(&leaf);
            for (i, &axis) in p_leaf.iter().enumerate() {
                let d = self.axis_mut(axis);
                if d.is_reduction() {
                    if selected.contains(&i) {
                        d.rfactor_product = true;
                    } else {
                        d.kind = IterKind::Iteration;
                    }
                }
            }

            let producer = self.new_node(p_root, MemoryType::Local);
            {
                let p = self.node_mut(producer)?;
                p.leaf = p_leaf;
                p.history = history;
                p.role = NodeRole::RFactorProducer;
            }
            let consumer = self.node_mut(out)?;
            consumer.leaf = leaf.iter().enumerate().filter(|(i, _)| !selected.contains(i)).map(|(_, &a)| a).collect();
            consumer.role = NodeRole::RFactorConsumer;
            producers.push(producer);
        }

        // The old expression now reduces the producers into the original outputs.
        for &input in &inputs {
            self.nodes[input.index()].uses.retain(|&u| u != def);
        }
        self.exprs[def.index()].inputs = producers.iter().copied().collect();
        for &p in &producers {
            self.nodes[p.index()].uses.push(def);
        }
        self.new_expr(kind, inputs, producers.clone());

        let idx = outputs.iter().position(|&o| o == node).unwrap_or(0);
        trace!(%node, producer = %producers[idx], ?positions, "rfactor");
        Ok(producers[idx])
    }

    fn clone_axes(&mut self, axes: &[AxisId]) -> Vec<AxisId> {
        axes.iter()
            .map(|&a| {
                let clone = self.new_axis(self.axis(a).cloned_from(a));
                self.axis_map.union(a, clone);
                clone
            })
            .collect()
    }

    /// Duplicate the single-output expression defining `node` over the same inputs.
    ///
    /// The copy starts unscheduled: its leaf is its root.
    pub fn recompute(&mut self, node: NodeId) -> Result<NodeId> {
        let def = self.node(node)?.definition.context(NoDefinitionSnafu { node })?;
        let (kind, inputs, outputs) = {
            let e = self.expr(def);
            (e.kind.clone(), e.inputs.clone(), e.outputs.len())
        };
        ensure!(outputs == 1, RecomputeMultiOutputSnafu { node, outputs });

        let root: Vec<AxisId> = self.node(node)?.root.clone();
        let fresh = root
            .into_iter()
            .map(|a| {
                let d = self.axis(a);
                let copy = IterDomain::new(d.extent.clone(), d.kind);
                self.new_axis(copy)
            })
            .collect();
        let memory = self.node(node)?.memory;
        let copy = self.new_node(fresh, if memory == MemoryType::Global { MemoryType::Local } else { memory });
        self.new_expr(kind, inputs, smallvec![copy]);
        trace!(%node, %copy, "recompute");
        Ok(copy)
    }

    /// Make `expr` read `new` wherever it read `old`.
    pub fn replace_input(&mut self, expr: ExprId, old: NodeId, new: NodeId) -> Result<()> {
        self.node(new)?;
        ensure!(self.expr(expr).inputs.contains(&old), NotAnInputSnafu { node: old, expr });
        for input in self.exprs[expr.index()].inputs.iter_mut() {
            if *input == old {
                *input = new;
            }
        }
        self.nodes[old.index()].uses.retain(|&u| u != expr);
        let uses = &mut self.nodes[new.index()].uses;
        if !uses.contains(&expr) {
            uses.push(expr);
        }
        Ok(())
    }

    /// Rebuild the leaf of `target` by replaying the history of `reference`.
    ///
    /// `ref_to_target[i]` names the target root position standing for the
    /// reference root position `i`. Target root axes without a counterpart keep
    /// root order and end up outermost, except broadcasts which go innermost so
    /// they never break loop alignment with producers. Transforms touching only unmapped reference
    /// axes are skipped. Replayed leaf axes are mapped to the reference leaf
    /// axes at the same position.
    pub fn replay(&mut self, target: NodeId, reference: NodeId, ref_to_target: &[Option<usize>]) -> Result<()> {
        let (ref_root, ref_leaf, history) = {
            let r = self.node(reference)?;
            (r.root.clone(), r.leaf.clone(), r.history.clone())
        };
        ensure!(ref_to_target.len() == ref_root.len(), RankMismatchSnafu {
            expected: ref_root.len(),
            found: ref_to_target.len()
        });
        let t_root = self.node(target)?.root.clone();
        for &t in ref_to_target.iter().flatten() {
            ensure!(t < t_root.len(), AxisOutOfBoundsSnafu { node: target, axis: t as isize, ndims: t_root.len() });
        }

        let (back, front): (Vec<AxisId>, Vec<AxisId>) = (0..t_root.len())
            .filter(|i| !ref_to_target.contains(&Some(*i)))
            .map(|i| t_root[i])
            .partition(|&a| self.axis(a).is_broadcast());
        let mut slots: Vec<Option<AxisId>> = ref_to_target.iter().map(|m| m.map(|t| t_root[t])).collect();
        let mut t_history = Vec::new();

        for step in &history {
            match step {
                Transform::Split { axis, factor, inner_split } => {
                    let slot = *slots.get(*axis).context(AxisOutOfBoundsSnafu {
                        node: reference,
                        axis: *axis as isize,
                        ndims: slots.len(),
                    })?;
                    match slot {
                        Some(a) => {
                            let pos = front.len() + slots[..*axis].iter().flatten().count();
                            let (o, i) = self.split_axis(target, pos, a, factor, *inner_split)?;
                            slots.splice(*axis..=*axis, [Some(o), Some(i)]);
                            t_history.push(Transform::Split { axis: pos, factor: factor.clone(), inner_split: *inner_split });
                        }
                        None => {
                            slots.splice(*axis..=*axis, [None, None]);
                        }
                    }
                }
                Transform::Reorder { perm } => {
                    ensure!(perm.len() == slots.len(), InvalidReorderSnafu {
                        node: reference,
                        reason: "history does not match leaf rank"
                    });
                    let before: Vec<AxisId> = slots.iter().flatten().copied().collect();
                    slots = perm.iter().map(|&old| slots[old]).collect();
                    let after = slots.iter().flatten();
                    let tail = front.len() + before.len();
                    let t_perm: Vec<usize> = (0..front.len())
                        .chain(after.map(|a| front.len() + before.iter().position(|b| b == a).unwrap_or(0)))
                        .chain(tail..tail + back.len())
                        .collect();
                    if t_perm.iter().enumerate().any(|(new, &old)| new != old) {
                        t_history.push(Transform::Reorder { perm: t_perm });
                    }
                }
            }
        }
        ensure!(slots.len() == ref_leaf.len(), RankMismatchSnafu { expected: ref_leaf.len(), found: slots.len() });

        for (slot, &r) in slots.iter().zip(&ref_leaf) {
            if let Some(a) = slot {
                self.axis_map.union(*a, r);
            }
        }
        let tv = self.node_mut(target)?;
        tv.leaf = front.into_iter().chain(slots.into_iter().flatten()).chain(back).collect();
        tv.history = t_history;
        tv.compute_at = 0;
        trace!(%target, %reference, "replay");
        Ok(())
    }

    /// Share the outer `pos` leaf loops of `node` with its consumers.
    pub fn set_compute_at(&mut self, node: NodeId, pos: usize) -> Result<()> {
        let ndims = self.ndims(node)?;
        ensure!(pos <= ndims, AxisOutOfBoundsSnafu { node, axis: pos as isize, ndims });
        self.node_mut(node)?.compute_at = pos;
        Ok(())
    }

    /// Leaf position of `axis` in `node`.
    pub fn leaf_position(&self, node: NodeId, axis: AxisId) -> Result<usize> {
        self.node(node)?.leaf.iter().position(|&a| a == axis).context(AxisNotFoundSnafu { node, axis })
    }

    /// Position of the first leaf axis of `node` that is exactly mapped to `axis`.
    pub fn mapped_position(&self, node: NodeId, axis: AxisId) -> Result<Option<usize>> {
        Ok(self.node(node)?.leaf.iter().position(|&a| self.are_mapped(a, axis)))
    }

    /// Whether the expression defining `node` is a reduction of any kind.
    pub fn is_reduction_output(&self, node: NodeId) -> Result<bool> {
        Ok(self.definition(node)?.is_some_and(|e| e.kind.is_reduction()))
    }
}
