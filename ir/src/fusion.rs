//! The graph arena.
//!
//! A [`Fusion`] owns every node, axis and expression of one kernel. Handles are
//! plain indices and stay valid for the lifetime of the fusion; removed nodes
//! and expressions are tombstoned rather than reused.

use smallvec::{SmallVec, smallvec};
use snafu::{OptionExt, ensure};

use crate::axis_map::AxisMap;
use crate::error::*;
use crate::{
    AxisId, AxisOrigin, BinaryOp, ExprId, Extent, IterDomain, IterKind, MemoryType, NodeId, NodeRole, ReduceOp,
    Transform, UnaryOp,
};

/// A tensor-shaped value and its loop structure.
#[derive(Debug, Clone)]
pub struct TensorNode {
    pub(crate) root: Vec<AxisId>,
    pub(crate) leaf: Vec<AxisId>,
    pub(crate) history: Vec<Transform>,
    pub(crate) definition: Option<ExprId>,
    pub(crate) uses: Vec<ExprId>,
    pub(crate) role: NodeRole,
    pub(crate) live: bool,
    pub memory: MemoryType,
    /// Number of outer leaf axes shared with consumers' loops.
    pub compute_at: usize,
}

impl TensorNode {
    fn new(root: Vec<AxisId>, memory: MemoryType) -> Self {
        Self {
            leaf: root.clone(),
            root,
            history: Vec::new(),
            definition: None,
            uses: Vec::new(),
            role: NodeRole::Plain,
            live: true,
            memory,
            compute_at: 0,
        }
    }

    /// Logical axes, before any split or reorder.
    pub fn root(&self) -> &[AxisId] {
        &self.root
    }

    /// Scheduled axes, outermost first.
    pub fn leaf(&self) -> &[AxisId] {
        &self.leaf
    }

    pub fn history(&self) -> &[Transform] {
        &self.history
    }

    pub fn definition(&self) -> Option<ExprId> {
        self.definition
    }

    pub fn uses(&self) -> &[ExprId] {
        &self.uses
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn ndims(&self) -> usize {
        self.leaf.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// Pure copy.
    Set,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduction(ReduceOp),
    /// Several reductions sharing one loop nest; `inputs[i]` feeds `outputs[i]`.
    GroupedReduction(SmallVec<[ReduceOp; 2]>),
    /// `true` marks an inserted broadcast axis in the output.
    Broadcast(Vec<bool>),
}

impl ExprKind {
    pub fn is_reduction(&self) -> bool {
        matches!(self, Self::Reduction(_) | Self::GroupedReduction(_))
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub inputs: SmallVec<[NodeId; 2]>,
    pub outputs: SmallVec<[NodeId; 1]>,
    pub(crate) live: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Fusion {
    pub(crate) nodes: Vec<TensorNode>,
    pub(crate) axes: Vec<IterDomain>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
    pub(crate) axis_map: AxisMap,
}

impl Fusion {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Arena primitives
    // ------------------------------------------------------------------

    pub(crate) fn new_axis(&mut self, axis: IterDomain) -> AxisId {
        let id = AxisId(self.axes.len() as u32);
        self.axes.push(axis);
        self.axis_map.push(id);
        id
    }

    pub(crate) fn new_node(&mut self, root: Vec<AxisId>, memory: MemoryType) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(TensorNode::new(root, memory));
        id
    }

    pub(crate) fn new_expr(
        &mut self,
        kind: ExprKind,
        inputs: SmallVec<[NodeId; 2]>,
        outputs: SmallVec<[NodeId; 1]>,
    ) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        for &input in &inputs {
            let uses = &mut self.nodes[input.index()].uses;
            if !uses.contains(&id) {
                uses.push(id);
            }
        }
        for &output in &outputs {
            self.nodes[output.index()].definition = Some(id);
        }
        self.exprs.push(Expr { kind, inputs, outputs, live: true });
        id
    }

    /// Fresh root axes mirroring the non-reduction root axes of `node`.
    fn fresh_from(&mut self, node: NodeId) -> Result<Vec<AxisId>> {
        let sources: Vec<IterDomain> =
            self.node(node)?.root.iter().map(|&a| &self.axes[a.index()]).filter(|d| !d.is_reduction()).cloned().collect();
        Ok(sources.into_iter().map(|d| self.new_axis(IterDomain::new(d.extent, d.kind))).collect())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Result<&TensorNode> {
        self.nodes.get(id.index()).filter(|n| n.live).context(UnknownNodeSnafu { node: id })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut TensorNode> {
        self.nodes.get_mut(id.index()).filter(|n| n.live).context(UnknownNodeSnafu { node: id })
    }

    pub fn axis(&self, id: AxisId) -> &IterDomain {
        &self.axes[id.index()]
    }

    pub fn axis_mut(&mut self, id: AxisId) -> &mut IterDomain {
        &mut self.axes[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn axis_map(&self) -> &AxisMap {
        &self.axis_map
    }

    /// Record that two axes denote the same loop.
    pub fn map_axes(&mut self, a: AxisId, b: AxisId) {
        self.axis_map.union(a, b);
    }

    pub fn are_mapped(&self, a: AxisId, b: AxisId) -> bool {
        self.axis_map.are_mapped(a, b)
    }

    pub fn ndims(&self, node: NodeId) -> Result<usize> {
        Ok(self.node(node)?.leaf.len())
    }

    /// Leaf axis at `pos`; negative positions count from the innermost axis.
    pub fn leaf_axis(&self, node: NodeId, pos: isize) -> Result<AxisId> {
        let leaf = &self.node(node)?.leaf;
        let ndims = leaf.len();
        let idx = if pos < 0 { ndims as isize + pos } else { pos };
        ensure!(idx >= 0 && (idx as usize) < ndims, AxisOutOfBoundsSnafu { node, axis: pos, ndims });
        Ok(leaf[idx as usize])
    }

    /// Leaf axes of `node`, outermost first.
    pub fn leaf_domains(&self, node: NodeId) -> Result<Vec<&IterDomain>> {
        Ok(self.node(node)?.leaf.iter().map(|&a| self.axis(a)).collect())
    }

    /// Live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().enumerate().filter(|(_, n)| n.live).map(|(i, _)| NodeId(i as u32))
    }

    /// Live expressions in creation order.
    pub fn exprs(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.exprs.iter().enumerate().filter(|(_, e)| e.live).map(|(i, _)| ExprId(i as u32))
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn is_input(&self, node: NodeId) -> bool {
        self.inputs.contains(&node)
    }

    pub fn is_output(&self, node: NodeId) -> bool {
        self.outputs.contains(&node)
    }

    pub fn definition(&self, node: NodeId) -> Result<Option<&Expr>> {
        Ok(self.node(node)?.definition.map(|e| self.expr(e)))
    }

    pub fn producers(&self, node: NodeId) -> Result<SmallVec<[NodeId; 2]>> {
        let mut producers = SmallVec::new();
        if let Some(expr) = self.definition(node)? {
            for &input in &expr.inputs {
                if !producers.contains(&input) {
                    producers.push(input);
                }
            }
        }
        Ok(producers)
    }

    pub fn consumers(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut consumers = Vec::new();
        for &use_ in &self.node(node)?.uses {
            let expr = self.expr(use_);
            if !expr.live {
                continue;
            }
            for &output in &expr.outputs {
                if !consumers.contains(&output) {
                    consumers.push(output);
                }
            }
        }
        Ok(consumers)
    }

    /// Other outputs of the expression defining `node`.
    pub fn siblings(&self, node: NodeId) -> Result<SmallVec<[NodeId; 2]>> {
        Ok(self
            .definition(node)?
            .map(|expr| expr.outputs.iter().copied().filter(|&o| o != node).collect())
            .unwrap_or_default())
    }

    /// `node` followed by its siblings.
    pub fn with_siblings(&self, node: NodeId) -> Result<SmallVec<[NodeId; 2]>> {
        let mut all: SmallVec<[NodeId; 2]> = smallvec![node];
        all.extend(self.siblings(node)?);
        Ok(all)
    }

    pub fn has_reduction(&self, node: NodeId) -> Result<bool> {
        let n = self.node(node)?;
        Ok(n.root.iter().chain(&n.leaf).any(|&a| self.axis(a).is_reduction()))
    }

    /// Root axis a leaf axis was derived from.
    pub fn root_ancestor(&self, mut axis: AxisId) -> AxisId {
        loop {
            match self.axis(axis).origin {
                AxisOrigin::Root => return axis,
                AxisOrigin::SplitOuter(src) | AxisOrigin::SplitInner(src) | AxisOrigin::Clone(src) => axis = src,
            }
        }
    }

    /// Every path `from -> ... -> to` along consumer edges, endpoints included.
    pub fn dependency_chains(&self, from: NodeId, to: NodeId) -> Result<Vec<Vec<NodeId>>> {
        self.node(to)?;
        let mut chains = Vec::new();
        let mut path = vec![from];
        self.collect_chains(from, to, &mut path, &mut chains)?;
        Ok(chains)
    }

    fn collect_chains(
        &self,
        cur: NodeId,
        to: NodeId,
        path: &mut Vec<NodeId>,
        chains: &mut Vec<Vec<NodeId>>,
    ) -> Result<()> {
        if cur == to {
            chains.push(path.clone());
            return Ok(());
        }
        for next in self.consumers(cur)? {
            path.push(next);
            self.collect_chains(next, to, path, chains)?;
            path.pop();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Graph construction
    // ------------------------------------------------------------------

    /// Global-memory input with plain iteration axes.
    pub fn input<E: Into<Extent>>(&mut self, shape: impl IntoIterator<Item = E>) -> NodeId {
        let axes = shape.into_iter().map(IterDomain::iteration).collect();
        self.input_with_axes(axes)
    }

    pub fn input_with_axes(&mut self, axes: Vec<IterDomain>) -> NodeId {
        let root = axes.into_iter().map(|d| self.new_axis(d)).collect();
        let id = self.new_node(root, MemoryType::Global);
        self.inputs.push(id);
        id
    }

    pub fn add_output(&mut self, node: NodeId) -> Result<()> {
        self.node_mut(node)?.memory = MemoryType::Global;
        if !self.outputs.contains(&node) {
            self.outputs.push(node);
        }
        Ok(())
    }

    /// Drop `node` from the outputs; a node nothing else reads is removed entirely.
    pub fn remove_output(&mut self, node: NodeId) -> Result<()> {
        self.node(node)?;
        self.outputs.retain(|&o| o != node);
        let unused = self.consumers(node)?.is_empty();
        if !unused || self.is_input(node) {
            return Ok(());
        }
        let definition = self.node(node)?.definition;
        if let Some(def) = definition {
            if self.expr(def).outputs.len() > 1 {
                return Ok(());
            }
            self.exprs[def.index()].live = false;
            let inputs = self.exprs[def.index()].inputs.clone();
            for input in inputs {
                self.nodes[input.index()].uses.retain(|&u| u != def);
            }
        }
        self.nodes[node.index()].live = false;
        tracing::trace!(%node, "removed dead output");
        Ok(())
    }

    pub fn set(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary_like(ExprKind::Set, x)
    }

    pub fn unary(&mut self, op: UnaryOp, x: NodeId) -> Result<NodeId> {
        self.unary_like(ExprKind::Unary(op), x)
    }

    fn unary_like(&mut self, kind: ExprKind, x: NodeId) -> Result<NodeId> {
        let root = self.fresh_from(x)?;
        let out = self.new_node(root, MemoryType::Local);
        self.new_expr(kind, smallvec![x], smallvec![out]);
        Ok(out)
    }

    /// Elementwise binary op; a broadcast on one side takes the other side's extent.
    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        let lhs = self.logical_domains(a)?;
        let rhs = self.logical_domains(b)?;
        ensure!(lhs.len() == rhs.len(), RankMismatchSnafu { expected: lhs.len(), found: rhs.len() });

        let root = lhs
            .into_iter()
            .zip(rhs)
            .map(|(l, r)| {
                let d = if l.is_broadcast() && !r.is_broadcast() { r } else { l };
                self.new_axis(IterDomain::new(d.extent, d.kind))
            })
            .collect();
        let out = self.new_node(root, MemoryType::Local);
        self.new_expr(ExprKind::Binary(op), smallvec![a, b], smallvec![out]);
        Ok(out)
    }

    /// Reduce `x` over `axes`, counted among its non-reduction root axes.
    pub fn reduce(&mut self, op: ReduceOp, x: NodeId, axes: &[usize]) -> Result<NodeId> {
        let root = self.reduction_root(x, axes)?;
        let out = self.new_node(root, MemoryType::Local);
        self.new_expr(ExprKind::Reduction(op), smallvec![x], smallvec![out]);
        Ok(out)
    }

    /// Several reductions over the same axes in one expression; outputs are siblings.
    pub fn grouped_reduce(&mut self, operands: &[(ReduceOp, NodeId)], axes: &[usize]) -> Result<Vec<NodeId>> {
        let mut ops = SmallVec::new();
        let mut inputs = SmallVec::new();
        let mut outputs = SmallVec::new();
        let mut rank = None;
        for &(op, x) in operands {
            let root = self.reduction_root(x, axes)?;
            let expected = *rank.get_or_insert(root.len());
            ensure!(root.len() == expected, RankMismatchSnafu { expected, found: root.len() });
            ops.push(op);
            inputs.push(x);
            outputs.push(self.new_node(root, MemoryType::Local));
        }
        let result = outputs.to_vec();
        self.new_expr(ExprKind::GroupedReduction(ops), inputs, outputs);
        Ok(result)
    }

    fn reduction_root(&mut self, x: NodeId, axes: &[usize]) -> Result<Vec<AxisId>> {
        let domains = self.logical_domains(x)?;
        for &axis in axes {
            ensure!(
                domains.get(axis).is_some_and(|d| d.is_iteration()),
                InvalidReductionAxisSnafu { node: x, axis }
            );
        }
        Ok(domains
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                let kind = if axes.contains(&i) { IterKind::Reduction } else { d.kind };
                self.new_axis(IterDomain::new(d.extent, kind))
            })
            .collect())
    }

    /// Insert broadcast axes where `flags` is `true`.
    pub fn broadcast(&mut self, x: NodeId, flags: &[bool]) -> Result<NodeId> {
        let domains = self.logical_domains(x)?;
        let kept = flags.iter().filter(|&&f| !f).count();
        ensure!(kept == domains.len(), BroadcastAritySnafu { kept, available: domains.len() });

        let mut source = domains.into_iter();
        let mut root = Vec::with_capacity(flags.len());
        for &is_broadcast in flags {
            let axis = match is_broadcast {
                true => IterDomain::broadcast(),
                false => {
                    let d = source.next().context(BroadcastAritySnafu { kept, available: 0usize })?;
                    IterDomain::new(d.extent, d.kind)
                }
            };
            root.push(self.new_axis(axis));
        }
        let out = self.new_node(root, MemoryType::Local);
        self.new_expr(ExprKind::Broadcast(flags.to_vec()), smallvec![x], smallvec![out]);
        Ok(out)
    }

    /// Insert a copy between `input` and all of its current readers.
    pub fn cache_after(&mut self, input: NodeId) -> Result<NodeId> {
        let readers = self.node(input)?.uses.clone();
        let cache = self.set(input)?;
        for expr in readers {
            self.replace_input(expr, input, cache)?;
        }
        Ok(cache)
    }

    /// Move the computation of `output` into a new node and make `output` a copy of it.
    pub fn cache_before(&mut self, output: NodeId) -> Result<NodeId> {
        let (root, leaf, history, definition) = {
            let n = self.node(output)?;
            (n.root.clone(), n.leaf.clone(), n.history.clone(), n.definition)
        };
        let def = definition.context(NoDefinitionSnafu { node: output })?;

        let cache = self.new_node(root, MemoryType::Local);
        {
            let c = &mut self.nodes[cache.index()];
            c.leaf = leaf;
            c.history = history;
            c.definition = Some(def);
        }
        for o in self.exprs[def.index()].outputs.iter_mut() {
            if *o == output {
                *o = cache;
            }
        }

        let root = self.fresh_from(cache)?;
        let out = &mut self.nodes[output.index()];
        out.leaf = root.clone();
        out.root = root;
        out.history.clear();
        out.definition = None;
        self.new_expr(ExprKind::Set, smallvec![cache], smallvec![output]);
        Ok(cache)
    }

    /// Non-reduction root axes, the logical shape seen by consumers.
    fn logical_domains(&self, node: NodeId) -> Result<Vec<IterDomain>> {
        Ok(self
            .node(node)?
            .root
            .iter()
            .map(|&a| self.axis(a))
            .filter(|d| !d.is_reduction())
            .cloned()
            .collect())
    }

    /// Root-position correspondence `(producer, consumer)` across the expression defining `consumer`.
    ///
    /// Producers drop their reduction axes, except rfactor producers whose root is
    /// the consumer's root. Broadcast outputs skip the inserted positions.
    pub fn root_map(&self, producer: NodeId, consumer: NodeId) -> Result<Vec<(usize, usize)>> {
        let p = self.node(producer)?;
        let c = self.node(consumer)?;
        let expr = c
            .definition
            .map(|e| self.expr(e))
            .filter(|e| e.inputs.contains(&producer))
            .context(NotAProducerSnafu { producer, consumer })?;

        let p_positions: Vec<usize> = match p.role {
            NodeRole::RFactorProducer => (0..p.root.len()).collect(),
            _ => (0..p.root.len()).filter(|&i| !self.axis(p.root[i]).is_reduction()).collect(),
        };
        let c_positions: Vec<usize> = match &expr.kind {
            ExprKind::Broadcast(flags) => (0..flags.len()).filter(|&i| !flags[i]).collect(),
            _ => (0..c.root.len()).collect(),
        };
        ensure!(
            p_positions.len() == c_positions.len(),
            RankMismatchSnafu { expected: c_positions.len(), found: p_positions.len() }
        );
        Ok(p_positions.into_iter().zip(c_positions).collect())
    }
}
