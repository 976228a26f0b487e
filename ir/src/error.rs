use snafu::Snafu;

use crate::{AxisId, ExprId, NodeId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Handle does not refer to a live node.
    #[snafu(display("unknown or removed node {node}"))]
    UnknownNode { node: NodeId },

    /// Leaf position outside the node's domain.
    #[snafu(display("axis {axis} out of bounds for {node} with {ndims} dimensions"))]
    AxisOutOfBounds { node: NodeId, axis: isize, ndims: usize },

    /// Split factor of zero.
    #[snafu(display("cannot split {node} axis {axis} by a zero factor"))]
    ZeroSplitFactor { node: NodeId, axis: usize },

    /// Reorder map with duplicate sources or destinations.
    #[snafu(display("invalid reorder of {node}: {reason}"))]
    InvalidReorder { node: NodeId, reason: &'static str },

    /// Operand ranks do not line up.
    #[snafu(display("rank mismatch: expected {expected} dimensions, found {found}"))]
    RankMismatch { expected: usize, found: usize },

    /// Broadcast flags must leave room for every non-reduction input axis.
    #[snafu(display("broadcast flags keep {kept} axes but input has {available} non-reduction axes"))]
    BroadcastArity { kept: usize, available: usize },

    /// Reduction over an axis that is not a plain iteration axis.
    #[snafu(display("cannot reduce axis {axis} of {node}"))]
    InvalidReductionAxis { node: NodeId, axis: usize },

    /// rfactor position that is not a reduction axis.
    #[snafu(display("rfactor axis {axis} of {node} is not a reduction"))]
    RFactorNonReduction { node: NodeId, axis: usize },

    /// rfactor must leave at least one reduction axis in the consumer.
    #[snafu(display("rfactor of {node} would consume every reduction axis"))]
    RFactorAllReductions { node: NodeId },

    /// rfactor requires a node defined by a reduction.
    #[snafu(display("{node} is not defined by a reduction"))]
    NotAReduction { node: NodeId },

    /// Fusion inputs have no defining expression to recompute or cache.
    #[snafu(display("{node} has no definition"))]
    NoDefinition { node: NodeId },

    /// Recompute only supports single-output definitions.
    #[snafu(display("cannot recompute {node}: definition has {outputs} outputs"))]
    RecomputeMultiOutput { node: NodeId, outputs: usize },

    /// replace_input target is not an operand of the expression.
    #[snafu(display("{node} is not an input of expression {expr}"))]
    NotAnInput { node: NodeId, expr: ExprId },

    /// `producer` does not feed the expression defining `consumer`.
    #[snafu(display("{producer} is not a producer of {consumer}"))]
    NotAProducer { producer: NodeId, consumer: NodeId },

    /// Axis lookup failed inside a transform.
    #[snafu(display("axis {axis} not found in {node}"))]
    AxisNotFound { node: NodeId, axis: AxisId },
}
