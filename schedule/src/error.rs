use kfuse_ir::{NodeId, ParallelType};
use snafu::Snafu;

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;

/// Fatal scheduling failure. The whole kernel attempt is abandoned; callers
/// may retry with different parameters.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ScheduleError {
    #[snafu(context(false), display("graph error: {source}"))]
    Ir { source: kfuse_ir::Error },

    #[snafu(display("expecting at least {required} reduction axes in {node}, found {found}"))]
    InsufficientReductionAxes { node: NodeId, required: usize, found: usize },

    #[snafu(display("axis {pos} of {node} is expected to be the {role} axis"))]
    AxisRoleMismatch { node: NodeId, pos: usize, role: &'static str },

    #[snafu(display("cannot vectorize iteration domain on inner reductions"))]
    IterVectorizeOnInnerReduction,

    #[snafu(display("cannot vectorize reduction domain on outer reductions"))]
    ReductionVectorizeOnOuterReduction,

    #[snafu(display("multiple reductions per block require an iteration domain"))]
    MultipleReductionsWithoutIterAxis,

    #[snafu(display("unrolling the iteration domain requires an iteration domain"))]
    IterUnrollWithoutIterAxis,

    #[snafu(display("{dim} must be static under outer grid persistence"))]
    DynamicBlockDim { dim: &'static str },

    #[snafu(display("launch parameter {dim} is not set"))]
    MissingLaunchDim { dim: &'static str },

    #[snafu(display("vectorized axis not found in {node}"))]
    VectorizedAxisNotFound { node: NodeId },

    #[snafu(display("axis {axis} of {node} missing from the computed ordering"))]
    AxisNotInOrdering { node: NodeId, axis: usize },

    #[snafu(display("{node} is expected to be rfactored already"))]
    MissingRFactor { node: NodeId },

    #[snafu(display("{node} is not a reduction"))]
    NotAReduction { node: NodeId },

    #[snafu(display("no reduction found in the fusion"))]
    NoReduction,

    #[snafu(display("{buffers} persistent buffers but {points} resolution point lists"))]
    ResolutionPointMismatch { buffers: usize, points: usize },

    #[snafu(display("{node} is not connected to the reference {reference}"))]
    Unreachable { node: NodeId, reference: NodeId },

    #[snafu(display("{sibling} has {found} at leaf position {pos} but {node} has {expected}"))]
    SiblingMismatch { node: NodeId, sibling: NodeId, pos: usize, expected: ParallelType, found: ParallelType },

    #[snafu(display("placeholder {node} is still a fusion output"))]
    PlaceholderLeft { node: NodeId },
}
