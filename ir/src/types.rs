//! Fundamental enums shared by axes, nodes and expressions.

use std::fmt;

use enumset::{EnumSet, enum_set};

/// Role of an axis in its node's iteration space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IterKind {
    /// Ordinary data-parallel dimension.
    Iteration,
    /// Dimension folded by the node's reduction.
    Reduction,
    /// Extent-one dimension introduced by a broadcast.
    Broadcast,
}

impl IterKind {
    pub const fn letter(&self) -> char {
        match self {
            Self::Iteration => 'i',
            Self::Reduction => 'r',
            Self::Broadcast => 'b',
        }
    }
}

/// Device execution resource an axis is mapped to.
///
/// `Block*` are grid-level indices (one value per thread block), `Thread*` are
/// block-level indices (one value per thread).
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumIter, strum::IntoStaticStr)]
#[derive(enumset::EnumSetType)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ParallelType {
    #[strum(serialize = "blockIdx.z")]
    BlockZ,
    #[strum(serialize = "blockIdx.y")]
    BlockY,
    #[strum(serialize = "blockIdx.x")]
    BlockX,
    #[strum(serialize = "threadIdx.z")]
    ThreadZ,
    #[strum(serialize = "threadIdx.y")]
    ThreadY,
    #[strum(serialize = "threadIdx.x")]
    ThreadX,
    #[strum(serialize = "V")]
    Vectorize,
    #[strum(serialize = "MV")]
    MisalignedVectorize,
    #[strum(serialize = "UR")]
    Unroll,
    #[strum(serialize = "US")]
    Unswitch,
    #[strum(serialize = "G")]
    Group,
    #[strum(serialize = "S")]
    Serial,
}

/// Tags that expand an axis into straight-line or vector code.
pub const UNROLL_TYPES: EnumSet<ParallelType> =
    enum_set!(ParallelType::Vectorize | ParallelType::MisalignedVectorize | ParallelType::Unroll);

/// Grid-level indices.
pub const BLOCK_DIMS: EnumSet<ParallelType> = enum_set!(ParallelType::BlockX | ParallelType::BlockY | ParallelType::BlockZ);

/// Block-level (per-thread) indices.
pub const THREAD_DIMS: EnumSet<ParallelType> =
    enum_set!(ParallelType::ThreadX | ParallelType::ThreadY | ParallelType::ThreadZ);

impl ParallelType {
    /// Grid-level index (`blockIdx.*`).
    pub fn is_block_dim(self) -> bool {
        BLOCK_DIMS.contains(self)
    }

    /// Block-level index (`threadIdx.*`).
    pub fn is_thread_dim(self) -> bool {
        THREAD_DIMS.contains(self)
    }

    /// Either hardware index level.
    pub fn is_thread(self) -> bool {
        self.is_block_dim() || self.is_thread_dim()
    }

    /// Vectorize, misaligned vectorize or unroll.
    pub fn is_unrolled(self) -> bool {
        UNROLL_TYPES.contains(self)
    }

    /// Name of the runtime launch dimension bound to this index, if any.
    pub fn dim_name(self) -> Option<&'static str> {
        match self {
            Self::BlockX => Some("gridDim.x"),
            Self::BlockY => Some("gridDim.y"),
            Self::BlockZ => Some("gridDim.z"),
            Self::ThreadX => Some("blockDim.x"),
            Self::ThreadY => Some("blockDim.y"),
            Self::ThreadZ => Some("blockDim.z"),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for ParallelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a node's values live while the kernel runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemoryType {
    #[default]
    Local,
    Shared,
    Global,
}

/// How a node's leaf domain came to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Leaf domain is the root domain replayed through the node's history.
    #[default]
    Plain,
    /// Partial-reduction intermediate created by rfactor.
    RFactorProducer,
    /// Reduction whose leaf lost the axes moved into its rfactor producer.
    RFactorConsumer,
}

/// Reduction operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Mul,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Sqrt,
    Reciprocal,
    Cast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
}
