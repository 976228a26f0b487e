//! Loop-nest IR for the kfuse scheduler.
//!
//! A [`Fusion`] is a DAG of tensor-shaped nodes connected by expressions. Each
//! node carries a root domain (its logical axes) and a leaf domain derived from
//! it by splits and reorders; leaf axes carry the parallel tags that decide how
//! the loop nest is mapped onto a GPU launch.
//!
//! # Module Organization
//!
//! - [`types`] - Axis kinds, parallel tags, memory types, operators
//! - [`extent`] - Constant or symbolic axis extents
//! - [`domain`] - Axes, arena handles, recorded transforms
//! - [`fusion`] - The graph arena, builders and graph queries
//! - [`axis_map`] - Exact loop mapping between axes of different nodes
//! - [`error`] - Error types and result handling
//!
//! Loop transforms (split, reorder, rfactor, replay, ...) are methods on
//! [`Fusion`].

pub mod axis_map;
pub mod display;
pub mod domain;
pub mod error;
pub mod extent;
pub mod fusion;
pub mod transform;
pub mod types;


pub use axis_map::AxisMap;
pub use domain::{AxisId, AxisOrigin, ExprId, IterDomain, NodeId, Transform};
pub use error::{Error, Result};
pub use extent::Extent;
pub use fusion::{Expr, ExprKind, Fusion, TensorNode};
pub use types::{
    BLOCK_DIMS, BinaryOp, IterKind, MemoryType, NodeRole, ParallelType, ReduceOp, THREAD_DIMS, UNROLL_TYPES, UnaryOp,
};
