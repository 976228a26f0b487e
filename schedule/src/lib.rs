//! Reduction scheduling for kfuse kernels.
//!
//! Given a fusion containing reductions and a [`ReductionParams`] record chosen
//! by a heuristic, this crate produces the loop structure of a single GPU
//! kernel: canonical axis order, split and tagged axes, materialized partial
//! reductions, and inlined intermediates.
//!
//! # Module Organization
//!
//! - [`ordering`] - Twelve-class axis ordering policy
//! - [`rfactor`] - Canonical reorder plus partial-reduction materialization
//! - [`reduction`] - Scheduling of a single reduction node
//! - [`propagate`] - Transform and parallel-tag propagation
//! - [`multi_reduction`] - Applying the schedule to every reduction of a kernel
//! - [`inline`] - Maximal inlining
//! - [`projection`] - Persistent-buffer projection
//! - [`pipeline`] - End-to-end driver
//!
//! # Example
//!
//! ```rust
//! use kfuse_ir::{Fusion, ParallelType, ReduceOp};
//! use kfuse_schedule::{PersistentBufferInfo, ReductionParams, ScheduleConfig, schedule_reduction_kernel};
//!
//! let mut fusion = Fusion::new();
//! let t0 = fusion.input([128, 1024]);
//! let t1 = fusion.reduce(ReduceOp::Add, t0, &[1]).unwrap();
//! fusion.add_output(t1).unwrap();
//!
//! let params = ReductionParams {
//!     cross_block_inner_reduction: true,
//!     block_dim_inner_reduction: ParallelType::ThreadX,
//!     grid_dim_iter_dom: ParallelType::BlockX,
//!     ..Default::default()
//! };
//! let config = ScheduleConfig::default();
//! let scheduled = schedule_reduction_kernel(&mut fusion, &params, &config, &PersistentBufferInfo::default()).unwrap();
//! assert_ne!(scheduled.reference, scheduled.reduction);
//! ```

pub mod config;
pub mod error;
pub mod inline;
pub mod multi_reduction;
pub mod ordering;
pub mod params;
pub mod pipeline;
pub mod projection;
pub mod propagate;
pub mod reduction;
pub mod rfactor;


pub use config::ScheduleConfig;
pub use error::{Result, ScheduleError};
pub use multi_reduction::{MultiReduction, multi_reduction_inliner};
pub use ordering::{AxisClass, canonical_order, classify};
pub use params::{LaunchParams, ReductionParams};
pub use pipeline::{ScheduledReduction, schedule_reduction_kernel};
pub use projection::{PersistentBufferInfo, project_persistent_buffers};
pub use reduction::{AxisRoles, schedule_reduction_tv};
pub use rfactor::sort_and_rfactor;
