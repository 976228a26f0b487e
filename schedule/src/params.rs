//! Parameter records produced by the reduction heuristic.
//!
//! Both records are plain data: the scheduler reads them and never mutates
//! them. A heuristic may hand them over serialized.

use std::fmt;

use kfuse_ir::ParallelType;
use serde::{Deserialize, Serialize};

/// Launch dimensions the kernel will be started with; `None` means decided at
/// launch time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub gdimx: Option<usize>,
    pub gdimy: Option<usize>,
    pub gdimz: Option<usize>,
    pub bdimx: Option<usize>,
    pub bdimy: Option<usize>,
    pub bdimz: Option<usize>,
}

impl LaunchParams {
    pub fn bdimx(&self) -> Option<usize> {
        self.bdimx
    }

    pub fn bdimy(&self) -> Option<usize> {
        self.bdimy
    }
}

/// How one reduction kernel is mapped onto the device.
///
/// The "inner" reduction is the only reduction axis unless `schedule_3d` is
/// set, in which case an outer reduction axis precedes it. With `fastest_dim`
/// the reduction is the contiguous dimension; otherwise the iteration domain
/// is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionParams {
    /// Reduction axis is the innermost (contiguous) dimension.
    pub fastest_dim: bool,
    /// Keep the reduced input resident in registers across the whole reduction.
    pub persistent_kernel: bool,
    /// Recompute persistent buffers from their inputs where possible.
    pub project_persistent_buffers: bool,
    /// Iteration, outer reduction and inner reduction axes are all scheduled.
    pub schedule_3d: bool,

    // Inner reduction
    pub cross_block_inner_reduction: bool,
    pub cross_grid_inner_reduction: bool,
    pub unroll_factor_inner_reduction: usize,
    pub vectorize_inner_reduction: bool,
    pub split_grid_dim_inner_reduction: bool,
    pub pad_inner_reduction_to_warp: bool,
    pub batches_per_block_inner_reduction: usize,
    pub block_dim_inner_reduction: ParallelType,
    pub grid_dim_inner_reduction: ParallelType,

    // Iteration domain
    pub multiple_reds_per_blk: bool,
    pub unroll_factor_iter_dom: usize,
    pub vectorize_iter_dom: bool,
    pub split_grid_dim_iter_dom_inner: bool,
    pub split_grid_dim_iter_dom_outer: bool,
    pub block_dim_iter_dom: ParallelType,
    pub grid_dim_iter_dom: ParallelType,

    // Outer reduction (3-D schedules only)
    pub cross_block_outer_reduction: bool,
    pub cross_grid_outer_reduction: bool,
    pub unroll_factor_outer_reduction: usize,
    pub batches_per_block_outer_reduction: usize,
    pub block_dim_outer_reduction: ParallelType,
    pub grid_dim_outer_reduction: ParallelType,

    /// `lparams.bdimx` is a compile-time constant.
    pub static_bdimx: bool,
    /// `lparams.bdimy` is a compile-time constant.
    pub static_bdimy: bool,
    pub lparams: LaunchParams,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            fastest_dim: true,
            persistent_kernel: false,
            project_persistent_buffers: false,
            schedule_3d: false,
            cross_block_inner_reduction: false,
            cross_grid_inner_reduction: false,
            unroll_factor_inner_reduction: 1,
            vectorize_inner_reduction: false,
            split_grid_dim_inner_reduction: false,
            pad_inner_reduction_to_warp: false,
            batches_per_block_inner_reduction: 1,
            block_dim_inner_reduction: ParallelType::Serial,
            grid_dim_inner_reduction: ParallelType::Serial,
            multiple_reds_per_blk: false,
            unroll_factor_iter_dom: 1,
            vectorize_iter_dom: false,
            split_grid_dim_iter_dom_inner: false,
            split_grid_dim_iter_dom_outer: false,
            block_dim_iter_dom: ParallelType::Serial,
            grid_dim_iter_dom: ParallelType::Serial,
            cross_block_outer_reduction: false,
            cross_grid_outer_reduction: false,
            unroll_factor_outer_reduction: 1,
            batches_per_block_outer_reduction: 1,
            block_dim_outer_reduction: ParallelType::Serial,
            grid_dim_outer_reduction: ParallelType::Serial,
            static_bdimx: false,
            static_bdimy: false,
            lparams: LaunchParams::default(),
        }
    }
}

impl ReductionParams {
    /// Any axis is unrolled or vectorized.
    pub fn is_unrolled(&self) -> bool {
        self.unroll_factor_inner_reduction > 1
            || self.unroll_factor_iter_dom > 1
            || self.unroll_factor_outer_reduction > 1
    }

    pub fn is_vectorized(&self) -> bool {
        self.vectorize_inner_reduction || self.vectorize_iter_dom
    }

    /// Persistent kernel whose inner reduction spans the grid while the
    /// iteration domain is contiguous.
    pub fn is_outer_grid_persistence(&self) -> bool {
        self.persistent_kernel && self.cross_grid_inner_reduction && !self.fastest_dim
    }
}

impl fmt::Display for ReductionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match (self.persistent_kernel, self.fastest_dim) {
            (true, true) => "persistent inner",
            (true, false) => "persistent outer",
            (false, true) => "inner",
            (false, false) => "outer",
        };
        write!(f, "{kind} reduction")?;
        if self.schedule_3d {
            f.write_str(" (3D)")?;
        }
        write!(
            f,
            " red: {}/{} x{} batch {}",
            self.block_dim_inner_reduction,
            self.grid_dim_inner_reduction,
            self.unroll_factor_inner_reduction,
            self.batches_per_block_inner_reduction
        )?;
        if self.vectorize_inner_reduction {
            f.write_str(" vec")?;
        }
        write!(f, " iter: {}/{} x{}", self.block_dim_iter_dom, self.grid_dim_iter_dom, self.unroll_factor_iter_dom)?;
        if self.vectorize_iter_dom {
            f.write_str(" vec")?;
        }
        Ok(())
    }
}
