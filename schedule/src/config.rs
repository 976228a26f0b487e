//! Scheduler configuration.
//!
//! Typed configuration with a bon builder and environment fallbacks.

use bon::bon;

/// Switches that change how a kernel is scheduled, independent of the
/// heuristic's [`ReductionParams`](crate::ReductionParams).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Check sibling consistency and placeholder cleanup after scheduling.
    pub validate: bool,
    /// Allow persistent-buffer projection when the parameters request it.
    pub project_buffers: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { validate: cfg!(debug_assertions), project_buffers: true }
    }
}

#[bon]
impl ScheduleConfig {
    /// Create a schedule configuration with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = cfg!(debug_assertions))] validate: bool,
        #[builder(default = true)] project_buffers: bool,
    ) -> Self {
        Self { validate, project_buffers }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KFUSE_VALIDATE_SCHEDULE` - `1`/`0` forces validation on or off (default: debug builds only)
    /// * `KFUSE_DISABLE_PROJECTION` - Never project persistent buffers if set
    pub fn from_env() -> Self {
        let validate = std::env::var("KFUSE_VALIDATE_SCHEDULE")
            .ok()
            .and_then(|s| s.parse::<u8>().ok())
            .map(|v| v != 0)
            .unwrap_or(cfg!(debug_assertions));
        let project_buffers = std::env::var("KFUSE_DISABLE_PROJECTION").is_err();

        Self { validate, project_buffers }
    }
}
