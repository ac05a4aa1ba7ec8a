//! Runtime capacities and tuning knobs.

use snafu::ensure;

use crate::error::*;

/// Maximum argument words per task; bounds the dispatch payload.
pub const MAX_ARGS: usize = 32;

/// Bytes reserved for a task's label in its window slot.
pub const TASK_LABEL_LEN: usize = 32;

/// Alignment of runtime-allocated output buffers.
pub const OUTPUT_ALLOC_ALIGN: u64 = 512;

/// Iteration bound for cooperative spin loops; exceeding it is fatal.
pub(crate) const WATCHDOG_SPIN_LIMIT: u64 = 1_000_000_000;

/// Capacities of the task window, dependency pool and tensor map.
///
/// The window and bucket counts must be powers of two (slot and bucket
/// selection mask instead of dividing). Defaults match the device build.
#[derive(Debug, Clone, bon::Builder)]
pub struct RuntimeConfig {
    /// Bounded ring of in-flight task slots.
    #[builder(default = 16384)]
    pub task_window_size: usize,

    /// Shared pool of successor-list nodes.
    #[builder(default = 65536)]
    pub dep_pool_size: usize,

    /// Hash buckets of the tensor map.
    #[builder(default = 4096)]
    pub tensormap_buckets: usize,

    /// Ring of producer entries backing the tensor map.
    #[builder(default = 65536)]
    pub tensormap_pool_size: usize,

    /// Retired tasks between eager tensor-map cleanups.
    #[builder(default = 128)]
    pub cleanup_interval: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.task_window_size.is_power_of_two(),
            NotPowerOfTwoSnafu { what: "task window", value: self.task_window_size }
        );
        ensure!(
            self.tensormap_buckets.is_power_of_two(),
            NotPowerOfTwoSnafu { what: "tensor map buckets", value: self.tensormap_buckets }
        );
        // The two ring pools are indexed with a true modulo, so any
        // positive size works.
        ensure!(
            self.dep_pool_size > 0,
            ZeroCapacitySnafu { what: "dep pool", value: self.dep_pool_size }
        );
        ensure!(
            self.tensormap_pool_size > 0,
            ZeroCapacitySnafu { what: "tensor map pool", value: self.tensormap_pool_size }
        );
        Ok(())
    }
}
