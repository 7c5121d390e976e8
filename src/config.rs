//! Log and pool configuration

use std::time::Duration;

use crate::error::{LogError, LogResult};
use crate::tile::TILE_MAX_LEAVES;

/// Tree layout parameters
#[derive(Debug, Clone)]
pub struct LogParams {
    /// Entries per bundle, and equally hashes per tile on every level.
    /// Must be a power of two in `[2, 256]`: a complete tile's root has to
    /// be a perfect-subtree root for the fold at upper levels to hold.
    pub entry_bundle_size: usize,
}

impl Default for LogParams {
    fn default() -> Self {
        Self {
            entry_bundle_size: 256,
        }
    }
}

impl LogParams {
    pub fn validate(&self) -> LogResult<()> {
        let w = self.entry_bundle_size;
        if !(2..=TILE_MAX_LEAVES).contains(&w) || !w.is_power_of_two() {
            return Err(LogError::InvalidArgument(format!(
                "entry_bundle_size must be a power of two in [2, {}], got {}",
                TILE_MAX_LEAVES, w
            )));
        }
        Ok(())
    }
}

/// Batching pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Size trigger for closing a batch
    pub batch_size: usize,

    /// Longest an entry waits in an open batch before a flush
    pub batch_max_age: Duration,

    /// Bounded submission channel capacity
    pub buffer_size: usize,

    /// Attempts per batch on transient store failure
    pub retry_count: u32,

    /// Base delay for exponential backoff between attempts
    pub retry_base: Duration,

    /// Accept zero-length entries
    pub allow_empty_entries: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_max_age: Duration::from_millis(100),
            buffer_size: 1024,
            retry_count: 3,
            retry_base: Duration::from_millis(10),
            allow_empty_entries: false,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> LogResult<()> {
        if self.batch_size == 0 {
            return Err(LogError::InvalidArgument(
                "batch_size must be positive".into(),
            ));
        }
        if self.batch_max_age.is_zero() {
            return Err(LogError::InvalidArgument(
                "batch_max_age must be positive".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(LogError::InvalidArgument(
                "buffer_size must be positive".into(),
            ));
        }
        if self.retry_count == 0 {
            return Err(LogError::InvalidArgument(
                "retry_count must be positive".into(),
            ));
        }
        Ok(())
    }
}
