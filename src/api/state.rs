//! Shared handler state

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::pool::PoolHandle;
use crate::storage::LogStore;

/// Application state shared across HTTP handlers
pub struct AppState {
    /// Submission side of the batching pool
    pub pool: PoolHandle,

    /// Read access to checkpoint, tiles and bundles
    pub store: Arc<LogStore>,

    /// Add-request latency aggregate, logged periodically. Shared with the
    /// stats task, which must not keep the pool handle alive.
    pub latency: Arc<Latency>,
}

/// Min/mean/max latency aggregator.
///
/// Observability only; nothing in the write path depends on it.
#[derive(Default)]
pub struct Latency {
    inner: Mutex<LatencyInner>,
}

#[derive(Default)]
struct LatencyInner {
    total: Duration,
    count: u64,
    min: Duration,
    max: Duration,
}

impl Latency {
    pub fn record(&self, d: Duration) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.total += d;
        if inner.count == 0 || d < inner.min {
            inner.min = d;
        }
        if d > inner.max {
            inner.max = d;
        }
        inner.count += 1;
    }

    pub fn summary(&self) -> String {
        let Ok(inner) = self.inner.lock() else {
            return "--".into();
        };
        if inner.count == 0 {
            return "--".into();
        }
        format!(
            "[mean: {:?} min: {:?} max: {:?}]",
            inner.total / inner.count as u32,
            inner.min,
            inner.max
        )
    }
}
