//! Diagnostic timing for index operations.
//!
//! The index only needs two things from its environment for diagnostics: a
//! microsecond clock and a place to send log lines. Log lines go through
//! `tracing`; the host decides whether a subscriber is installed.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
#[must_use]
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Emits one `debug` event with the elapsed time when dropped.
///
/// ```rust,ignore
/// let _timer = OpTimer::start("search");
/// // ... work ...
/// // debug event `op="search" elapsed_us=...` on scope exit
/// ```
#[derive(Debug)]
pub struct OpTimer {
    op: &'static str,
    batch: usize,
    started: Instant,
}

impl OpTimer {
    /// Starts timing an operation.
    #[must_use]
    pub fn start(op: &'static str) -> Self {
        Self::with_batch(op, 0)
    }

    /// Starts timing an operation over `batch` vectors.
    #[must_use]
    pub fn with_batch(op: &'static str, batch: usize) -> Self {
        Self {
            op,
            batch,
            started: Instant::now(),
        }
    }

    /// Microseconds elapsed so far.
    #[must_use]
    pub fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        tracing::debug!(
            op = self.op,
            batch = self.batch,
            elapsed_us = self.elapsed_micros(),
            "operation finished"
        );
    }
}
