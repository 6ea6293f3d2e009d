//! Monotonic tick sources
//!
//! The core never reads the wall clock. Every time-dependent decision uses
//! milliseconds from a [`TickSource`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait TickSource {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
}

/// Ticks measured from process start
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced ticks. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualTicks {
    now: Arc<AtomicU64>,
}

impl ManualTicks {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl TickSource for ManualTicks {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
