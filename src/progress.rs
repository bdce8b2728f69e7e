//! Shared run progress and cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Highest fraction reported before the run reaches a terminal state.
pub const PROGRESS_CEILING: f64 = 0.99;

/// Monotonic progress fraction shared between the run and its observers.
///
/// Values only move forward and stay below `PROGRESS_CEILING` until
/// `complete()` is called.
#[derive(Clone, Debug, Default)]
pub struct ProgressTracker {
    bits: Arc<AtomicU64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Report `fraction`; lower or non-finite values are ignored.
    pub fn advance(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let target = fraction.clamp(0.0, PROGRESS_CEILING);
        self.raise_to(target);
    }

    /// Move a fixed share of the remaining distance to the ceiling.
    ///
    /// Used while an opaque batch call gives no progress of its own.
    pub fn nudge(&self, share: f64) {
        let current = self.fraction();
        let share = share.clamp(0.0, 1.0);
        self.advance(current + (PROGRESS_CEILING - current) * share);
    }

    pub fn complete(&self) {
        self.raise_to(1.0);
    }

    pub fn reset(&self) {
        self.bits.store(0f64.to_bits(), Ordering::Release);
    }

    fn raise_to(&self, target: f64) {
        let mut current = self.bits.load(Ordering::Acquire);
        while f64::from_bits(current) < target {
            match self.bits.compare_exchange_weak(
                current,
                target.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Cancellation request observed at checkpoints between engine calls.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    requested: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}
