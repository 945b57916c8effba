//! Life-cycle counters.
//!
//! Revolutions and operating time, seeded from non-volatile storage at
//! start-up and flushed back on a fixed interval. Fed from the task loop
//! with the step generator's half-step counter.

use stepper_common::error::StoreError;
use stepper_common::hal::{LifeCycleCounters, LifeCycleStore};

#[derive(Debug, Clone)]
pub struct LifeCycle {
    counters: LifeCycleCounters,
    halfsteps_per_rev: u64,
    /// Half-steps counted toward the next revolution.
    rest: u64,
    last_halfsteps: u64,
    last_ms: u64,
    last_flush_ms: u64,
    flush_interval_ms: u64,
    dirty: bool,
}

impl LifeCycle {
    pub fn new(counters: LifeCycleCounters, halfsteps_per_rev: u32, flush_interval_ms: u64) -> Self {
        Self {
            counters,
            halfsteps_per_rev: halfsteps_per_rev.max(1) as u64,
            rest: 0,
            last_halfsteps: 0,
            last_ms: 0,
            last_flush_ms: 0,
            flush_interval_ms,
            dirty: false,
        }
    }

    /// Seed from the store.
    pub fn load<S: LifeCycleStore + ?Sized>(
        store: &mut S,
        channel: u8,
        halfsteps_per_rev: u32,
        flush_interval_ms: u64,
    ) -> Self {
        Self::new(store.load(channel), halfsteps_per_rev, flush_interval_ms)
    }

    /// Start counting from the current half-step counter and time.
    pub fn start(&mut self, halfsteps_moved: u64, now_ms: u64) {
        self.last_halfsteps = halfsteps_moved;
        self.last_ms = now_ms;
        self.last_flush_ms = now_ms;
    }

    #[inline]
    pub fn counters(&self) -> LifeCycleCounters {
        self.counters
    }

    /// Account for the half-steps and time since the last update.
    pub fn update(&mut self, halfsteps_moved: u64, moving: bool, now_ms: u64) {
        let moved = halfsteps_moved.wrapping_sub(self.last_halfsteps);
        self.last_halfsteps = halfsteps_moved;
        let total = self.rest + moved;
        self.counters.revolutions += total / self.halfsteps_per_rev;
        self.rest = total % self.halfsteps_per_rev;

        let elapsed = now_ms.saturating_sub(self.last_ms);
        self.last_ms = now_ms;
        if moving {
            self.counters.operating_ms += elapsed;
        }
        if moved > 0 || moving {
            self.dirty = true;
        }
    }

    #[inline]
    pub fn flush_due(&self, now_ms: u64) -> bool {
        self.dirty && now_ms.saturating_sub(self.last_flush_ms) >= self.flush_interval_ms
    }

    /// Write the counters. A failed write is retried at the next interval.
    pub fn flush<S: LifeCycleStore + ?Sized>(
        &mut self,
        store: &mut S,
        channel: u8,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.last_flush_ms = now_ms;
        store.store(channel, &self.counters)?;
        self.dirty = false;
        Ok(())
    }
}
