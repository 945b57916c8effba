//! Reference-run supervision.
//!
//! Establishes the absolute position origin with the reference limit switch.
//! The supervisor issues ordinary speed and position requests to the motor
//! and watches their outcome from the task loop; it never touches the step
//! generator directly.
//!
//! ## Sequence
//!
//! | State                | Action                                  | Next on success       |
//! |----------------------|-----------------------------------------|-----------------------|
//! | `FastMotionStart`    | speed request toward the switch         | `FastMotion`          |
//! | `FastMotion`         | wait for stop at the reference code     | `ReverseMotionStart`  |
//! | `ReverseMotionStart` | position request off the switch         | `ReverseMotion`       |
//! | `ReverseMotion`      | wait for stop with no switch active     | `SlowMotionStart`     |
//! | `SlowMotionStart`    | slow speed request toward the switch    | `SlowMotion`          |
//! | `SlowMotion`         | wait for stop at the reference code     | `Finished`            |
//!
//! A run that starts on the switch skips the fast approach. A zero reverse
//! distance or slow speed finishes right after the fast approach.
//!
//! Every failure ends the run; there is no resume.

use stepper_common::config::ReferenceRunConfig;
use stepper_common::error::MotionFault;
use stepper_common::hal::StepTimer;
use stepper_common::types::Direction;

use crate::motion::Motor;

/// Reference-run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRunState {
    FastMotionStart,
    FastMotion,
    ReverseMotionStart,
    ReverseMotion,
    SlowMotionStart,
    SlowMotion,
    Finished,
}

/// Result of one supervision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRunTick {
    InProgress,
    /// Caller sets the absolute position and re-references the encoder.
    Done { position: i64 },
    Failed(MotionFault),
}

/// Reference-run supervisor of one motor.
#[derive(Debug, Clone)]
pub struct ReferenceRun {
    state: RefRunState,
    cfg: ReferenceRunConfig,
    /// Direction toward the reference switch.
    approach: Direction,
    /// Start of the current motion phase [ms].
    started_ms: u64,
    /// Half-step counter at the start of the current motion phase.
    started_halfsteps: u64,
    max_distance: u64,
    /// Fault of a stop the supervisor requested itself.
    pending_fault: Option<MotionFault>,
}

impl ReferenceRun {
    pub fn new(cfg: ReferenceRunConfig, approach: Direction) -> Self {
        Self {
            state: RefRunState::FastMotionStart,
            cfg,
            approach,
            started_ms: 0,
            started_halfsteps: 0,
            max_distance: cfg.max_distance as u64,
            pending_fault: None,
        }
    }

    #[inline]
    pub fn state(&self) -> RefRunState {
        self.state
    }

    /// Advance the run by one task tick.
    ///
    /// `code` is the current debounced position code.
    pub fn tick<T: StepTimer + ?Sized>(
        &mut self,
        motor: &mut Motor,
        code: u8,
        now_ms: u64,
        timer: &mut T,
    ) -> RefRunTick {
        let ref_code = self.cfg.ref_position_code;
        match self.state {
            RefRunState::FastMotionStart => {
                if code == ref_code {
                    self.state = RefRunState::ReverseMotionStart;
                    return RefRunTick::InProgress;
                }
                let speed = self.approach_speed(self.cfg.fast_speed);
                if motor.speed_request(speed, self.cfg.fast_profile, code, timer).is_err() {
                    return self.fail(MotionFault::REFRUN_REJECTED);
                }
                self.begin(motor, now_ms, self.cfg.max_distance as u64, RefRunState::FastMotion);
                RefRunTick::InProgress
            }
            RefRunState::FastMotion => {
                self.approach_tick(motor, code, now_ms, RefRunState::ReverseMotionStart)
            }
            RefRunState::ReverseMotionStart => {
                if self.cfg.reverse_distance == 0 || self.cfg.slow_speed == 0 {
                    self.state = RefRunState::Finished;
                    return self.done();
                }
                let target = motor.position() - self.approach.sign() * self.cfg.reverse_distance as i64;
                if motor.position_request(target, self.cfg.fast_profile, code, timer).is_err() {
                    return self.fail(MotionFault::REFRUN_REJECTED);
                }
                self.begin(motor, now_ms, u64::MAX, RefRunState::ReverseMotion);
                RefRunTick::InProgress
            }
            RefRunState::ReverseMotion => {
                if !motor.is_idle() {
                    self.supervise(motor, now_ms);
                    return RefRunTick::InProgress;
                }
                if let Some(fault) = self.stop_fault(motor) {
                    return self.fail(fault);
                }
                if code != 0 {
                    return self.fail(MotionFault::REFRUN_INVALID_LS);
                }
                self.state = RefRunState::SlowMotionStart;
                RefRunTick::InProgress
            }
            RefRunState::SlowMotionStart => {
                let speed = self.approach_speed(self.cfg.slow_speed);
                if motor.speed_request(speed, self.cfg.slow_profile, code, timer).is_err() {
                    return self.fail(MotionFault::REFRUN_REJECTED);
                }
                let limit = 2 * self.cfg.reverse_distance as u64;
                self.begin(motor, now_ms, limit, RefRunState::SlowMotion);
                RefRunTick::InProgress
            }
            RefRunState::SlowMotion => {
                self.approach_tick(motor, code, now_ms, RefRunState::Finished)
            }
            RefRunState::Finished => self.done(),
        }
    }

    fn approach_speed(&self, speed: u32) -> i32 {
        let speed = i32::try_from(speed).unwrap_or(i32::MAX);
        if self.approach.sign() < 0 { -speed } else { speed }
    }

    fn begin(&mut self, motor: &Motor, now_ms: u64, max_distance: u64, next: RefRunState) {
        self.started_ms = now_ms;
        self.started_halfsteps = motor.isr().halfsteps_moved;
        self.max_distance = max_distance;
        self.pending_fault = None;
        self.state = next;
    }

    /// Wait for the motor to stop at the reference switch.
    fn approach_tick(
        &mut self,
        motor: &mut Motor,
        code: u8,
        now_ms: u64,
        next: RefRunState,
    ) -> RefRunTick {
        if !motor.is_idle() {
            self.supervise(motor, now_ms);
            return RefRunTick::InProgress;
        }
        if let Some(fault) = self.stop_fault(motor) {
            return self.fail(fault);
        }
        if code != self.cfg.ref_position_code {
            return self.fail(MotionFault::REFRUN_INVALID_LS);
        }
        self.state = next;
        if next == RefRunState::Finished { self.done() } else { RefRunTick::InProgress }
    }

    /// Stop the motor once the phase exceeds its time or distance.
    fn supervise(&mut self, motor: &mut Motor, now_ms: u64) {
        if self.pending_fault.is_some() {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.started_ms);
        let travelled = motor.isr().halfsteps_moved.wrapping_sub(self.started_halfsteps);
        let fault = if elapsed > self.cfg.timeout_ms as u64 {
            MotionFault::REFRUN_TIMEOUT
        } else if travelled > self.max_distance {
            MotionFault::REFRUN_MAX_DISTANCE
        } else {
            return;
        };
        self.pending_fault = Some(fault);
        motor.stop_motion();
    }

    /// Fault that ended the last motion phase, if any.
    fn stop_fault(&mut self, motor: &Motor) -> Option<MotionFault> {
        self.pending_fault
            .take()
            .or_else(|| Some(motor.isr().fault).filter(|f| !f.is_empty()))
    }

    fn done(&self) -> RefRunTick {
        RefRunTick::Done { position: self.cfg.position_offset as i64 }
    }

    fn fail(&mut self, fault: MotionFault) -> RefRunTick {
        self.state = RefRunState::Finished;
        self.pending_fault = None;
        RefRunTick::Failed(fault)
    }
}
