//! Motion state, split along the ISR/task boundary.
//!
//! [`IsrState`] is written only by the step generator while a movement
//! runs; the planner initialises it while the motor is idle and the timer
//! channel is disabled. [`Requests`] is the mailbox the task loop writes and
//! the step generator consumes at half-step boundaries.

use bitflags::bitflags;
use stepper_common::config::PositionCodeConfig;
use stepper_common::error::MotionFault;
use stepper_common::types::{Direction, StopDirection};

use super::encoder::EncoderStepLossState;
use super::params::ParamSetSwitch;
use crate::profile::Phase;
use crate::units::Fx;

/// Exactly one of these holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Idle,
    Position,
    Speed,
}

/// Stop condition derived from the current position code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StopRequest {
    #[default]
    None = 0,
    StopIfCw = 1,
    StopIfCcw = 2,
    /// Position code is invalid.
    StopIfOffLimit = 3,
    Unconditional = 4,
}

impl StopRequest {
    /// Stop condition of a sampled position code.
    pub fn from_code(code: Option<&PositionCodeConfig>) -> Self {
        match code {
            Some(pc) if pc.valid => match pc.stop {
                StopDirection::None => Self::None,
                StopDirection::Cw => Self::StopIfCw,
                StopDirection::Ccw => Self::StopIfCcw,
                StopDirection::Both => Self::Unconditional,
            },
            _ => Self::StopIfOffLimit,
        }
    }

    /// Whether a movement in `dir` must halt.
    #[inline]
    pub const fn applies(&self, dir: Direction) -> bool {
        matches!(
            (self, dir),
            (Self::StopIfCw, Direction::Cw)
                | (Self::StopIfCcw, Direction::Ccw)
                | (Self::StopIfOffLimit, _)
                | (Self::Unconditional, _)
        )
    }

    /// Fault reported when this request halts a movement.
    #[inline]
    pub const fn fault(&self) -> Option<MotionFault> {
        match self {
            Self::StopIfOffLimit => Some(MotionFault::STOP_BY_OFFLIMIT),
            _ => None,
        }
    }
}

bitflags! {
    /// Terminal conditions raised by the step generator, consumed by the task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MotionEvents: u8 {
        /// `AtTargetPosition`.
        const TARGET_POSITION = 0x01;
        /// `AtTargetSpeed`: cruise reached, or stopped after a speed-0 request.
        const TARGET_SPEED    = 0x02;
        /// Halted by a stop condition or a fault.
        const HALTED          = 0x04;
    }
}

/// State owned by the step generator.
#[derive(Debug, Clone, Default)]
pub struct IsrState {
    pub state: MotionState,
    /// Index of the active parameter set.
    pub active: u8,
    pub phase: Phase,
    /// Last phase done in position mode, holding its end speed.
    pub hold: bool,
    /// Time elapsed in the current phase [s].
    pub t: Fx,
    /// Nominal speed [half-steps/s].
    pub v: Fx,
    pub direction: Direction,
    pub step_width: u32,
    /// Nominal position in internal micro-steps.
    pub micro_pos: i64,
    /// Absolute half-step position, wrapped on rotary axes.
    pub abs_pos: i64,
    /// Driver sine-table index.
    pub sin_index: u16,
    /// Last programmed timer compare value.
    pub compare: u16,
    /// Nominal half-steps moved since start-up.
    pub halfsteps_moved: u64,
    pub encoder: EncoderStepLossState,
    pub events: MotionEvents,
    /// Fault of the last halt, empty for a plain stop.
    pub fault: MotionFault,
}

/// Requests written by the task loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Requests {
    /// Stop condition of the current position code.
    pub limit_stop: StopRequest,
    /// `StopMotion` issued.
    pub user_stop: bool,
    /// Queued parameter-set switch, at most one.
    pub pending_switch: Option<ParamSetSwitch>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepper_common::types::RotationLock;

    fn code(valid: bool, stop: StopDirection) -> PositionCodeConfig {
        PositionCodeConfig { valid, stop, rotation: RotationLock::Both }
    }

    #[test]
    fn stop_request_from_code() {
        assert_eq!(StopRequest::from_code(Some(&code(true, StopDirection::None))), StopRequest::None);
        assert_eq!(StopRequest::from_code(Some(&code(true, StopDirection::Cw))), StopRequest::StopIfCw);
        assert_eq!(
            StopRequest::from_code(Some(&code(true, StopDirection::Both))),
            StopRequest::Unconditional
        );
        assert_eq!(
            StopRequest::from_code(Some(&code(false, StopDirection::None))),
            StopRequest::StopIfOffLimit
        );
        assert_eq!(StopRequest::from_code(None), StopRequest::StopIfOffLimit);
    }

    #[test]
    fn stop_request_direction() {
        assert!(StopRequest::StopIfCw.applies(Direction::Cw));
        assert!(!StopRequest::StopIfCw.applies(Direction::Ccw));
        assert!(StopRequest::StopIfOffLimit.applies(Direction::Ccw));
        assert!(!StopRequest::None.applies(Direction::Cw));
        assert_eq!(StopRequest::StopIfOffLimit.fault(), Some(MotionFault::STOP_BY_OFFLIMIT));
        assert_eq!(StopRequest::Unconditional.fault(), None);
    }
}
