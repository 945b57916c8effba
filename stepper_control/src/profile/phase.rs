//! Movement phases and per-phase kinematic parameters.

use crate::units::{Fx, PHASE_INFINITE};

/// Number of movement phases of one S-curve parameter set.
pub const PHASE_COUNT: usize = 9;

/// Named movement phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Phase {
    /// Run-up at start speed.
    #[default]
    Start = 0,
    AccJerkUp = 1,
    AccConst = 2,
    AccJerkDown = 3,
    /// Cruise at constant velocity.
    VelConst = 4,
    DecJerkUp = 5,
    DecConst = 6,
    DecJerkDown = 7,
    /// Run-down at end speed.
    End = 8,
}

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::Start,
        Phase::AccJerkUp,
        Phase::AccConst,
        Phase::AccJerkDown,
        Phase::VelConst,
        Phase::DecJerkUp,
        Phase::DecConst,
        Phase::DecJerkDown,
        Phase::End,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < PHASE_COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Following phase, `None` after [`Phase::End`].
    #[inline]
    pub const fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }
}

/// Kinematic state at the start of a phase plus its jerk and duration.
///
/// `s` is relative to the start of the parameter set. `dt == 0` skips the
/// phase, `dt == PHASE_INFINITE` holds it indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseParam {
    pub s: Fx,
    pub v: Fx,
    pub a: Fx,
    pub j: Fx,
    pub dt: Fx,
}

impl PhaseParam {
    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.dt == Fx::ZERO
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.dt == PHASE_INFINITE
    }
}
