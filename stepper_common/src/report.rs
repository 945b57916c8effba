//! Outbound report types.
//!
//! The wire layout is the reporter's business; the core only decides
//! which event happened and with which payload.

use crate::error::MotionFault;

/// Positive or negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ack,
    Nack(MotionFault),
}

impl Ack {
    #[inline]
    pub const fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}

/// One outbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// Current position, on request or periodically while moving.
    Position { position: i64, position_code: u8 },
    /// Current nominal speed [half-steps/s], signed by direction.
    Speed { speed: i32 },
    /// A position movement ended.
    MovementDone { position: i64, position_code: u8, ack: Ack },
    /// A speed request reached its target speed (0 = stopped).
    SpeedReached { speed: i32, position: i64, ack: Ack },
    /// A movement was halted by a stop condition.
    Stopped { position: i64, position_code: u8, ack: Ack },
    /// A reference run ended.
    ReferenceRunDone { position: i64, ack: Ack },
    /// A fault was detected outside a movement.
    Fault { fault: MotionFault, position_code: u8 },
}
