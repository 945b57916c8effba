//! Error taxonomy for the stepper motion core.
//!
//! - [`ConfigError`]: configuration errors, detected once at enable-time.
//! - [`RequestError`]: synchronous request rejection, no state change.
//! - [`MotionFault`]: runtime motion errors (bitflags), always resolved by
//!   halting the movement and reporting a negative acknowledgement.
//! - [`FatalError`]: shared-timer faults that stop all motors.

use bitflags::bitflags;
use thiserror::Error;

/// Configuration loading, ingestion and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Not every expected configuration block has been received.
    #[error("configuration incomplete, missing blocks 0x{missing:08x}")]
    Incomplete { missing: u32 },

    /// Sub-index does not name any known configuration block.
    #[error("unknown configuration sub-index {0}")]
    UnknownSubIndex(u8),

    /// Payload shorter than the block layout requires.
    #[error("configuration block {sub_index} too short: {len} bytes")]
    PayloadTooShort { sub_index: u8, len: usize },

    /// Motor driver type is not supported.
    #[error("invalid driver type {0}")]
    InvalidDriverType(u8),

    /// A valid position code requires a limit switch that does not exist.
    #[error("position code {code} conflicts with limit-switch configuration")]
    InvalidLimitSwitchCombination { code: u8 },

    /// Profile parameters violate their invariants.
    #[error("profile {index} invalid: {reason}")]
    InvalidProfile { index: u8, reason: &'static str },

    /// Profile cannot perform a full cycle at its maximum speed.
    #[error("profile {index} cannot reach its maximum speed")]
    ProfileInfeasible { index: u8 },

    /// `vMin` needs a step interval longer than the timer can count.
    #[error("profile {index}: vMin needs a step interval longer than the timer can count")]
    ProfileVminTooSlow { index: u8 },

    /// `vMax` needs a step interval shorter than the ISR execution time.
    #[error("profile {index}: vMax needs a step interval shorter than the ISR execution time")]
    ProfileVmaxTooFast { index: u8 },

    /// Reference-run parameters are inconsistent.
    #[error("reference run configuration invalid: {0}")]
    InvalidReferenceRun(&'static str),

    /// Motor parameters are inconsistent.
    #[error("motor configuration invalid: {0}")]
    InvalidMotor(&'static str),
}

/// Synchronous rejection of a motion request.
///
/// Returned before any parameter set or motion state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Module has not been configured and enabled.
    #[error("module not configured")]
    NotConfigured,

    /// Position requests need a completed reference run.
    #[error("axis not referenced")]
    NotReferenced,

    /// A conflicting movement is in flight.
    #[error("motor busy")]
    Busy,

    /// A parameter-set switch is already queued.
    #[error("parameter-set switch already pending")]
    SwitchPending,

    /// Requested speed is outside the profile's `[vMin, vMax]`.
    #[error("motion profile {profile} unfit for speed {speed}")]
    ProfileUnfit { speed: i32, profile: u8 },

    /// Profile index not configured.
    #[error("unknown motion profile {0}")]
    UnknownProfile(u8),

    /// Rotation direction is locked out at the current position code.
    #[error("rotation direction not allowed at position code {code}")]
    DirectionNotAllowed { code: u8 },

    /// Current position code is not a valid one.
    #[error("invalid position code {0}")]
    InvalidPositionCode(u8),

    /// Operation only applies to rotary axes.
    #[error("axis is not rotary")]
    NotRotary,

    /// Operation needs the motor to run at constant speed.
    #[error("motor not at constant speed")]
    NotAtSpeed,

    /// Trajectory could not be planned.
    #[error("movement not plannable with this profile")]
    PlanningFailed,
}

bitflags! {
    /// Runtime motion faults.
    ///
    /// Faults in `REINIT_MASK` drop the owning module back to `Init`:
    /// position truth is no longer trustworthy and a reference run is needed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MotionFault: u16 {
        /// Reference run exceeded its timeout. **REINIT**.
        const REFRUN_TIMEOUT       = 0x0001;
        /// Reference run exceeded its maximum distance. **REINIT**.
        const REFRUN_MAX_DISTANCE  = 0x0002;
        /// Reference run stopped at the wrong limit switch. **REINIT**.
        const REFRUN_INVALID_LS    = 0x0004;
        /// Invalid position code sampled. **REINIT**.
        const INVALID_POSCODE      = 0x0008;
        /// Step-loss count exceeded its error limit.
        const STEP_LOSS_LIMIT      = 0x0010;
        /// Encoder deviation exceeded the motor resolution.
        const DEVIATION_LIMIT      = 0x0020;
        /// Motion stopped at an off-limit position. **REINIT**.
        const STOP_BY_OFFLIMIT     = 0x0040;
        /// A motion request issued by the reference run was rejected. **REINIT**.
        const REFRUN_REJECTED      = 0x0080;
    }
}

impl MotionFault {
    /// Mask of all faults that force the module back to `Init`.
    pub const REINIT_MASK: Self = Self::from_bits_truncate(
        Self::REFRUN_TIMEOUT.bits()
            | Self::REFRUN_MAX_DISTANCE.bits()
            | Self::REFRUN_INVALID_LS.bits()
            | Self::INVALID_POSCODE.bits()
            | Self::STOP_BY_OFFLIMIT.bits()
            | Self::REFRUN_REJECTED.bits(),
    );

    /// Returns true if any fault requires a new reference run.
    #[inline]
    pub const fn requires_reinit(&self) -> bool {
        self.intersects(Self::REINIT_MASK)
    }
}

impl Default for MotionFault {
    fn default() -> Self {
        Self::empty()
    }
}

/// Hard faults of the shared step timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    /// Interrupt flags match no known motor instance.
    #[error("step timer overload, unidentified interrupt flags 0x{flags:02x}")]
    TimerOverload { flags: u8 },
}

/// Non-volatile store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Writing the counters failed.
    #[error("life-cycle store write failed: {0}")]
    WriteFailed(String),
}
