//! Prelude module for common re-exports.
//!
//! ```rust
//! use stepper_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigLoader, DriverType, EncoderConfig, LimitSwitchConfig, LogLevel, ModuleConfig,
    MotionProfileConfig, MotorConfig, PositionCodeConfig, ReferenceRunConfig,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{ConfigError, FatalError, MotionFault, RequestError, StoreError};

// ─── Hardware ───────────────────────────────────────────────────────
pub use crate::hal::{
    EncoderInput, InterruptFlags, IsrHardware, LifeCycleCounters, LifeCycleStore,
    LimitSwitchInput, MotorDriver, StatusReporter, StepTimer, TaskHardware,
};

// ─── Reports & Types ────────────────────────────────────────────────
pub use crate::report::{Ack, Report};
pub use crate::types::{Direction, RotationLock, StopDirection};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_MOTORS, MAX_PROFILES, MICROSTEPS_PER_HALFSTEP};
