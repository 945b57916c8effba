//! System-wide constants for the stepper workspace.
//!
//! Single source of truth for table sizes and hardware limits.
//! Imported by all crates, never duplicated.

use static_assertions::const_assert;

/// Maximum number of motor instances sharing one step timer.
pub const MAX_MOTORS: usize = 4;

/// Maximum number of motion profiles per motor.
pub const MAX_PROFILES: usize = 4;

/// Number of limit-switch inputs per motor.
pub const MAX_LIMIT_SWITCHES: usize = 2;

/// Number of position codes (`2^MAX_LIMIT_SWITCHES`).
pub const POSITION_CODE_COUNT: usize = 1 << MAX_LIMIT_SWITCHES;

/// Internal micro-step resolution of one half-step.
pub const MICROSTEPS_PER_HALFSTEP: u32 = 64;

/// Half-steps per electrical cycle (one full commutation).
pub const HALFSTEPS_PER_COMMUTATION: i64 = 8;

/// Length of the driver sine table in micro-step indices.
pub const SINE_TABLE_LEN: u16 = (HALFSTEPS_PER_COMMUTATION as u16) * (MICROSTEPS_PER_HALFSTEP as u16);

/// Number of speed scale levels in the precalculated distance table.
pub const SPEED_SCALE_LEVELS: usize = 10;

/// Default step timer count rate [counts/s].
pub const TIMER_COUNTS_PER_SECOND: u32 = 1_000_000;

/// Longest interval a 16-bit compare channel can represent [counts].
pub const TIMER_MAX_INTERVAL_COUNTS: u32 = u16::MAX as u32;

/// Default worst-case ISR execution time [counts].
pub const ISR_WORST_CASE_COUNTS: u32 = 8;

/// Minimum step interval that still leaves time for an encoder read [counts].
pub const ISR_ENCODER_TIME_LIMIT: u32 = 20;

/// Life-cycle counters are flushed to non-volatile storage at this interval [ms].
pub const LIFECYCLE_FLUSH_INTERVAL_MS: u64 = 600_000;

/// Default task-loop period [ms].
pub const TASK_PERIOD_MS: u64 = 1;

const_assert!(MAX_MOTORS <= 8);
const_assert!(MAX_PROFILES > 0);
const_assert!(MICROSTEPS_PER_HALFSTEP.is_power_of_two());
const_assert!(SINE_TABLE_LEN as u32 == 8 * MICROSTEPS_PER_HALFSTEP);
