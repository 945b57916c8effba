//! Configuration model and TOML loading.
//!
//! A motor's configuration arrives either as discrete sub-indexed blocks
//! (assembled by the control crate) or as a single TOML file. Both paths end
//! in a [`ModuleConfig`] that is validated as a batch by
//! [`ModuleConfig::validate`] before first use and is immutable afterwards.
//!
//! # TOML Example
//!
//! ```toml
//! [motor]
//! halfsteps_per_rev = 400
//! profile_count = 1
//!
//! [[profiles]]
//! v_min = 100
//! v_max = 2000
//! acc = 500
//! dec = 500
//! acc_jerk_up_ms = 50
//! acc_jerk_down_ms = 50
//! dec_jerk_up_ms = 50
//! dec_jerk_down_ms = 50
//! microsteps = 32
//! ```

use std::path::Path;

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::consts::{MAX_LIMIT_SWITCHES, MAX_PROFILES, MICROSTEPS_PER_HALFSTEP, POSITION_CODE_COUNT};
use crate::error::ConfigError;
use crate::types::{Direction, RotationLock, StopDirection};

/// Number of register blocks an SPI driver needs.
pub const DRIVER_REGISTER_COUNT: usize = 4;

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

// ─── Limit Switches & Position Codes ────────────────────────────────

/// One limit-switch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSwitchConfig {
    /// Switch is fitted.
    pub exists: bool,
    /// Input is active-low.
    pub inverted: bool,
    /// Consecutive equal samples before a level change is accepted.
    pub debounce_samples: u8,
}

/// Meaning of one position code (combination of limit-switch states).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionCodeConfig {
    /// Code may legitimately occur.
    pub valid: bool,
    /// Movement in this direction halts when the code is reached.
    pub stop: StopDirection,
    /// Directions a new movement may start in at this code.
    pub rotation: RotationLock,
}

// ─── Encoder ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub present: bool,
    /// Encoder ticks per motor revolution.
    pub ticks_per_rev: u32,
    /// Encoder counts against the motor's `Cw` direction.
    pub reversed: bool,
}

// ─── Motor ──────────────────────────────────────────────────────────

/// Motor driver hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DriverType {
    /// Sine-table PWM bridge driven directly by the step generator.
    #[default]
    SinePwm = 0,
    /// Register-configured driver, needs [`DRIVER_REGISTER_COUNT`] register blocks.
    SpiRegister = 1,
}

impl DriverType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SinePwm),
            1 => Some(Self::SpiRegister),
            _ => None,
        }
    }

    /// Number of driver register blocks this driver type requires.
    #[inline]
    pub const fn register_blocks(&self) -> usize {
        match self {
            Self::SinePwm => 0,
            Self::SpiRegister => DRIVER_REGISTER_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Half-steps per motor revolution (motor resolution).
    pub halfsteps_per_rev: u32,
    /// Rotary wraparound span in half-steps, 0 for linear axes.
    pub rotary_span: u32,
    pub driver_type: DriverType,
    /// Number of configured motion profiles.
    pub profile_count: u8,
    /// Lost commutations tolerated before a movement is halted.
    pub step_loss_limit: u16,
    /// Periodic position report interval while moving [ms], 0 = off.
    pub report_interval_ms: u16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            halfsteps_per_rev: 400,
            rotary_span: 0,
            driver_type: DriverType::SinePwm,
            profile_count: 1,
            step_loss_limit: 4,
            report_interval_ms: 0,
        }
    }
}

impl MotorConfig {
    #[inline]
    pub const fn is_rotary(&self) -> bool {
        self.rotary_span != 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.halfsteps_per_rev < 8 {
            return Err(ConfigError::InvalidMotor("halfsteps_per_rev below one commutation"));
        }
        if self.is_rotary() && self.rotary_span < 16 {
            return Err(ConfigError::InvalidMotor("rotary_span too small"));
        }
        if self.profile_count == 0 || self.profile_count as usize > MAX_PROFILES {
            return Err(ConfigError::InvalidMotor("profile_count out of range"));
        }
        Ok(())
    }
}

// ─── Reference Run ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceRunConfig {
    /// Position code of the reference limit switch.
    pub ref_position_code: u8,
    /// Profile used for the fast approach.
    pub fast_profile: u8,
    /// Profile used for the slow approach.
    pub slow_profile: u8,
    /// Per-phase timeout [ms].
    pub timeout_ms: u32,
    /// Fast approach speed [half-steps/s].
    pub fast_speed: u32,
    /// Slow approach speed [half-steps/s], 0 skips the precision approach.
    pub slow_speed: u32,
    /// Maximum fast approach travel [half-steps].
    pub max_distance: u32,
    /// Travel off the switch before the slow approach [half-steps], 0 skips it.
    pub reverse_distance: u32,
    /// Absolute position assigned to the reference point [half-steps].
    pub position_offset: i32,
}

impl Default for ReferenceRunConfig {
    fn default() -> Self {
        Self {
            ref_position_code: 1,
            fast_profile: 0,
            slow_profile: 0,
            timeout_ms: 30_000,
            fast_speed: 500,
            slow_speed: 100,
            max_distance: 100_000,
            reverse_distance: 40,
            position_offset: 0,
        }
    }
}

impl ReferenceRunConfig {
    /// Approach direction toward the reference switch: the single
    /// direction the reference code stops.
    pub fn approach_direction(&self, codes: &[PositionCodeConfig]) -> Option<Direction> {
        codes
            .get(self.ref_position_code as usize)
            .and_then(|c| c.stop.single())
    }
}

// ─── Motion Profile ─────────────────────────────────────────────────

/// S-curve motion profile.
///
/// Speeds in half-steps/s, rates in half-steps/s², jerk durations in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionProfileConfig {
    pub v_min: u32,
    pub v_max: u32,
    pub acc: u32,
    pub dec: u32,
    pub acc_jerk_up_ms: u16,
    pub acc_jerk_down_ms: u16,
    pub dec_jerk_up_ms: u16,
    pub dec_jerk_down_ms: u16,
    /// Micro-steps per half-step (1..=64, power of two).
    pub microsteps: u8,
}

impl Default for MotionProfileConfig {
    fn default() -> Self {
        Self {
            v_min: 100,
            v_max: 2000,
            acc: 500,
            dec: 500,
            acc_jerk_up_ms: 50,
            acc_jerk_down_ms: 50,
            dec_jerk_up_ms: 50,
            dec_jerk_down_ms: 50,
            microsteps: 32,
        }
    }
}

impl MotionProfileConfig {
    /// Internal micro-steps advanced per step interrupt.
    #[inline]
    pub const fn step_width(&self) -> u32 {
        MICROSTEPS_PER_HALFSTEP / self.microsteps as u32
    }

    /// Whether `speed` (absolute) may be commanded with this profile.
    #[inline]
    pub const fn fits_speed(&self, speed: u32) -> bool {
        speed == 0 || (speed >= self.v_min && speed <= self.v_max)
    }

    pub fn validate(&self, index: u8) -> Result<(), ConfigError> {
        let invalid = |reason| ConfigError::InvalidProfile { index, reason };
        if self.v_min == 0 {
            return Err(invalid("v_min must be positive"));
        }
        if self.v_min >= self.v_max {
            return Err(invalid("v_min must be below v_max"));
        }
        if self.acc == 0 || self.dec == 0 {
            return Err(invalid("acc and dec must be positive"));
        }
        if self.microsteps == 0
            || !self.microsteps.is_power_of_two()
            || self.microsteps as u32 > MICROSTEPS_PER_HALFSTEP
        {
            return Err(invalid("microsteps must be a power of two in 1..=64"));
        }
        Ok(())
    }
}

// ─── Module Config ──────────────────────────────────────────────────

/// Complete configuration of one stepper function module.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub limit_switches: [LimitSwitchConfig; MAX_LIMIT_SWITCHES],
    pub position_codes: [PositionCodeConfig; POSITION_CODE_COUNT],
    pub encoder: EncoderConfig,
    pub motor: MotorConfig,
    pub reference_run: ReferenceRunConfig,
    pub profiles: Vec<MotionProfileConfig, MAX_PROFILES>,
    pub driver_registers: Vec<u32, DRIVER_REGISTER_COUNT>,
}

impl ModuleConfig {
    /// Cross-validate all parts.
    ///
    /// # Errors
    ///
    /// The first violated rule, in order: motor, profiles, limit-switch
    /// versus position-code consistency, reference run, encoder, driver.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.motor.validate()?;

        if self.profiles.len() != self.motor.profile_count as usize {
            return Err(ConfigError::InvalidMotor("profile_count does not match profiles"));
        }
        for (i, p) in self.profiles.iter().enumerate() {
            p.validate(i as u8)?;
        }

        self.validate_position_codes()?;
        self.validate_reference_run()?;

        if self.encoder.present && self.encoder.ticks_per_rev == 0 {
            return Err(ConfigError::ValidationError(
                "encoder ticks_per_rev must be positive".to_string(),
            ));
        }
        if self.driver_registers.len() != self.motor.driver_type.register_blocks() {
            return Err(ConfigError::InvalidDriverType(self.motor.driver_type as u8));
        }
        Ok(())
    }

    /// A valid code may only contain bits of switches that exist, and
    /// every switch that exists must appear in at least one valid code.
    fn validate_position_codes(&self) -> Result<(), ConfigError> {
        let fitted: u8 = self
            .limit_switches
            .iter()
            .enumerate()
            .filter(|(_, ls)| ls.exists)
            .fold(0, |mask, (i, _)| mask | (1 << i));

        for (code, pc) in self.position_codes.iter().enumerate() {
            if pc.valid && (code as u8 & !fitted) != 0 {
                return Err(ConfigError::InvalidLimitSwitchCombination { code: code as u8 });
            }
        }
        for bit in 0..MAX_LIMIT_SWITCHES {
            if fitted & (1 << bit) == 0 {
                continue;
            }
            let used = self
                .position_codes
                .iter()
                .enumerate()
                .any(|(code, pc)| pc.valid && code & (1 << bit) != 0);
            if !used {
                return Err(ConfigError::InvalidLimitSwitchCombination { code: 1 << bit });
            }
        }
        if !self.position_codes[0].valid {
            return Err(ConfigError::InvalidLimitSwitchCombination { code: 0 });
        }
        Ok(())
    }

    fn validate_reference_run(&self) -> Result<(), ConfigError> {
        let rr = &self.reference_run;
        let code = rr.ref_position_code as usize;
        if code == 0 || code >= POSITION_CODE_COUNT || !self.position_codes[code].valid {
            return Err(ConfigError::InvalidReferenceRun("reference code not a valid switch code"));
        }
        if rr.approach_direction(&self.position_codes).is_none() {
            return Err(ConfigError::InvalidReferenceRun("reference code must stop one direction"));
        }
        let count = self.profiles.len();
        if rr.fast_profile as usize >= count || rr.slow_profile as usize >= count {
            return Err(ConfigError::InvalidReferenceRun("profile index out of range"));
        }
        if rr.fast_speed == 0 || rr.timeout_ms == 0 || rr.max_distance == 0 {
            return Err(ConfigError::InvalidReferenceRun("fast speed, timeout and distance must be set"));
        }
        if !self.profiles[rr.fast_profile as usize].fits_speed(rr.fast_speed) {
            return Err(ConfigError::InvalidReferenceRun("fast speed unfit for its profile"));
        }
        if rr.slow_speed != 0 && !self.profiles[rr.slow_profile as usize].fits_speed(rr.slow_speed) {
            return Err(ConfigError::InvalidReferenceRun("slow speed unfit for its profile"));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
