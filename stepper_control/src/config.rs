//! Configuration ingestion.
//!
//! A module's configuration arrives as fixed-layout 8-byte blocks, each
//! identified by a sub-index, in any order. [`ConfigBlock::decode`] turns a
//! block into a tagged value; [`ConfigAssembler`] collects them, tracks
//! completeness in a [`ConfigMask`] and cross-validates the result once
//! every expected block is in.
//!
//! ## Block layout (multi-byte fields big-endian)
//!
//! | Sub-index | Block            | Payload                                             |
//! |-----------|------------------|-----------------------------------------------------|
//! | 0..=1     | limit switch     | `exists`, `inverted`, `debounce_samples`            |
//! | 2..=5     | position code    | `valid`, `stop`, `rotation`                         |
//! | 6         | encoder          | `present`, `reversed`, `ticks_per_rev: u32`         |
//! | 7         | motor 1          | `halfsteps_per_rev: u32`, `rotary_span: u32`        |
//! | 8         | motor 2          | `driver_type`, `profile_count`, `step_loss_limit: u16` |
//! | 9         | motor 3          | `report_interval_ms: u16`                           |
//! | 10        | reference run 1  | `code`, `fast_profile`, `slow_profile`, -, `timeout_ms: u32` |
//! | 11        | reference run 2  | `fast_speed: u16`, `slow_speed: u16`, `reverse_distance: u32` |
//! | 12        | reference run 3  | `max_distance: u32`, `position_offset: i32`         |
//! | 13 + 3p   | profile p speeds | `v_min: u32`, `v_max: u32`                          |
//! | 14 + 3p   | profile p rates  | `acc: u32`, `dec: u32`                              |
//! | 15 + 3p   | profile p jerk   | `acc_jerk_ms: u16`, `dec_jerk_ms: u16`, `microsteps`|
//! | 25..=28   | driver register  | `value: u32`                                        |
//!
//! Jerk blocks carry one duration per ramp; it applies to both the up and
//! the down jerk phase. Configurations with differing up and down jerk
//! durations only load from TOML.

use std::path::Path;

use bitflags::bitflags;
use heapless::Vec;
use tracing::debug;

use stepper_common::config::{
    ConfigLoader, DRIVER_REGISTER_COUNT, DriverType, EncoderConfig, LimitSwitchConfig,
    ModuleConfig, MotionProfileConfig, PositionCodeConfig,
};
use stepper_common::consts::{MAX_LIMIT_SWITCHES, MAX_PROFILES, POSITION_CODE_COUNT};
use stepper_common::error::ConfigError;
use stepper_common::types::{RotationLock, StopDirection};

pub const SUB_LIMIT_SWITCH: u8 = 0;
pub const SUB_POSITION_CODE: u8 = SUB_LIMIT_SWITCH + MAX_LIMIT_SWITCHES as u8;
pub const SUB_ENCODER: u8 = SUB_POSITION_CODE + POSITION_CODE_COUNT as u8;
pub const SUB_MOTOR: u8 = SUB_ENCODER + 1;
pub const SUB_REFERENCE_RUN: u8 = SUB_MOTOR + 3;
pub const SUB_PROFILE: u8 = SUB_REFERENCE_RUN + 3;
pub const SUB_DRIVER_REGISTER: u8 = SUB_PROFILE + 3 * MAX_PROFILES as u8;
/// Number of defined sub-indices.
pub const SUB_INDEX_COUNT: u8 = SUB_DRIVER_REGISTER + DRIVER_REGISTER_COUNT as u8;

static_assertions::const_assert!(SUB_INDEX_COUNT as usize <= u32::BITS as usize);

bitflags! {
    /// Received configuration blocks, bit `n` = sub-index `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConfigMask: u32 {
        const LIMIT_SWITCHES   = 0x0000_0003;
        const POSITION_CODES   = 0x0000_003c;
        const ENCODER          = 0x0000_0040;
        const MOTOR            = 0x0000_0380;
        const REFERENCE_RUN    = 0x0000_1c00;
        const PROFILES         = 0x01ff_e000;
        const DRIVER_REGISTERS = 0x1e00_0000;
    }
}

impl ConfigMask {
    /// Blocks every configuration needs, whatever its profiles and driver.
    pub const BASE: Self = Self::from_bits_truncate(
        Self::LIMIT_SWITCHES.bits()
            | Self::POSITION_CODES.bits()
            | Self::ENCODER.bits()
            | Self::MOTOR.bits()
            | Self::REFERENCE_RUN.bits(),
    );

    #[inline]
    pub const fn sub_index(sub_index: u8) -> Self {
        Self::from_bits_retain(1 << (sub_index as u32 % u32::BITS))
    }

    /// The three blocks of profile `index`.
    #[inline]
    pub const fn profile(index: usize) -> Self {
        Self::from_bits_retain(0b111 << (SUB_PROFILE as usize + 3 * index))
    }
}

/// One decoded configuration block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigBlock {
    LimitSwitch { index: u8, cfg: LimitSwitchConfig },
    PositionCode { code: u8, cfg: PositionCodeConfig },
    Encoder(EncoderConfig),
    Motor1 { halfsteps_per_rev: u32, rotary_span: u32 },
    Motor2 { driver_type: DriverType, profile_count: u8, step_loss_limit: u16 },
    Motor3 { report_interval_ms: u16 },
    ReferenceRun1 { ref_position_code: u8, fast_profile: u8, slow_profile: u8, timeout_ms: u32 },
    ReferenceRun2 { fast_speed: u16, slow_speed: u16, reverse_distance: u32 },
    ReferenceRun3 { max_distance: u32, position_offset: i32 },
    ProfileSpeeds { profile: u8, v_min: u32, v_max: u32 },
    ProfileRates { profile: u8, acc: u32, dec: u32 },
    ProfileJerk { profile: u8, acc_jerk_ms: u16, dec_jerk_ms: u16, microsteps: u8 },
    DriverRegister { index: u8, value: u32 },
}

/// Payload reader with bounds checks.
struct Payload<'a> {
    sub_index: u8,
    data: &'a [u8],
}

impl Payload<'_> {
    fn bytes<const N: usize>(&self, at: usize) -> Result<[u8; N], ConfigError> {
        self.data
            .get(at..at + N)
            .and_then(|b| b.try_into().ok())
            .ok_or(ConfigError::PayloadTooShort { sub_index: self.sub_index, len: self.data.len() })
    }

    fn u8(&self, at: usize) -> Result<u8, ConfigError> {
        Ok(self.bytes::<1>(at)?[0])
    }

    fn flag(&self, at: usize) -> Result<bool, ConfigError> {
        Ok(self.u8(at)? != 0)
    }

    fn u16(&self, at: usize) -> Result<u16, ConfigError> {
        Ok(u16::from_be_bytes(self.bytes(at)?))
    }

    fn u32(&self, at: usize) -> Result<u32, ConfigError> {
        Ok(u32::from_be_bytes(self.bytes(at)?))
    }

    fn i32(&self, at: usize) -> Result<i32, ConfigError> {
        Ok(i32::from_be_bytes(self.bytes(at)?))
    }
}

impl ConfigBlock {
    /// Decode the payload of block `sub_index`.
    pub fn decode(sub_index: u8, data: &[u8]) -> Result<Self, ConfigError> {
        let p = Payload { sub_index, data };
        let block = match sub_index {
            s if s < SUB_POSITION_CODE => Self::LimitSwitch {
                index: s - SUB_LIMIT_SWITCH,
                cfg: LimitSwitchConfig {
                    exists: p.flag(0)?,
                    inverted: p.flag(1)?,
                    debounce_samples: p.u8(2)?,
                },
            },
            s if s < SUB_ENCODER => {
                let stop = p.u8(1)?;
                let rotation = p.u8(2)?;
                Self::PositionCode {
                    code: s - SUB_POSITION_CODE,
                    cfg: PositionCodeConfig {
                        valid: p.flag(0)?,
                        stop: StopDirection::from_u8(stop).ok_or_else(|| {
                            ConfigError::ValidationError(format!("invalid stop direction {stop}"))
                        })?,
                        rotation: RotationLock::from_u8(rotation).ok_or_else(|| {
                            ConfigError::ValidationError(format!("invalid rotation lock {rotation}"))
                        })?,
                    },
                }
            }
            SUB_ENCODER => Self::Encoder(EncoderConfig {
                present: p.flag(0)?,
                reversed: p.flag(1)?,
                ticks_per_rev: p.u32(2)?,
            }),
            s if s == SUB_MOTOR => Self::Motor1 { halfsteps_per_rev: p.u32(0)?, rotary_span: p.u32(4)? },
            s if s == SUB_MOTOR + 1 => {
                let driver = p.u8(0)?;
                Self::Motor2 {
                    driver_type: DriverType::from_u8(driver)
                        .ok_or(ConfigError::InvalidDriverType(driver))?,
                    profile_count: p.u8(1)?,
                    step_loss_limit: p.u16(2)?,
                }
            }
            s if s == SUB_MOTOR + 2 => Self::Motor3 { report_interval_ms: p.u16(0)? },
            s if s == SUB_REFERENCE_RUN => Self::ReferenceRun1 {
                ref_position_code: p.u8(0)?,
                fast_profile: p.u8(1)?,
                slow_profile: p.u8(2)?,
                timeout_ms: p.u32(4)?,
            },
            s if s == SUB_REFERENCE_RUN + 1 => Self::ReferenceRun2 {
                fast_speed: p.u16(0)?,
                slow_speed: p.u16(2)?,
                reverse_distance: p.u32(4)?,
            },
            s if s == SUB_REFERENCE_RUN + 2 => Self::ReferenceRun3 {
                max_distance: p.u32(0)?,
                position_offset: p.i32(4)?,
            },
            s if s < SUB_DRIVER_REGISTER => {
                let profile = (s - SUB_PROFILE) / 3;
                match (s - SUB_PROFILE) % 3 {
                    0 => Self::ProfileSpeeds { profile, v_min: p.u32(0)?, v_max: p.u32(4)? },
                    1 => Self::ProfileRates { profile, acc: p.u32(0)?, dec: p.u32(4)? },
                    _ => Self::ProfileJerk {
                        profile,
                        acc_jerk_ms: p.u16(0)?,
                        dec_jerk_ms: p.u16(2)?,
                        microsteps: p.u8(4)?,
                    },
                }
            }
            s if s < SUB_INDEX_COUNT => {
                Self::DriverRegister { index: s - SUB_DRIVER_REGISTER, value: p.u32(0)? }
            }
            s => return Err(ConfigError::UnknownSubIndex(s)),
        };
        Ok(block)
    }

    /// Sub-index this block travels under.
    pub fn sub_index(&self) -> u8 {
        match *self {
            Self::LimitSwitch { index, .. } => SUB_LIMIT_SWITCH + index,
            Self::PositionCode { code, .. } => SUB_POSITION_CODE + code,
            Self::Encoder(_) => SUB_ENCODER,
            Self::Motor1 { .. } => SUB_MOTOR,
            Self::Motor2 { .. } => SUB_MOTOR + 1,
            Self::Motor3 { .. } => SUB_MOTOR + 2,
            Self::ReferenceRun1 { .. } => SUB_REFERENCE_RUN,
            Self::ReferenceRun2 { .. } => SUB_REFERENCE_RUN + 1,
            Self::ReferenceRun3 { .. } => SUB_REFERENCE_RUN + 2,
            Self::ProfileSpeeds { profile, .. } => SUB_PROFILE + 3 * profile,
            Self::ProfileRates { profile, .. } => SUB_PROFILE + 3 * profile + 1,
            Self::ProfileJerk { profile, .. } => SUB_PROFILE + 3 * profile + 2,
            Self::DriverRegister { index, .. } => SUB_DRIVER_REGISTER + index,
        }
    }

    /// Wire payload of this block.
    pub fn encode(&self) -> [u8; 8] {
        let mut b = [0u8; 8];
        let mut put = |at: usize, bytes: &[u8]| b[at..at + bytes.len()].copy_from_slice(bytes);
        match *self {
            Self::LimitSwitch { cfg, .. } => {
                put(0, &[cfg.exists as u8, cfg.inverted as u8, cfg.debounce_samples]);
            }
            Self::PositionCode { cfg, .. } => {
                put(0, &[cfg.valid as u8, cfg.stop as u8, cfg.rotation as u8]);
            }
            Self::Encoder(e) => {
                put(0, &[e.present as u8, e.reversed as u8]);
                put(2, &e.ticks_per_rev.to_be_bytes());
            }
            Self::Motor1 { halfsteps_per_rev, rotary_span } => {
                put(0, &halfsteps_per_rev.to_be_bytes());
                put(4, &rotary_span.to_be_bytes());
            }
            Self::Motor2 { driver_type, profile_count, step_loss_limit } => {
                put(0, &[driver_type as u8, profile_count]);
                put(2, &step_loss_limit.to_be_bytes());
            }
            Self::Motor3 { report_interval_ms } => put(0, &report_interval_ms.to_be_bytes()),
            Self::ReferenceRun1 { ref_position_code, fast_profile, slow_profile, timeout_ms } => {
                put(0, &[ref_position_code, fast_profile, slow_profile]);
                put(4, &timeout_ms.to_be_bytes());
            }
            Self::ReferenceRun2 { fast_speed, slow_speed, reverse_distance } => {
                put(0, &fast_speed.to_be_bytes());
                put(2, &slow_speed.to_be_bytes());
                put(4, &reverse_distance.to_be_bytes());
            }
            Self::ReferenceRun3 { max_distance, position_offset } => {
                put(0, &max_distance.to_be_bytes());
                put(4, &position_offset.to_be_bytes());
            }
            Self::ProfileSpeeds { v_min, v_max, .. } => {
                put(0, &v_min.to_be_bytes());
                put(4, &v_max.to_be_bytes());
            }
            Self::ProfileRates { acc, dec, .. } => {
                put(0, &acc.to_be_bytes());
                put(4, &dec.to_be_bytes());
            }
            Self::ProfileJerk { acc_jerk_ms, dec_jerk_ms, microsteps, .. } => {
                put(0, &acc_jerk_ms.to_be_bytes());
                put(2, &dec_jerk_ms.to_be_bytes());
                put(4, &[microsteps]);
            }
            Self::DriverRegister { value, .. } => put(0, &value.to_be_bytes()),
        }
        b
    }

    /// Blocks describing `cfg`.
    ///
    /// Fails for values the block layout cannot carry: differing up and down
    /// jerk durations, or reference-run speeds beyond 16 bits.
    pub fn from_config(
        cfg: &ModuleConfig,
    ) -> Result<Vec<Self, { SUB_INDEX_COUNT as usize }>, ConfigError> {
        let mut blocks = Vec::new();
        let mut push = |block: Self| {
            let sub_index = block.sub_index();
            blocks
                .push(block)
                .map_err(|_| ConfigError::ValidationError(format!("no room for block {sub_index}")))
        };
        for (i, ls) in cfg.limit_switches.iter().enumerate() {
            push(Self::LimitSwitch { index: i as u8, cfg: *ls })?;
        }
        for (i, pc) in cfg.position_codes.iter().enumerate() {
            push(Self::PositionCode { code: i as u8, cfg: *pc })?;
        }
        push(Self::Encoder(cfg.encoder))?;
        let m = &cfg.motor;
        push(Self::Motor1 { halfsteps_per_rev: m.halfsteps_per_rev, rotary_span: m.rotary_span })?;
        push(Self::Motor2 {
            driver_type: m.driver_type,
            profile_count: m.profile_count,
            step_loss_limit: m.step_loss_limit,
        })?;
        push(Self::Motor3 { report_interval_ms: m.report_interval_ms })?;
        let r = &cfg.reference_run;
        push(Self::ReferenceRun1 {
            ref_position_code: r.ref_position_code,
            fast_profile: r.fast_profile,
            slow_profile: r.slow_profile,
            timeout_ms: r.timeout_ms,
        })?;
        let speed = |v: u32| {
            u16::try_from(v).map_err(|_| ConfigError::InvalidReferenceRun("speed exceeds 16 bits"))
        };
        push(Self::ReferenceRun2 {
            fast_speed: speed(r.fast_speed)?,
            slow_speed: speed(r.slow_speed)?,
            reverse_distance: r.reverse_distance,
        })?;
        push(Self::ReferenceRun3 { max_distance: r.max_distance, position_offset: r.position_offset })?;
        for (i, p) in cfg.profiles.iter().enumerate() {
            let profile = i as u8;
            if p.acc_jerk_up_ms != p.acc_jerk_down_ms || p.dec_jerk_up_ms != p.dec_jerk_down_ms {
                return Err(ConfigError::InvalidProfile {
                    index: profile,
                    reason: "jerk blocks carry one duration per ramp",
                });
            }
            push(Self::ProfileSpeeds { profile, v_min: p.v_min, v_max: p.v_max })?;
            push(Self::ProfileRates { profile, acc: p.acc, dec: p.dec })?;
            push(Self::ProfileJerk {
                profile,
                acc_jerk_ms: p.acc_jerk_up_ms,
                dec_jerk_ms: p.dec_jerk_up_ms,
                microsteps: p.microsteps,
            })?;
        }
        for (i, value) in cfg.driver_registers.iter().enumerate() {
            push(Self::DriverRegister { index: i as u8, value: *value })?;
        }
        Ok(blocks)
    }
}

/// Collects configuration blocks until the configuration is complete.
#[derive(Debug, Clone, Default)]
pub struct ConfigAssembler {
    cfg: ModuleConfig,
    profiles: [MotionProfileConfig; MAX_PROFILES],
    registers: [u32; DRIVER_REGISTER_COUNT],
    received: ConfigMask,
}

impl ConfigAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and store one block. Repeated blocks overwrite earlier ones.
    pub fn ingest(&mut self, sub_index: u8, data: &[u8]) -> Result<(), ConfigError> {
        let block = ConfigBlock::decode(sub_index, data)?;
        self.apply(block);
        Ok(())
    }

    pub fn apply(&mut self, block: ConfigBlock) {
        let cfg = &mut self.cfg;
        match block {
            ConfigBlock::LimitSwitch { index, cfg: ls } => cfg.limit_switches[index as usize] = ls,
            ConfigBlock::PositionCode { code, cfg: pc } => cfg.position_codes[code as usize] = pc,
            ConfigBlock::Encoder(e) => cfg.encoder = e,
            ConfigBlock::Motor1 { halfsteps_per_rev, rotary_span } => {
                cfg.motor.halfsteps_per_rev = halfsteps_per_rev;
                cfg.motor.rotary_span = rotary_span;
            }
            ConfigBlock::Motor2 { driver_type, profile_count, step_loss_limit } => {
                cfg.motor.driver_type = driver_type;
                cfg.motor.profile_count = profile_count;
                cfg.motor.step_loss_limit = step_loss_limit;
            }
            ConfigBlock::Motor3 { report_interval_ms } => cfg.motor.report_interval_ms = report_interval_ms,
            ConfigBlock::ReferenceRun1 { ref_position_code, fast_profile, slow_profile, timeout_ms } => {
                let r = &mut cfg.reference_run;
                r.ref_position_code = ref_position_code;
                r.fast_profile = fast_profile;
                r.slow_profile = slow_profile;
                r.timeout_ms = timeout_ms;
            }
            ConfigBlock::ReferenceRun2 { fast_speed, slow_speed, reverse_distance } => {
                let r = &mut cfg.reference_run;
                r.fast_speed = fast_speed as u32;
                r.slow_speed = slow_speed as u32;
                r.reverse_distance = reverse_distance;
            }
            ConfigBlock::ReferenceRun3 { max_distance, position_offset } => {
                cfg.reference_run.max_distance = max_distance;
                cfg.reference_run.position_offset = position_offset;
            }
            ConfigBlock::ProfileSpeeds { profile, v_min, v_max } => {
                let p = &mut self.profiles[profile as usize];
                p.v_min = v_min;
                p.v_max = v_max;
            }
            ConfigBlock::ProfileRates { profile, acc, dec } => {
                let p = &mut self.profiles[profile as usize];
                p.acc = acc;
                p.dec = dec;
            }
            ConfigBlock::ProfileJerk { profile, acc_jerk_ms, dec_jerk_ms, microsteps } => {
                let p = &mut self.profiles[profile as usize];
                p.acc_jerk_up_ms = acc_jerk_ms;
                p.acc_jerk_down_ms = acc_jerk_ms;
                p.dec_jerk_up_ms = dec_jerk_ms;
                p.dec_jerk_down_ms = dec_jerk_ms;
                p.microsteps = microsteps;
            }
            ConfigBlock::DriverRegister { index, value } => self.registers[index as usize] = value,
        }
        self.received |= ConfigMask::sub_index(block.sub_index());
    }

    #[inline]
    pub fn received(&self) -> ConfigMask {
        self.received
    }

    /// Blocks the configuration needs, given what has been received so far.
    pub fn expected(&self) -> ConfigMask {
        let mut mask = ConfigMask::BASE;
        let count = (self.cfg.motor.profile_count as usize).min(MAX_PROFILES);
        for i in 0..count {
            mask |= ConfigMask::profile(i);
        }
        if self.cfg.motor.driver_type.register_blocks() > 0 {
            mask |= ConfigMask::DRIVER_REGISTERS;
        }
        mask
    }

    #[inline]
    pub fn missing(&self) -> ConfigMask {
        self.expected() - self.received
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// The assembled, validated configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Incomplete`] while blocks are missing, otherwise the
    /// first rule [`ModuleConfig::validate`] finds violated.
    pub fn finish(&self) -> Result<ModuleConfig, ConfigError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ConfigError::Incomplete { missing: missing.bits() });
        }
        let mut cfg = self.cfg.clone();
        let count = (cfg.motor.profile_count as usize).min(MAX_PROFILES);
        cfg.profiles = self.profiles[..count].iter().copied().collect();
        let blocks = cfg.motor.driver_type.register_blocks();
        cfg.driver_registers = self.registers[..blocks].iter().copied().collect();
        cfg.validate()?;
        debug!(
            "Configuration assembled: {} profiles, {:?} driver",
            cfg.profiles.len(),
            cfg.motor.driver_type
        );
        Ok(cfg)
    }
}

/// Load and validate a module configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ModuleConfig, ConfigError> {
    let cfg = ModuleConfig::load(path)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse and validate a module configuration from TOML text.
pub fn load_config_from_str(content: &str) -> Result<ModuleConfig, ConfigError> {
    let cfg: ModuleConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}
