//! Profile table: configured profiles with their precalculated distances.
//!
//! For every profile the table stores, per speed scale `i` (10/10 down to
//! 1/10 of `v_max`), the shortest distance a complete jerk-limited
//! start/stop cycle needs at that speed, together with the jerk-time scale
//! that made it fit. Position moves use it to pick the fastest plan that
//! fits their distance without running the calculator in a loop.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use stepper_common::config::MotionProfileConfig;
use stepper_common::consts::{
    ISR_ENCODER_TIME_LIMIT, ISR_WORST_CASE_COUNTS, MAX_PROFILES, SPEED_SCALE_LEVELS,
    TIMER_COUNTS_PER_SECOND, TIMER_MAX_INTERVAL_COUNTS,
};
use stepper_common::error::ConfigError;

use super::calc::{Cruise, PhasePlan, ProfileError, ProfileShape, calc_phase_data};
use crate::units::{Fx, ceil_halfsteps, fx, step_interval_counts};

/// Minimal start/stop distance at one speed scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceEntry {
    /// Distance [half-steps], `-1` if the scale is unusable.
    pub s: i64,
    /// Jerk-time scale in tenths.
    pub j: u8,
}

impl DistanceEntry {
    pub const UNUSABLE: Self = Self { s: -1, j: 0 };

    #[inline]
    pub const fn is_usable(&self) -> bool {
        self.s >= 0
    }
}

/// Speed and jerk-time scale chosen for a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedScale {
    /// Cruise speed in tenths of `v_max`.
    pub speed: u8,
    /// Jerk durations in tenths of the configured ones.
    pub jerk: u8,
}

/// Precalculated distances, `entries[i - 1]` for speed scale `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceTable {
    entries: [DistanceEntry; SPEED_SCALE_LEVELS],
}

impl DistanceTable {
    /// Entry for speed scale `scale` (1..=10).
    #[inline]
    pub fn entry(&self, scale: u8) -> Option<&DistanceEntry> {
        (scale as usize).checked_sub(1).and_then(|i| self.entries.get(i))
    }

    #[inline]
    pub fn entries(&self) -> &[DistanceEntry; SPEED_SCALE_LEVELS] {
        &self.entries
    }

    /// Fastest usable scale whose start/stop cycle fits into `distance`.
    pub fn select(&self, distance: i64) -> Option<SpeedScale> {
        (1..=SPEED_SCALE_LEVELS as u8).rev().find_map(|scale| {
            let e = self.entry(scale)?;
            (e.is_usable() && e.s <= distance).then_some(SpeedScale { speed: scale, jerk: e.j })
        })
    }
}

/// Cruise speed at `tenths`/10 of `v_max`.
pub fn scaled_speed(cfg: &MotionProfileConfig, tenths: u8) -> Result<Fx, ProfileError> {
    Ok(fx(cfg.v_max as i64 * tenths as i64)?.wrapping_div_int(10))
}

/// Precalculate the distance table of one profile.
///
/// # Errors
///
/// [`ProfileError::Infeasible`] when no jerk scale fits at full speed.
pub fn evaluate_profile(cfg: &MotionProfileConfig) -> Result<DistanceTable, ProfileError> {
    let base = ProfileShape::from_config(cfg)?;
    let v_min = fx(cfg.v_min as i64)?;
    let mut entries = [DistanceEntry::UNUSABLE; SPEED_SCALE_LEVELS];

    for scale in (1..=SPEED_SCALE_LEVELS as u8).rev() {
        let v = scaled_speed(cfg, scale)?;
        if v <= v_min {
            continue;
        }
        let shape = base.with_cruise(v);
        for jerk in (1..=10u8).rev() {
            match calc_phase_data(Cruise::Distance(Fx::ZERO), &shape.with_jerk_scale(jerk)) {
                Ok(plan) if !plan.constant_acceleration_fallback => {
                    entries[scale as usize - 1] = DistanceEntry {
                        s: ceil_halfsteps(plan.total_distance()),
                        j: jerk,
                    };
                    break;
                }
                Ok(_) | Err(ProfileError::Infeasible) => {}
                Err(e) => return Err(e),
            }
        }
    }

    if !entries[SPEED_SCALE_LEVELS - 1].is_usable() {
        return Err(ProfileError::Infeasible);
    }
    Ok(DistanceTable { entries })
}

/// Hardware limits of the step timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerTiming {
    pub counts_per_second: u32,
    /// Longest interval the compare channel can represent.
    pub max_interval_counts: u32,
    /// Measured worst-case ISR execution time.
    pub isr_worst_case_counts: u32,
    /// Shortest interval that still allows an encoder read.
    pub encoder_time_limit_counts: u32,
}

impl Default for TimerTiming {
    fn default() -> Self {
        Self {
            counts_per_second: TIMER_COUNTS_PER_SECOND,
            max_interval_counts: TIMER_MAX_INTERVAL_COUNTS,
            isr_worst_case_counts: ISR_WORST_CASE_COUNTS,
            encoder_time_limit_counts: ISR_ENCODER_TIME_LIMIT,
        }
    }
}

/// Check every profile's speed range against the timer limits.
///
/// # Errors
///
/// [`ConfigError::ProfileVminTooSlow`] if `v_min` needs a longer interval
/// than the timer can count, [`ConfigError::ProfileVmaxTooFast`] if `v_max`
/// needs a shorter interval than the ISR takes.
pub fn check_profiles_timing(
    profiles: &[MotionProfileConfig],
    timing: &TimerTiming,
) -> Result<(), ConfigError> {
    for (index, p) in profiles.iter().enumerate() {
        let index = index as u8;
        let width = p.step_width();
        let slowest = Fx::checked_from_num(p.v_min).unwrap_or(Fx::MAX);
        let fastest = Fx::checked_from_num(p.v_max).unwrap_or(Fx::MAX);
        if step_interval_counts(width, timing.counts_per_second, slowest) > timing.max_interval_counts {
            return Err(ConfigError::ProfileVminTooSlow { index });
        }
        if step_interval_counts(width, timing.counts_per_second, fastest) < timing.isr_worst_case_counts {
            return Err(ConfigError::ProfileVmaxTooFast { index });
        }
    }
    Ok(())
}

/// One configured profile with its precalculated distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileEntry {
    pub config: MotionProfileConfig,
    pub distances: DistanceTable,
    pub v_min: Fx,
    pub v_max: Fx,
}

impl ProfileEntry {
    /// Full-scale shape of this profile.
    pub fn shape(&self) -> Result<ProfileShape, ProfileError> {
        ProfileShape::from_config(&self.config)
    }

    /// Plan a position move of `distance` half-steps (positive).
    ///
    /// Picks the fastest precalculated scale that fits and gives the rest of
    /// the distance to the cruise phase. Distances shorter than every usable
    /// scale creep at `v_min`.
    pub fn plan_distance(&self, distance: i64) -> Result<PhasePlan, ProfileError> {
        let total = fx(distance)?;
        let shape = self.shape()?;
        let Some(scale) = self.distances.select(distance) else {
            return creep_plan(&shape, total);
        };
        let shape = shape
            .with_cruise(scaled_speed(&self.config, scale.speed)?)
            .with_jerk_scale(scale.jerk);
        let base = calc_phase_data(Cruise::Distance(Fx::ZERO), &shape)?;
        let rest = total.saturating_sub(base.total_distance()).max(Fx::ZERO);
        calc_phase_data(Cruise::Distance(rest), &shape)
    }
}

/// Whole distance as cruise at `v_min`.
fn creep_plan(shape: &ProfileShape, distance: Fx) -> Result<PhasePlan, ProfileError> {
    let creep = ProfileShape {
        v_cruise: shape.v_start,
        run_up: false,
        run_down: false,
        ..*shape
    };
    calc_phase_data(Cruise::Distance(distance), &creep)
}

/// All profiles of one motor.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    profiles: Vec<ProfileEntry, MAX_PROFILES>,
}

impl ProfileTable {
    /// Evaluate every profile.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ProfileInfeasible`] naming the first profile that cannot
    /// run at its full speed.
    pub fn new(configs: &[MotionProfileConfig]) -> Result<Self, ConfigError> {
        let mut profiles = Vec::new();
        for (index, config) in configs.iter().enumerate() {
            let index = index as u8;
            let infeasible = ConfigError::ProfileInfeasible { index };
            let distances = evaluate_profile(config).map_err(|_| infeasible.clone())?;
            let entry = ProfileEntry {
                config: *config,
                distances,
                v_min: fx(config.v_min as i64).map_err(|_| infeasible.clone())?,
                v_max: fx(config.v_max as i64).map_err(|_| infeasible)?,
            };
            profiles
                .push(entry)
                .map_err(|_| ConfigError::InvalidMotor("too many profiles"))?;
        }
        Ok(Self { profiles })
    }

    #[inline]
    pub fn get(&self, index: u8) -> Option<&ProfileEntry> {
        self.profiles.get(index as usize)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
