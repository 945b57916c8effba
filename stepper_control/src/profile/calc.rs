//! Profile calculator.
//!
//! Builds the nine phases of one S-curve movement:
//!
//! ```text
//! v
//! ^        ___________________
//! |      /|         4         |\
//! |    /  |                   |  \
//! |  1 2 3|                   |5 6 7
//! |_/     |                   |     \_
//! |0                                 8
//! +------------------------------------> t
//! ```
//!
//! Phase 0 runs up one half-step at the start speed, phases 1..3 ramp to the
//! cruise speed (jerk up, constant acceleration, jerk down), phase 4 cruises
//! for the requested distance, phases 5..7 ramp to the end speed and phase 8
//! runs down one half-step.
//!
//! When a ramp is too short for its jerk phases the calculator falls back to
//! a pure constant-acceleration ramp for that block and flags the plan.

use stepper_common::config::MotionProfileConfig;
use thiserror::Error;

use super::phase::{PHASE_COUNT, Phase, PhaseParam};
use crate::units::{Fx, Kinematics, Overflow, PHASE_INFINITE, advance, fx, ms_to_secs};

/// Profile calculation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// Speeds or rates make the movement impossible.
    #[error("profile not achievable")]
    Infeasible,
    #[error(transparent)]
    Overflow(#[from] Overflow),
}

/// Up and down durations of one jerk-limited ramp [s].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JerkTimes {
    pub up: Fx,
    pub down: Fx,
}

impl JerkTimes {
    #[inline]
    fn total(&self) -> Result<Fx, Overflow> {
        self.up.checked_add(self.down).ok_or(Overflow)
    }

    /// Durations scaled to `tenths`/10.
    fn scaled(&self, tenths: u8) -> Self {
        let scale = |t: Fx| t.saturating_mul_int(tenths as i64).wrapping_div_int(10);
        Self { up: scale(self.up), down: scale(self.down) }
    }
}

/// Speeds and rates of one movement in calculator units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileShape {
    pub v_start: Fx,
    pub v_cruise: Fx,
    pub v_end: Fx,
    pub acc: Fx,
    pub dec: Fx,
    pub acc_jerk: JerkTimes,
    pub dec_jerk: JerkTimes,
    /// Run phase 0.
    pub run_up: bool,
    /// Run phase 8.
    pub run_down: bool,
}

impl ProfileShape {
    /// Full-speed movement from `v_min` to `v_max` and back.
    pub fn from_config(cfg: &MotionProfileConfig) -> Result<Self, ProfileError> {
        let v_min = fx(cfg.v_min as i64)?;
        Ok(Self {
            v_start: v_min,
            v_cruise: fx(cfg.v_max as i64)?,
            v_end: v_min,
            acc: fx(cfg.acc as i64)?,
            dec: fx(cfg.dec as i64)?,
            acc_jerk: JerkTimes {
                up: ms_to_secs(cfg.acc_jerk_up_ms),
                down: ms_to_secs(cfg.acc_jerk_down_ms),
            },
            dec_jerk: JerkTimes {
                up: ms_to_secs(cfg.dec_jerk_up_ms),
                down: ms_to_secs(cfg.dec_jerk_down_ms),
            },
            run_up: true,
            run_down: true,
        })
    }

    #[must_use]
    pub fn with_cruise(mut self, v_cruise: Fx) -> Self {
        self.v_cruise = v_cruise;
        self
    }

    /// Jerk durations scaled to `tenths`/10.
    #[must_use]
    pub fn with_jerk_scale(mut self, tenths: u8) -> Self {
        self.acc_jerk = self.acc_jerk.scaled(tenths);
        self.dec_jerk = self.dec_jerk.scaled(tenths);
        self
    }
}

/// Length of the cruise phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cruise {
    /// Cruise for this many half-steps, zero skips the phase.
    Distance(Fx),
    /// Hold the cruise speed until told otherwise.
    Infinite,
}

/// Result of [`calc_phase_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    pub phases: [PhaseParam; PHASE_COUNT],
    /// Kinematics after phase 8. With an infinite cruise the cruise
    /// distance is not included.
    pub end: Kinematics,
    /// At least one ramp lost its jerk phases.
    pub constant_acceleration_fallback: bool,
}

impl PhasePlan {
    #[inline]
    pub fn phase(&self, phase: Phase) -> &PhaseParam {
        &self.phases[phase.index()]
    }

    /// Distance covered by the whole plan [half-steps].
    #[inline]
    pub fn total_distance(&self) -> Fx {
        self.end.s
    }
}

/// Compute the phase data of one movement.
///
/// # Errors
///
/// [`ProfileError::Infeasible`] for non-positive speeds, zero rates or a
/// negative cruise distance, [`ProfileError::Overflow`] if any intermediate
/// leaves the Q32.32 range.
pub fn calc_phase_data(cruise: Cruise, shape: &ProfileShape) -> Result<PhasePlan, ProfileError> {
    if shape.v_start <= Fx::ZERO || shape.v_cruise <= Fx::ZERO || shape.v_end <= Fx::ZERO {
        return Err(ProfileError::Infeasible);
    }

    let mut phases = [PhaseParam::default(); PHASE_COUNT];
    let mut k = Kinematics { s: Fx::ZERO, v: shape.v_start, a: Fx::ZERO };
    let mut fallback = false;

    run_halfstep(&mut k, &mut phases[Phase::Start.index()], shape.run_up)?;

    fallback |= ramp(&mut k, &mut phases[1..4], shape.v_cruise, shape)?;

    let cruise_param = &mut phases[Phase::VelConst.index()];
    *cruise_param = PhaseParam { s: k.s, v: k.v, ..PhaseParam::default() };
    match cruise {
        Cruise::Infinite => cruise_param.dt = PHASE_INFINITE,
        Cruise::Distance(d) if d < Fx::ZERO => return Err(ProfileError::Infeasible),
        Cruise::Distance(d) if d > Fx::ZERO => {
            cruise_param.dt = d.checked_div(k.v).ok_or(Overflow)?;
            k.s = k.s.checked_add(d).ok_or(Overflow)?;
        }
        Cruise::Distance(_) => {}
    }

    fallback |= ramp(&mut k, &mut phases[5..8], shape.v_end, shape)?;

    run_halfstep(&mut k, &mut phases[Phase::End.index()], shape.run_down)?;

    Ok(PhasePlan { phases, end: k, constant_acceleration_fallback: fallback })
}

/// One half-step at the current speed.
fn run_halfstep(k: &mut Kinematics, param: &mut PhaseParam, enabled: bool) -> Result<(), ProfileError> {
    *param = PhaseParam { s: k.s, v: k.v, ..PhaseParam::default() };
    if enabled {
        param.dt = Fx::ONE.checked_div(k.v).ok_or(Overflow)?;
        k.s = k.s.checked_add(Fx::ONE).ok_or(Overflow)?;
    }
    Ok(())
}

/// Fill a three-phase ramp block from `k.v` to `v_to`. Returns whether the
/// block fell back to constant acceleration.
fn ramp(
    k: &mut Kinematics,
    block: &mut [PhaseParam],
    v_to: Fx,
    shape: &ProfileShape,
) -> Result<bool, ProfileError> {
    let dv = v_to.checked_sub(k.v).ok_or(Overflow)?;
    for p in block.iter_mut() {
        *p = PhaseParam { s: k.s, v: k.v, ..PhaseParam::default() };
    }
    if dv == Fx::ZERO {
        return Ok(false);
    }

    let (rate, jerk) = if dv > Fx::ZERO {
        (shape.acc, shape.acc_jerk)
    } else {
        (shape.dec, shape.dec_jerk)
    };
    if rate <= Fx::ZERO {
        return Err(ProfileError::Infeasible);
    }
    let sign: i64 = if dv > Fx::ZERO { 1 } else { -1 };
    let magnitude = dv.checked_abs().ok_or(Overflow)?;
    let signed_rate = rate.checked_mul_int(sign).ok_or(Overflow)?;

    let jerk_total = jerk.total()?;
    let dv_jerk = rate.checked_mul(jerk_total).ok_or(Overflow)?.checked_div_int(2).ok_or(Overflow)?;
    let use_jerk = jerk_total > Fx::ZERO && dv_jerk <= magnitude;

    let (j_up, dt_up, dt_const, j_down, dt_down) = if use_jerk {
        let j_up = if jerk.up > Fx::ZERO {
            signed_rate.checked_div(jerk.up).ok_or(Overflow)?
        } else {
            Fx::ZERO
        };
        let j_down = if jerk.down > Fx::ZERO {
            signed_rate.checked_div(jerk.down).ok_or(Overflow)?.checked_neg().ok_or(Overflow)?
        } else {
            Fx::ZERO
        };
        let dt_const = magnitude.checked_sub(dv_jerk).ok_or(Overflow)?.checked_div(rate).ok_or(Overflow)?;
        (j_up, jerk.up, dt_const, j_down, jerk.down)
    } else {
        let dt_const = magnitude.checked_div(rate).ok_or(Overflow)?;
        (Fx::ZERO, Fx::ZERO, dt_const, Fx::ZERO, Fx::ZERO)
    };

    // Jerk up: acceleration 0 -> rate.
    block[0] = PhaseParam { s: k.s, v: k.v, a: Fx::ZERO, j: j_up, dt: dt_up };
    if dt_up > Fx::ZERO {
        *k = advance(*k, j_up, dt_up)?;
    }
    k.a = signed_rate;

    block[1] = PhaseParam { s: k.s, v: k.v, a: k.a, j: Fx::ZERO, dt: dt_const };
    if dt_const > Fx::ZERO {
        *k = advance(*k, Fx::ZERO, dt_const)?;
    }

    // Jerk down: acceleration rate -> 0.
    block[2] = PhaseParam { s: k.s, v: k.v, a: k.a, j: j_down, dt: dt_down };
    if dt_down > Fx::ZERO {
        *k = advance(*k, j_down, dt_down)?;
    }
    k.a = Fx::ZERO;
    k.v = v_to;

    Ok(jerk_total > Fx::ZERO && !use_jerk)
}
