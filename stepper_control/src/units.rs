//! Fixed-point numeric model.
//!
//! All kinematic magnitudes are Q32.32 ([`Fx`]) over half-steps and
//! seconds: positions in half-steps, speeds in half-steps/s, rates in
//! half-steps/s², jerks in half-steps/s³, times in seconds.
//!
//! The calculator path is overflow-checked and reports [`Overflow`]; the ISR
//! path saturates. Timer conversions are exact integer arithmetic on the raw
//! Q32.32 bits with 128-bit intermediates.

use fixed::types::I32F32;
use stepper_common::consts::MICROSTEPS_PER_HALFSTEP;
use thiserror::Error;

/// Q32.32 fixed point.
pub type Fx = I32F32;

/// Phase duration meaning "hold indefinitely".
pub const PHASE_INFINITE: Fx = Fx::MAX;

/// A fixed-point operation left the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("fixed-point overflow")]
pub struct Overflow;

#[inline]
fn add(a: Fx, b: Fx) -> Result<Fx, Overflow> {
    a.checked_add(b).ok_or(Overflow)
}

#[inline]
fn mul(a: Fx, b: Fx) -> Result<Fx, Overflow> {
    a.checked_mul(b).ok_or(Overflow)
}

#[inline]
fn div_int(a: Fx, b: i64) -> Result<Fx, Overflow> {
    a.checked_div_int(b).ok_or(Overflow)
}

/// Exact conversion of an integer quantity.
#[inline]
pub fn fx(value: i64) -> Result<Fx, Overflow> {
    Fx::checked_from_num(value).ok_or(Overflow)
}

/// Milliseconds to seconds.
#[inline]
pub fn ms_to_secs(ms: u16) -> Fx {
    // u16 / 1000 always fits.
    Fx::from_bits(((ms as i64) << 32) / 1000)
}

/// Smallest whole number of half-steps covering `s`.
#[inline]
pub fn ceil_halfsteps(s: Fx) -> i64 {
    let whole: i64 = s.int().to_num();
    if s.frac() == Fx::ZERO { whole } else { whole + 1 }
}

#[inline]
pub const fn halfsteps_to_micro(halfsteps: i64) -> i64 {
    halfsteps * MICROSTEPS_PER_HALFSTEP as i64
}

/// Position, velocity and acceleration at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Kinematics {
    pub s: Fx,
    pub v: Fx,
    pub a: Fx,
}

/// `s += v·t`.
pub fn const_velocity(k: Kinematics, t: Fx) -> Result<Kinematics, Overflow> {
    Ok(Kinematics {
        s: add(k.s, mul(k.v, t)?)?,
        ..k
    })
}

/// `s += v·t + a·t²/2`, `v += a·t`.
pub fn const_acceleration(k: Kinematics, t: Fx) -> Result<Kinematics, Overflow> {
    let at = mul(k.a, t)?;
    let s = add(add(k.s, mul(k.v, t)?)?, div_int(mul(at, t)?, 2)?)?;
    Ok(Kinematics {
        s,
        v: add(k.v, at)?,
        a: k.a,
    })
}

/// `s += v·t + a·t²/2 + j·t³/6`, `v += a·t + j·t²/2`, `a += j·t`.
pub fn const_jerk(k: Kinematics, j: Fx, t: Fx) -> Result<Kinematics, Overflow> {
    let t2 = mul(t, t)?;
    let jt = mul(j, t)?;
    let jt2 = mul(jt, t)?;
    let jt3 = mul(jt2, t)?;
    let at = mul(k.a, t)?;
    let s = add(
        add(add(k.s, mul(k.v, t)?)?, div_int(mul(k.a, t2)?, 2)?)?,
        div_int(jt3, 6)?,
    )?;
    let v = add(add(k.v, at)?, div_int(jt2, 2)?)?;
    Ok(Kinematics { s, v, a: add(k.a, jt)? })
}

/// Advance `k` by `t` under constant jerk `j`, picking the cheapest law.
pub fn advance(k: Kinematics, j: Fx, t: Fx) -> Result<Kinematics, Overflow> {
    if j != Fx::ZERO {
        const_jerk(k, j, t)
    } else if k.a != Fx::ZERO {
        const_acceleration(k, t)
    } else {
        const_velocity(k, t)
    }
}

/// Velocity after `t` under constant jerk, saturating. Used by the ISR.
#[inline]
pub fn velocity_at(v0: Fx, a0: Fx, j: Fx, t: Fx) -> Fx {
    if j == Fx::ZERO {
        if a0 == Fx::ZERO {
            return v0;
        }
        return v0.saturating_add(a0.saturating_mul(t));
    }
    let jt2 = j.saturating_mul(t).saturating_mul(t);
    v0.saturating_add(a0.saturating_mul(t))
        .saturating_add(jt2.wrapping_div_int(2))
}

/// Timer counts between two interrupts advancing `step_width` micro-steps
/// at speed `v`. Saturates at `u32::MAX` for non-positive speeds.
pub fn step_interval_counts(step_width: u32, counts_per_second: u32, v: Fx) -> u32 {
    let v_bits = v.to_bits();
    if v_bits <= 0 {
        return u32::MAX;
    }
    let num = ((step_width as u128) * (counts_per_second as u128)) << 32;
    let den = (MICROSTEPS_PER_HALFSTEP as u128) * (v_bits as u128);
    u32::try_from(num / den).unwrap_or(u32::MAX)
}

/// Duration of `counts` timer counts in seconds.
#[inline]
pub fn counts_to_secs(counts: u32, counts_per_second: u32) -> Fx {
    let bits = ((counts as u128) << 32) / (counts_per_second.max(1) as u128);
    Fx::from_bits(i64::try_from(bits).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(x: f64) -> Fx {
        Fx::from_num(x)
    }

    fn close(a: Fx, b: f64, eps: f64) -> bool {
        (a.to_num::<f64>() - b).abs() < eps
    }

    #[test]
    fn ms_conversion() {
        assert!(close(ms_to_secs(50), 0.05, 1e-9));
        assert_eq!(ms_to_secs(0), Fx::ZERO);
        assert!(close(ms_to_secs(u16::MAX), 65.535, 1e-9));
    }

    #[test]
    fn ceil_halfsteps_rounds_up_fractions_only() {
        assert_eq!(ceil_halfsteps(f(3.0)), 3);
        assert_eq!(ceil_halfsteps(f(3.25)), 4);
        assert_eq!(ceil_halfsteps(f(0.0)), 0);
        assert_eq!(ceil_halfsteps(f(-1.5)), -1);
    }

    #[test]
    fn constant_velocity_law() {
        let k = Kinematics { s: f(10.0), v: f(100.0), a: Fx::ZERO };
        let k = const_velocity(k, f(0.5)).unwrap();
        assert!(close(k.s, 60.0, 1e-6));
        assert!(close(k.v, 100.0, 1e-9));
    }

    #[test]
    fn constant_acceleration_law() {
        let k = Kinematics { s: Fx::ZERO, v: f(100.0), a: f(500.0) };
        let k = const_acceleration(k, f(2.0)).unwrap();
        // 100·2 + 500·4/2
        assert!(close(k.s, 1200.0, 1e-6));
        assert!(close(k.v, 1100.0, 1e-6));
    }

    #[test]
    fn constant_jerk_law() {
        let k = Kinematics { s: Fx::ZERO, v: f(100.0), a: Fx::ZERO };
        let j = f(10_000.0);
        let t = f(0.05);
        let k = const_jerk(k, j, t).unwrap();
        // a = 500, v = 100 + 10000·0.0025/2, s = 5 + 10000·0.000125/6
        assert!(close(k.a, 500.0, 1e-6));
        assert!(close(k.v, 112.5, 1e-6));
        assert!(close(k.s, 5.0 + 0.208_333_3, 1e-5));
    }

    #[test]
    fn advance_dispatches_on_jerk_and_acceleration() {
        let k = Kinematics { s: Fx::ZERO, v: f(10.0), a: Fx::ZERO };
        assert_eq!(advance(k, Fx::ZERO, f(1.0)).unwrap(), const_velocity(k, f(1.0)).unwrap());
    }

    #[test]
    fn overflow_is_reported() {
        let k = Kinematics { s: Fx::ZERO, v: f(1.0e9), a: Fx::ZERO };
        assert_eq!(const_velocity(k, f(10.0)), Err(Overflow));
        let k = Kinematics::default();
        assert_eq!(const_jerk(k, f(1.0e9), f(100.0)), Err(Overflow));
    }

    #[test]
    fn velocity_law_matches_closed_form() {
        let v = velocity_at(f(100.0), f(500.0), f(-10_000.0), f(0.02));
        // 100 + 10 - 2
        assert!(close(v, 108.0, 1e-6));
        assert_eq!(velocity_at(f(42.0), Fx::ZERO, Fx::ZERO, f(3.0)), f(42.0));
    }

    #[test]
    fn step_interval() {
        // 2 micro-steps at 100 half-steps/s: 1/3200 s = 312 counts at 1 MHz.
        assert_eq!(step_interval_counts(2, 1_000_000, f(100.0)), 312);
        // Whole half-step per tick at 1000 half-steps/s: 1 ms.
        assert_eq!(step_interval_counts(64, 1_000_000, f(1000.0)), 1000);
        assert_eq!(step_interval_counts(2, 1_000_000, Fx::ZERO), u32::MAX);
    }

    #[test]
    fn counts_to_seconds() {
        assert!(close(counts_to_secs(1000, 1_000_000), 0.001, 1e-9));
        assert_eq!(counts_to_secs(0, 1_000_000), Fx::ZERO);
    }
}
