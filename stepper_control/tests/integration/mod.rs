//! Shared rigs for the integration tests.

mod config_ingest;
mod moves;
mod profiles;
mod reference_run;
mod step_loss;

use stepper_common::prelude::*;
use stepper_control::bank::MotorBank;
use stepper_control::module::{Module, ModuleState};
use stepper_control::motion::{PositionOutcome, SpeedOutcome};
use stepper_control::profile::TimerTiming;
use stepper_control::sim::{SimHardware, Simulation};

/// Reference switch (switch 0) is closed at and below this rotor position.
pub const SWITCH_AT: i64 = -400;
/// Far-end switch (switch 1) is closed at and above this rotor position.
pub const FAR_END: i64 = 6000;

/// Linear axis, reference switch at the Ccw end, far-end switch at the Cw end.
///
/// Profile 0: 100..1000 half-steps/s, profile 1: 20..200 half-steps/s.
pub fn linear_axis() -> ModuleConfig {
    let mut cfg = ModuleConfig::default();
    cfg.limit_switches = [
        LimitSwitchConfig { exists: true, inverted: false, debounce_samples: 1 },
        LimitSwitchConfig { exists: true, inverted: false, debounce_samples: 1 },
    ];
    cfg.position_codes = [
        PositionCodeConfig { valid: true, stop: StopDirection::None, rotation: RotationLock::Both },
        PositionCodeConfig { valid: true, stop: StopDirection::Ccw, rotation: RotationLock::CwOnly },
        PositionCodeConfig { valid: true, stop: StopDirection::Cw, rotation: RotationLock::CcwOnly },
        PositionCodeConfig::default(),
    ];
    cfg.profiles
        .push(MotionProfileConfig {
            v_min: 100,
            v_max: 1000,
            acc: 2000,
            dec: 2000,
            acc_jerk_up_ms: 20,
            acc_jerk_down_ms: 20,
            dec_jerk_up_ms: 20,
            dec_jerk_down_ms: 20,
            microsteps: 8,
        })
        .unwrap();
    cfg.profiles
        .push(MotionProfileConfig {
            v_min: 20,
            v_max: 200,
            acc: 1000,
            dec: 1000,
            acc_jerk_up_ms: 10,
            acc_jerk_down_ms: 10,
            dec_jerk_up_ms: 10,
            dec_jerk_down_ms: 10,
            microsteps: 8,
        })
        .unwrap();
    cfg.motor.profile_count = 2;
    cfg.reference_run = ReferenceRunConfig {
        ref_position_code: 1,
        fast_profile: 0,
        slow_profile: 1,
        timeout_ms: 30_000,
        fast_speed: 500,
        slow_speed: 50,
        max_distance: 100_000,
        reverse_distance: 40,
        position_offset: 0,
    };
    cfg
}

/// `cfg` with a 2000-tick encoder fitted.
pub fn with_encoder(mut cfg: ModuleConfig) -> ModuleConfig {
    cfg.encoder = EncoderConfig { present: true, ticks_per_rev: 2000, reversed: false };
    cfg
}

/// Configured single-motor simulation without any switch windows.
pub fn bare_sim(cfg: ModuleConfig) -> Simulation {
    let mut hw = SimHardware::new(1);
    hw.configure_channel(0, &cfg);
    let mut bank = MotorBank::new(1);
    bank.module_mut(0)
        .unwrap()
        .configure(cfg, TimerTiming::default(), &mut hw, 0)
        .unwrap();
    Simulation::new(bank, hw)
}

/// Configured single-motor simulation with both switches at [`SWITCH_AT`]
/// and [`FAR_END`], rotor starting at `start`.
pub fn sim_at(cfg: ModuleConfig, start: i64) -> Simulation {
    let mut hw = SimHardware::new(1);
    hw.configure_channel(0, &cfg);
    hw.set_rotor_position(0, start);
    hw.add_switch_window(0, 0, i64::MIN..=SWITCH_AT);
    hw.add_switch_window(0, 1, FAR_END..=i64::MAX);
    let mut bank = MotorBank::new(1);
    bank.module_mut(0)
        .unwrap()
        .configure(cfg, TimerTiming::default(), &mut hw, 0)
        .unwrap();
    Simulation::new(bank, hw)
}

pub fn sim_with(cfg: ModuleConfig) -> Simulation {
    sim_at(cfg, 0)
}

/// [`sim_with`] after a successful reference run, reports drained.
pub fn referenced(cfg: ModuleConfig) -> Simulation {
    let mut sim = sim_with(cfg);
    module_mut(&mut sim).start_reference_run().unwrap();
    let ready = sim.run_until(20_000, |bank, _| {
        bank.module(0).is_some_and(|m| m.state() == ModuleState::Ready)
    });
    assert_eq!(ready, Ok(true), "reference run did not finish");
    sim.hw.take_reports();
    sim
}

pub fn module(sim: &Simulation) -> &Module {
    sim.bank.module(0).unwrap()
}

pub fn module_mut(sim: &mut Simulation) -> &mut Module {
    sim.bank.module_mut(0).unwrap()
}

pub fn position(sim: &mut Simulation, target: i64, profile: u8) -> Result<PositionOutcome, RequestError> {
    let Simulation { bank, hw } = sim;
    bank.module_mut(0).unwrap().position_request(target, profile, hw)
}

pub fn speed(sim: &mut Simulation, speed: i32, profile: u8) -> Result<SpeedOutcome, RequestError> {
    let Simulation { bank, hw } = sim;
    bank.module_mut(0).unwrap().speed_request(speed, profile, hw)
}

/// Motor 0 at rest.
pub fn idle(bank: &MotorBank, _hw: &SimHardware) -> bool {
    bank.module(0).and_then(Module::motor).is_some_and(|m| m.is_idle())
}

/// Run until motor 0 rests, failing the test after `max_ms`.
pub fn run_until_idle(sim: &mut Simulation, max_ms: u64) {
    assert_eq!(sim.run_until(max_ms, idle), Ok(true), "motor still moving after {max_ms} ms");
}
