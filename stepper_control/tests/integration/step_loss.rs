//! Encoder supervision: step loss, recovery and the deviation ceiling.

use stepper_common::prelude::*;
use stepper_control::motion::{MotionEvents, Motor, MotorSetup};
use stepper_control::profile::TimerTiming;
use stepper_control::sim::SimHardware;

use super::*;

/// Ticks per half-step with the 8-micro-step profiles.
const TICKS_PER_HALFSTEP: usize = 8;

fn encoder_motor(step_loss_limit: u16) -> (Motor, SimHardware) {
    let mut cfg = with_encoder(linear_axis());
    cfg.motor.step_loss_limit = step_loss_limit;
    cfg.validate().unwrap();
    let mut hw = SimHardware::new(1);
    hw.configure_channel(0, &cfg);
    let mut motor = Motor::new(MotorSetup::new(0, &cfg, TimerTiming::default()).unwrap());
    motor.reference_encoder(&mut hw);
    (motor, hw)
}

/// Interrupts until the motor rests.
fn ticks_until_idle(motor: &mut Motor, hw: &mut SimHardware, max: usize) -> usize {
    for n in 0..max {
        if motor.is_idle() {
            return n;
        }
        motor.on_timer_interrupt(hw);
    }
    panic!("motor still moving after {max} interrupts");
}

#[test]
fn short_stall_heals_and_reaches_target() {
    let (mut motor, mut hw) = encoder_motor(4);
    hw.inject_stall(0, 1);
    motor.position_request(400, 0, 0, &mut hw).unwrap();

    let mut saw_loss = false;
    while !motor.is_idle() {
        motor.on_timer_interrupt(&mut hw);
        saw_loss |= motor.isr().encoder.step_loss_detected;
    }

    assert!(saw_loss);
    assert!(!motor.isr().encoder.step_loss_detected);
    assert_eq!(motor.isr().encoder.step_loss_count, 1);
    assert!(motor.take_events().contains(MotionEvents::TARGET_POSITION));
    assert!(motor.isr().fault.is_empty());
    assert_eq!(motor.position(), 400);
    assert_eq!(hw.rotor_position(0), 400);
    // One lost commutation is stepped again.
    assert_eq!(hw.steps_written(0), (400 + 8) * TICKS_PER_HALFSTEP as u64);
}

#[test]
fn lagging_rotor_is_awaited_at_target() {
    let (mut motor, mut hw) = encoder_motor(4);
    motor.position_request(400, 0, 0, &mut hw).unwrap();
    while motor.position() < 399 {
        motor.on_timer_interrupt(&mut hw);
    }
    motor.on_timer_interrupt(&mut hw);
    // The axis slips back by ten half-steps just before the target.
    hw.set_rotor_position(0, 389);
    while motor.position() < 400 && !motor.is_idle() {
        motor.on_timer_interrupt(&mut hw);
    }

    assert!(!motor.is_idle(), "target accepted with a lagging rotor");
    assert!(motor.isr().encoder.step_loss_detected);
    ticks_until_idle(&mut motor, &mut hw, 200 * TICKS_PER_HALFSTEP);

    assert!(motor.take_events().contains(MotionEvents::TARGET_POSITION));
    assert!(motor.isr().fault.is_empty());
    assert_eq!(motor.isr().encoder.step_loss_count, 1);
    assert_eq!(motor.position(), 400);
    assert_eq!(hw.rotor_position(0), 400);
    assert!(hw.steps_written(0) > 400 * TICKS_PER_HALFSTEP as u64);
}

#[test]
fn nominal_position_freezes_during_step_loss() {
    let (mut motor, mut hw) = encoder_motor(4);
    hw.inject_stall(0, 2);
    motor.speed_request(300, 0, 0, &mut hw).unwrap();

    for _ in 0..10_000 {
        motor.on_timer_interrupt(&mut hw);
        if motor.isr().encoder.step_loss_detected {
            break;
        }
    }
    assert!(motor.isr().encoder.step_loss_detected);
    let frozen = motor.position();
    for _ in 0..TICKS_PER_HALFSTEP * 4 {
        motor.on_timer_interrupt(&mut hw);
    }
    assert_eq!(motor.position(), frozen);
    assert!(!motor.is_idle());
}

#[test]
fn long_stall_exceeds_step_loss_limit() {
    let (mut motor, mut hw) = encoder_motor(2);
    hw.inject_stall(0, 10);
    motor.position_request(400, 0, 0, &mut hw).unwrap();
    ticks_until_idle(&mut motor, &mut hw, 100_000);

    assert!(motor.take_events().contains(MotionEvents::HALTED));
    assert_eq!(motor.isr().fault, MotionFault::STEP_LOSS_LIMIT);
    assert!(motor.isr().encoder.step_loss_count > 2);
    assert!(motor.position() < 400);
    assert!(!hw.channel_enabled(0));
}

#[test]
fn deviation_beyond_one_revolution_halts_within_a_halfstep() {
    for offset in [-500, 500] {
        let (mut motor, mut hw) = encoder_motor(4);
        motor.position_request(3000, 0, 0, &mut hw).unwrap();
        for _ in 0..2000 {
            motor.on_timer_interrupt(&mut hw);
        }
        assert!(!motor.is_idle());

        hw.set_rotor_position(0, motor.position() + offset);
        let ticks = ticks_until_idle(&mut motor, &mut hw, 1000);
        assert!(ticks <= TICKS_PER_HALFSTEP, "halted after {ticks} interrupts");
        assert_eq!(motor.isr().fault, MotionFault::DEVIATION_LIMIT);
    }
}

#[test]
fn deviation_ceiling_applies_during_step_loss() {
    let (mut motor, mut hw) = encoder_motor(100);
    hw.inject_stall(0, 20);
    motor.speed_request(300, 0, 0, &mut hw).unwrap();
    for _ in 0..10_000 {
        motor.on_timer_interrupt(&mut hw);
        if motor.isr().encoder.step_loss_detected {
            break;
        }
    }
    assert!(motor.isr().encoder.step_loss_detected);

    hw.set_rotor_position(0, motor.position() - 600);
    let ticks = ticks_until_idle(&mut motor, &mut hw, 1000);
    assert!(ticks <= TICKS_PER_HALFSTEP, "halted after {ticks} interrupts");
    assert_eq!(motor.isr().fault, MotionFault::DEVIATION_LIMIT);
}

#[test]
fn encoder_ahead_corrects_nominal_position() {
    let (mut motor, mut hw) = encoder_motor(4);
    motor.speed_request(300, 0, 0, &mut hw).unwrap();
    for _ in 0..400 {
        motor.on_timer_interrupt(&mut hw);
    }
    let before = motor.position();
    hw.set_rotor_position(0, before + 20);
    for _ in 0..TICKS_PER_HALFSTEP {
        motor.on_timer_interrupt(&mut hw);
    }
    assert!(motor.position() >= before + 20);
    assert!(!motor.is_idle());
    assert!(motor.isr().fault.is_empty());
}

#[test]
fn step_loss_halt_is_reported_and_keeps_the_reference() {
    let mut cfg = with_encoder(linear_axis());
    cfg.motor.step_loss_limit = 2;
    let mut sim = referenced(cfg);
    sim.hw.inject_stall(0, 10);

    position(&mut sim, 2000, 0).unwrap();
    run_until_idle(&mut sim, 10_000);

    let reports = sim.hw.take_reports();
    assert!(reports.iter().any(|(_, r)| matches!(
        r,
        Report::Stopped { ack: Ack::Nack(MotionFault::STEP_LOSS_LIMIT), .. }
    )));
    assert_eq!(module(&sim).state(), ModuleState::Ready);
}
