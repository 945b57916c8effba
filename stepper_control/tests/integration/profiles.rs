//! Profile evaluation and phase execution across distances.

use stepper_common::prelude::*;
use stepper_control::motion::{Motor, MotorSetup};
use stepper_control::profile::{Phase, ProfileTable, TimerTiming, evaluate_profile};
use stepper_control::sim::SimHardware;
use stepper_control::units::{Fx, fx};

use super::*;

fn scenario_a() -> MotionProfileConfig {
    MotionProfileConfig {
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

#[test]
fn full_jerk_is_usable_at_full_speed() {
    let table = evaluate_profile(&scenario_a()).unwrap();
    let full = table.entry(10).unwrap();
    assert_eq!(full.j, 10);
    assert!(full.s > 0);
    assert_eq!(evaluate_profile(&MotionProfileConfig::default()).unwrap().entry(10).unwrap().j, 10);
}

#[test]
fn distances_at_or_beyond_the_table_plan_at_full_speed() {
    let cfg = scenario_a();
    let table = ProfileTable::new(&[cfg]).unwrap();
    let entry = table.get(0).unwrap();
    let shortest = entry.distances.entry(10).unwrap().s;

    for distance in [shortest, shortest + 1, shortest + 37, 3 * shortest, 250_000] {
        let plan = entry.plan_distance(distance).unwrap();
        assert!(!plan.constant_acceleration_fallback, "fallback at {distance}");
        assert_eq!(plan.phase(Phase::VelConst).v, fx(cfg.v_max as i64).unwrap());
        let error = (plan.total_distance() - fx(distance).unwrap()).abs();
        assert!(error < Fx::ONE, "planned {} for {distance}", plan.total_distance());
    }
}

#[test]
fn planned_phases_never_run_backwards_in_time() {
    let table = ProfileTable::new(&linear_axis().profiles).unwrap();
    for index in 0..table.len() as u8 {
        let entry = table.get(index).unwrap();
        for distance in [1, 2, 9, 64, 333, 1000, 12_345] {
            let plan = entry.plan_distance(distance).unwrap();
            for phase in Phase::ALL {
                assert!(plan.phase(phase).dt >= Fx::ZERO, "{phase:?} of {distance}");
            }
        }
    }
}

#[test]
fn phases_execute_in_order_for_any_distance() {
    let cfg = linear_axis();
    for distance in [1, 7, 50, 333, 2500, -1800] {
        let mut motor = Motor::new(MotorSetup::new(0, &cfg, TimerTiming::default()).unwrap());
        let mut hw = SimHardware::new(1);
        motor.position_request(distance, 0, 0, &mut hw).unwrap();

        let mut last = motor.isr().phase;
        while !motor.is_idle() {
            let phase = motor.isr().phase;
            assert!(phase >= last, "{distance}: phase went back from {last:?} to {phase:?}");
            assert!(!motor.active_set().phase(phase).is_skipped(), "{distance}: entered skipped {phase:?}");
            last = phase;
            motor.on_timer_interrupt(&mut hw);
        }
        assert_eq!(motor.position(), distance);
    }
}
