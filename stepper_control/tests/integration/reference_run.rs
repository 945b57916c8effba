//! Reference runs supervised from the task loop.

use stepper_common::prelude::*;
use stepper_control::module::ModuleState;
use stepper_control::refrun::RefRunState;

use super::*;

fn wait_for_state(sim: &mut Simulation, state: ModuleState, max_ms: u64) {
    let reached = sim.run_until(max_ms, |bank, _| bank.module(0).is_some_and(|m| m.state() == state));
    assert_eq!(reached, Ok(true), "module never reached {state:?}");
}

fn run_result(sim: &Simulation) -> Option<Report> {
    sim.hw
        .reports()
        .iter()
        .map(|(_, r)| *r)
        .find(|r| matches!(r, Report::ReferenceRunDone { .. }))
}

#[test]
fn reference_run_sets_origin_at_switch() {
    let mut sim = sim_with(linear_axis());
    assert_eq!(position(&mut sim, 100, 0), Err(RequestError::NotReferenced));

    module_mut(&mut sim).start_reference_run().unwrap();
    assert_eq!(module(&sim).state(), ModuleState::ReferenceRun);
    sim.run_for(1).unwrap();
    assert_eq!(module(&sim).reference_run_state(), Some(RefRunState::FastMotion));

    wait_for_state(&mut sim, ModuleState::Ready, 20_000);
    assert_eq!(run_result(&sim), Some(Report::ReferenceRunDone { position: 0, ack: Ack::Ack }));
    assert!(module(&sim).reference_run_state().is_none());
    assert_eq!(module(&sim).motor().unwrap().position(), 0);
    assert_eq!(module(&sim).position_code(), 1);

    let rotor = sim.hw.rotor_position(0);
    assert!((SWITCH_AT - 2..=SWITCH_AT).contains(&rotor), "referenced at rotor {rotor}");

    // Motion events of the run itself are not reported as movements.
    assert!(!sim.hw.reports().iter().any(|(_, r)| matches!(
        r,
        Report::MovementDone { .. } | Report::SpeedReached { .. } | Report::Stopped { .. }
    )));
}

#[test]
fn position_offset_is_applied() {
    let mut cfg = linear_axis();
    cfg.reference_run.position_offset = 250;
    let mut sim = referenced(cfg);
    assert_eq!(module(&sim).motor().unwrap().position(), 250);

    let origin = sim.hw.rotor_position(0);
    position(&mut sim, 1250, 0).unwrap();
    run_until_idle(&mut sim, 5000);
    assert_eq!(sim.hw.rotor_position(0) - origin, 1000);
}

#[test]
fn start_on_switch_skips_fast_approach() {
    let mut cfg = linear_axis();
    cfg.reference_run.fast_speed = 500;
    cfg.reference_run.slow_speed = 50;
    cfg.reference_run.reverse_distance = 20;
    cfg.reference_run.max_distance = 10_000;
    cfg.reference_run.timeout_ms = 5000;
    let start = SWITCH_AT - 10;
    let mut sim = sim_at(cfg, start);
    assert_eq!(module(&sim).position_code(), 1);

    module_mut(&mut sim).start_reference_run().unwrap();
    sim.run_for(1).unwrap();
    assert_eq!(module(&sim).reference_run_state(), Some(RefRunState::ReverseMotionStart));

    let mut lowest = start;
    let ready = sim.run_until(10_000, |bank, hw| {
        lowest = lowest.min(hw.rotor_position(0));
        bank.module(0).is_some_and(|m| m.state() == ModuleState::Ready)
    });
    assert_eq!(ready, Ok(true));
    assert!(lowest >= start, "moved toward the switch before reversing: {lowest}");
    assert_eq!(run_result(&sim), Some(Report::ReferenceRunDone { position: 0, ack: Ack::Ack }));
}

#[test]
fn zero_slow_speed_finishes_after_fast_approach() {
    let mut cfg = linear_axis();
    cfg.reference_run.slow_speed = 0;
    let mut sim = sim_with(cfg);
    module_mut(&mut sim).start_reference_run().unwrap();
    wait_for_state(&mut sim, ModuleState::Ready, 10_000);

    // Halted by the switch on the fast approach, never backed off.
    assert!(sim.hw.rotor_position(0) <= SWITCH_AT);
    assert_eq!(run_result(&sim), Some(Report::ReferenceRunDone { position: 0, ack: Ack::Ack }));
}

#[test]
fn missing_switch_fails_on_max_distance() {
    let mut cfg = linear_axis();
    cfg.reference_run.max_distance = 300;
    let mut sim = bare_sim(cfg);
    module_mut(&mut sim).start_reference_run().unwrap();
    wait_for_state(&mut sim, ModuleState::Init, 5000);

    assert_eq!(
        run_result(&sim),
        Some(Report::ReferenceRunDone {
            position: module(&sim).motor().unwrap().position(),
            ack: Ack::Nack(MotionFault::REFRUN_MAX_DISTANCE),
        })
    );
    assert!(module(&sim).motor().unwrap().is_idle());
    assert!(sim.hw.rotor_position(0) >= -310);
}

#[test]
fn slow_run_fails_on_timeout() {
    let mut cfg = linear_axis();
    cfg.reference_run.timeout_ms = 200;
    let mut sim = bare_sim(cfg);
    module_mut(&mut sim).start_reference_run().unwrap();
    wait_for_state(&mut sim, ModuleState::Init, 5000);

    let Some(Report::ReferenceRunDone { ack, .. }) = run_result(&sim) else {
        panic!("no reference run result");
    };
    assert_eq!(ack, Ack::Nack(MotionFault::REFRUN_TIMEOUT));
    assert!(sim.hw.now_ms() < 400);
}

#[test]
fn requests_are_refused_while_referencing() {
    let mut sim = sim_with(linear_axis());
    module_mut(&mut sim).start_reference_run().unwrap();
    sim.run_for(10).unwrap();

    assert_eq!(speed(&mut sim, 300, 0), Err(RequestError::Busy));
    assert_eq!(position(&mut sim, 300, 0), Err(RequestError::Busy));
    assert_eq!(module_mut(&mut sim).start_reference_run(), Err(RequestError::Busy));
    assert_eq!(module_mut(&mut sim).stop_rotation_at_position(0), Err(RequestError::Busy));
}

#[test]
fn interrupted_run_reports_wrong_switch() {
    let mut sim = sim_with(linear_axis());
    module_mut(&mut sim).start_reference_run().unwrap();
    sim.run_for(200).unwrap();
    assert!(module_mut(&mut sim).stop_motion());
    wait_for_state(&mut sim, ModuleState::Init, 1000);

    let Some(Report::ReferenceRunDone { ack, .. }) = run_result(&sim) else {
        panic!("no reference run result");
    };
    assert_eq!(ack, Ack::Nack(MotionFault::REFRUN_INVALID_LS));
}

#[test]
fn rerun_from_ready_moves_origin() {
    let mut sim = referenced(linear_axis());
    position(&mut sim, 2000, 0).unwrap();
    run_until_idle(&mut sim, 10_000);

    // The axis slipped by 30 half-steps while unpowered.
    let rotor = sim.hw.rotor_position(0);
    sim.hw.set_rotor_position(0, rotor + 30);
    module_mut(&mut sim).start_reference_run().unwrap();
    wait_for_state(&mut sim, ModuleState::Ready, 30_000);
    assert_eq!(module(&sim).motor().unwrap().position(), 0);
    assert!((SWITCH_AT - 2..=SWITCH_AT).contains(&sim.hw.rotor_position(0)));
}
