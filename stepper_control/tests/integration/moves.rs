//! Position and speed moves through the module interface.

use stepper_common::prelude::*;
use stepper_control::bank::MotorBank;
use stepper_control::motion::{PositionOutcome, SpeedOutcome};
use stepper_control::profile::{Phase, TimerTiming};
use stepper_control::sim::{SimHardware, Simulation};

use super::*;

#[test]
fn position_move_reports_done_on_target() {
    let mut sim = referenced(linear_axis());
    let start = sim.hw.rotor_position(0);

    assert_eq!(position(&mut sim, 3000, 0), Ok(PositionOutcome::Started));
    run_until_idle(&mut sim, 10_000);

    assert_eq!(module(&sim).motor().unwrap().position(), 3000);
    assert_eq!(sim.hw.rotor_position(0) - start, 3000);
    let reports = sim.hw.take_reports();
    assert!(reports.contains(&(
        0,
        Report::MovementDone { position: 3000, position_code: 0, ack: Ack::Ack }
    )));
}

#[test]
fn moves_back_and_forth_without_drift() {
    let mut sim = referenced(linear_axis());
    let start = sim.hw.rotor_position(0);

    for (target, profile) in [(1200, 0), (300, 1), (4100, 0), (17, 0), (17, 1)] {
        position(&mut sim, target, profile).unwrap();
        run_until_idle(&mut sim, 20_000);
        assert_eq!(module(&sim).motor().unwrap().position(), target);
        assert_eq!(sim.hw.rotor_position(0) - start, target);
    }
}

#[test]
fn zero_distance_move_is_acknowledged_without_stepping() {
    let mut sim = referenced(linear_axis());
    position(&mut sim, 500, 0).unwrap();
    run_until_idle(&mut sim, 5000);
    sim.hw.take_reports();
    let steps = sim.hw.steps_written(0);

    assert_eq!(position(&mut sim, 500, 0), Ok(PositionOutcome::AlreadyAtTarget));
    assert!(!sim.hw.channel_enabled(0));
    assert_eq!(
        sim.hw.take_reports(),
        vec![(0, Report::MovementDone { position: 500, position_code: 0, ack: Ack::Ack })]
    );

    sim.run_for(20).unwrap();
    assert_eq!(sim.hw.steps_written(0), steps);
    assert!(sim.hw.reports().is_empty());
}

#[test]
fn speed_beyond_profile_is_rejected_untouched() {
    let mut sim = sim_with(linear_axis());

    assert_eq!(speed(&mut sim, 1500, 0), Err(RequestError::ProfileUnfit { speed: 1500, profile: 0 }));
    assert_eq!(speed(&mut sim, -10, 1), Err(RequestError::ProfileUnfit { speed: -10, profile: 1 }));
    assert_eq!(speed(&mut sim, 300, 7), Err(RequestError::UnknownProfile(7)));

    let motor = module(&sim).motor().unwrap();
    assert!(motor.is_idle());
    assert!(motor.pending_switch().is_none());
    assert!(!sim.hw.channel_enabled(0));
    sim.run_for(10).unwrap();
    assert_eq!(sim.hw.steps_written(0), 0);
}

#[test]
fn speed_zero_ends_position_move_early() {
    let mut sim = referenced(linear_axis());
    position(&mut sim, 5000, 0).unwrap();
    let cruising = sim.run_until(5000, |bank, _| {
        bank.module(0).and_then(|m| m.motor()).is_some_and(|m| m.isr().phase == Phase::VelConst)
    });
    assert_eq!(cruising, Ok(true));

    assert_eq!(speed(&mut sim, 0, 0), Ok(SpeedOutcome::Queued));
    run_until_idle(&mut sim, 5000);

    let stopped_at = module(&sim).motor().unwrap().position();
    assert!(stopped_at < 5000, "stopped at {stopped_at}");
    let reports = sim.hw.take_reports();
    assert!(reports.contains(&(
        0,
        Report::SpeedReached { speed: 0, position: stopped_at, ack: Ack::Ack }
    )));
    assert!(!reports.iter().any(|(_, r)| matches!(r, Report::MovementDone { .. })));
}

#[test]
fn speed_reversal_passes_through_standstill() {
    let mut sim = sim_with(linear_axis());
    assert_eq!(speed(&mut sim, 800, 0), Ok(SpeedOutcome::Started));
    let at_speed = sim.run_until(3000, |_, hw| {
        hw.reports().iter().any(|(_, r)| matches!(r, Report::SpeedReached { speed: 800, .. }))
    });
    assert_eq!(at_speed, Ok(true));
    let turned_at = sim.hw.rotor_position(0);

    assert_eq!(speed(&mut sim, -800, 0), Ok(SpeedOutcome::Queued));
    assert_eq!(speed(&mut sim, -600, 0), Err(RequestError::SwitchPending));
    let mut furthest = turned_at;
    let reversed = sim.run_until(5000, |_, hw| {
        furthest = furthest.max(hw.rotor_position(0));
        hw.reports().iter().any(|(_, r)| matches!(r, Report::SpeedReached { speed: -800, .. }))
    });
    assert_eq!(reversed, Ok(true));
    assert!(furthest > turned_at, "no deceleration distance before turning");
    assert!(sim.hw.rotor_position(0) < furthest);

    speed(&mut sim, 0, 0).unwrap();
    run_until_idle(&mut sim, 3000);
    assert!(sim.hw.rotor_position(0) > SWITCH_AT);
}

#[test]
fn repeated_stop_is_a_no_op() {
    let mut sim = sim_with(linear_axis());
    speed(&mut sim, 600, 0).unwrap();
    sim.run_for(300).unwrap();

    assert!(module_mut(&mut sim).stop_motion());
    run_until_idle(&mut sim, 100);
    let reports = sim.hw.take_reports();
    let stopped = reports
        .iter()
        .filter(|(_, r)| matches!(r, Report::Stopped { position_code: 0, ack: Ack::Ack, .. }))
        .count();
    assert_eq!(stopped, 1);

    let position = module(&sim).motor().unwrap().position();
    assert!(!module_mut(&mut sim).stop_motion());
    assert!(!module_mut(&mut sim).stop_motion());
    sim.run_for(50).unwrap();
    assert!(sim.hw.take_reports().is_empty());
    assert_eq!(module(&sim).motor().unwrap().position(), position);
}

#[test]
fn far_end_switch_halts_and_locks_direction() {
    let mut sim = sim_with(linear_axis());
    speed(&mut sim, 1000, 0).unwrap();
    run_until_idle(&mut sim, 15_000);

    assert_eq!(module(&sim).position_code(), 2);
    assert!(sim.hw.rotor_position(0) >= FAR_END);
    let reports = sim.hw.take_reports();
    assert!(reports
        .iter()
        .any(|(_, r)| matches!(r, Report::Stopped { position_code: 2, ack: Ack::Ack, .. })));

    assert_eq!(speed(&mut sim, 300, 0), Err(RequestError::DirectionNotAllowed { code: 2 }));
    assert_eq!(speed(&mut sim, -300, 0), Ok(SpeedOutcome::Started));
    sim.run_for(500).unwrap();
    assert_eq!(module(&sim).position_code(), 0);
}

#[test]
fn rotary_axis_stops_on_requested_position() {
    let mut cfg = linear_axis();
    cfg.motor.rotary_span = 2000;
    let mut sim = sim_with(cfg);

    assert_eq!(
        module_mut(&mut sim).stop_rotation_at_position(1500),
        Err(RequestError::NotAtSpeed)
    );
    speed(&mut sim, 600, 0).unwrap();
    sim.run_for(1000).unwrap();
    module_mut(&mut sim).stop_rotation_at_position(1500).unwrap();
    run_until_idle(&mut sim, 10_000);

    assert_eq!(module(&sim).motor().unwrap().position(), 1500);
    assert_eq!(sim.hw.rotor_position(0), 1500);
    assert!(sim.hw.take_reports().contains(&(
        0,
        Report::MovementDone { position: 1500, position_code: 0, ack: Ack::Ack }
    )));
}

#[test]
fn two_motors_share_the_timer() {
    let mut hw = SimHardware::new(2);
    let mut bank = MotorBank::new(2);
    for ch in 0..2 {
        let cfg = linear_axis();
        hw.configure_channel(ch, &cfg);
        bank.module_mut(ch)
            .unwrap()
            .configure(cfg, TimerTiming::default(), &mut hw, 0)
            .unwrap();
    }
    let mut sim = Simulation::new(bank, hw);
    {
        let Simulation { bank, hw } = &mut sim;
        bank.module_mut(0).unwrap().speed_request(700, 0, hw).unwrap();
        bank.module_mut(1).unwrap().speed_request(-150, 1, hw).unwrap();
    }
    sim.run_for(1500).unwrap();

    let reached: Vec<_> = sim
        .hw
        .take_reports()
        .into_iter()
        .filter_map(|(ch, r)| match r {
            Report::SpeedReached { speed, .. } => Some((ch, speed)),
            _ => None,
        })
        .collect();
    assert!(reached.contains(&(0, 700)));
    assert!(reached.contains(&(1, -150)));

    for ch in 0..2 {
        assert!(sim.bank.module_mut(ch).unwrap().stop_motion());
    }
    let rest = sim.run_until(100, |bank, _| {
        bank.modules().iter().all(|m| m.motor().is_some_and(|m| m.is_idle()))
    });
    assert_eq!(rest, Ok(true));
    for ch in 0..2 {
        let nominal = sim.bank.module(ch).unwrap().motor().unwrap().position();
        assert_eq!(sim.hw.rotor_position(ch), nominal);
    }
    assert!(sim.hw.rotor_position(0) > 0);
    assert!(sim.hw.rotor_position(1) < 0);
}

#[test]
fn periodic_reports_and_life_cycle_while_moving() {
    let mut cfg = linear_axis();
    cfg.motor.report_interval_ms = 100;
    let mut sim = sim_with(cfg);
    sim.hw.take_reports();

    speed(&mut sim, 800, 0).unwrap();
    sim.run_for(1000).unwrap();

    let positions = sim
        .hw
        .take_reports()
        .iter()
        .filter(|(_, r)| matches!(r, Report::Position { .. }))
        .count();
    assert!((9..=10).contains(&positions), "{positions} position reports");

    let counters = module(&sim).lifecycle().unwrap();
    assert!(counters.revolutions >= 1);
    assert!(counters.operating_ms >= 990);

    module_mut(&mut sim).stop_motion();
    sim.run_for(500).unwrap();
    assert!(sim.hw.take_reports().iter().all(|(_, r)| !matches!(r, Report::Position { .. })));
}
