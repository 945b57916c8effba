//! # Stepper Control Simulator
//!
//! Runs the motion core against simulated hardware from a TOML scenario:
//! motor configurations, limit-switch positions and a script of requests.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario
//! stepper_control --config stepper_control/config/sim.toml
//!
//! # Validate the configuration only
//! stepper_control --config sim.toml --check
//!
//! # Verbose JSON logging
//! stepper_control --config sim.toml -v --json
//! ```
//!
//! # Scenario file
//!
//! ```toml
//! [simulation]
//! counts_per_second = 1000000
//!
//! [[motors]]
//! switches = [{ switch = 0, from = -100000, to = -800 }]
//! [motors.config.motor]
//! halfsteps_per_rev = 400
//! # ... remaining ModuleConfig tables
//!
//! [[script]]
//! motor = 0
//! action = "reference_run"
//!
//! [[script]]
//! motor = 0
//! action = "position"
//! target = 4000
//! profile = 0
//! ```

#![deny(warnings)]

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use stepper_common::config::{ConfigLoader, ModuleConfig};
use stepper_common::consts::{MAX_MOTORS, TIMER_COUNTS_PER_SECOND};
use stepper_common::error::ConfigError;
use stepper_control::bank::MotorBank;
use stepper_control::module::{Module, ModuleState};
use stepper_control::profile::TimerTiming;
use stepper_control::sim::{SimHardware, Simulation};

/// Stepper Control - S-curve motion core on simulated hardware
#[derive(Parser, Debug)]
#[command(name = "stepper_control")]
#[command(version)]
#[command(about = "Stepper motion core running a scripted scenario on simulated hardware")]
#[command(long_about = None)]
struct Args {
    /// Path to the scenario file.
    #[arg(short, long, default_value = "config/sim.toml")]
    config: PathBuf,

    /// Validate the motor configurations and exit.
    #[arg(long)]
    check: bool,

    /// Longest time a single script step may take [ms].
    #[arg(long, default_value_t = 60_000)]
    step_timeout_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

// ─── Scenario File ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    simulation: SimulationSettings,
    #[serde(default)]
    timing: TimerTiming,
    motors: Vec<MotorScenario>,
    #[serde(default)]
    script: Vec<ScriptStep>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SimulationSettings {
    counts_per_second: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { counts_per_second: TIMER_COUNTS_PER_SECOND }
    }
}

#[derive(Debug, Deserialize)]
struct MotorScenario {
    config: ModuleConfig,
    /// Rotor position the simulation starts from [half-steps].
    #[serde(default)]
    start_position: i64,
    #[serde(default)]
    switches: Vec<SwitchWindow>,
    /// Commutations the rotor loses at the start of the first move.
    #[serde(default)]
    stall_commutations: u32,
}

/// Limit switch closed while the rotor is within `from..=to`.
#[derive(Debug, Deserialize)]
struct SwitchWindow {
    switch: u8,
    from: i64,
    to: i64,
}

#[derive(Debug, Deserialize)]
struct ScriptStep {
    motor: u8,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    ReferenceRun,
    Position { target: i64, profile: u8 },
    Speed { speed: i32, profile: u8, hold_ms: u64 },
    Stop,
    StopAt { target: i64 },
    Wait { ms: u64 },
}

// ─── Entry ──────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Simulation failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("Stepper Control v{} starting...", env!("CARGO_PKG_VERSION"));
    let scenario = Scenario::load(&args.config)?;
    if scenario.motors.is_empty() || scenario.motors.len() > MAX_MOTORS {
        return Err(format!("scenario needs 1..={} motors", MAX_MOTORS).into());
    }

    let configs = scenario
        .motors
        .iter()
        .enumerate()
        .map(|(ch, m)| prepare(ch as u8, &m.config))
        .collect::<Result<Vec<_>, _>>()?;

    if args.check {
        info!("{} motor configuration(s) valid", configs.len());
        return Ok(());
    }

    let mut hw = SimHardware::with_rate(configs.len(), scenario.simulation.counts_per_second);
    let mut bank = MotorBank::new(configs.len());
    for (ch, (motor, cfg)) in scenario.motors.iter().zip(configs).enumerate() {
        let ch = ch as u8;
        hw.configure_channel(ch, &cfg);
        hw.set_rotor_position(ch, motor.start_position);
        for w in &motor.switches {
            hw.add_switch_window(ch, w.switch, w.from..=w.to);
        }
        if motor.stall_commutations > 0 {
            hw.inject_stall(ch, motor.stall_commutations);
        }
        let module = bank.module_mut(ch).ok_or("motor channel out of range")?;
        module.configure(cfg, scenario.timing, &mut hw, 0)?;
    }

    let mut sim = Simulation::new(bank, hw);
    for (n, step) in scenario.script.iter().enumerate() {
        debug!("Step {}: motor {} {:?}", n, step.motor, step.action);
        execute(&mut sim, step, args.step_timeout_ms)?;
        drain_reports(&mut sim);
    }

    for module in sim.bank.modules() {
        if let (Some(motor), Some(lc)) = (module.motor(), module.lifecycle()) {
            info!(
                "Motor {}: position {}, state {:?}, {} revolutions, {} ms operating",
                module.channel(),
                motor.position(),
                module.state(),
                lc.revolutions,
                lc.operating_ms
            );
        }
    }
    info!("Simulation complete at {} ms", sim.hw.now_ms());
    Ok(())
}

impl Scenario {
    fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        info!("Loading scenario from {}", path.display());
        <Self as ConfigLoader>::load(path)
    }
}

/// Validate a motor's configuration as given in the scenario file.
fn prepare(channel: u8, cfg: &ModuleConfig) -> Result<ModuleConfig, ConfigError> {
    cfg.validate()?;
    debug!("Motor {} configuration: {} profile(s)", channel, cfg.profiles.len());
    Ok(cfg.clone())
}

fn execute(sim: &mut Simulation, step: &ScriptStep, timeout_ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    let ch = step.motor;
    let module = sim.bank.module_mut(ch).ok_or("script names an unknown motor")?;
    match step.action {
        Action::ReferenceRun => module.start_reference_run()?,
        Action::Position { target, profile } => {
            module.position_request(target, profile, &mut sim.hw)?;
        }
        Action::Speed { speed, profile, hold_ms } => {
            module.speed_request(speed, profile, &mut sim.hw)?;
            sim.run_for(hold_ms)?;
            return Ok(());
        }
        Action::Stop => {
            if !module.stop_motion() {
                info!("Motor {} already at rest", ch);
            }
        }
        Action::StopAt { target } => module.stop_rotation_at_position(target)?,
        Action::Wait { ms } => {
            sim.run_for(ms)?;
            return Ok(());
        }
    }

    let settled = sim.run_until(timeout_ms, |bank, _| bank.module(ch).is_some_and(settled))?;
    if !settled {
        warn!("Motor {} still moving after {} ms", ch, timeout_ms);
        return Err("script step timed out".into());
    }
    Ok(())
}

fn settled(module: &Module) -> bool {
    module.state() != ModuleState::ReferenceRun && module.motor().is_some_and(|m| m.is_idle())
}

fn drain_reports(sim: &mut Simulation) {
    for (ch, report) in sim.hw.take_reports() {
        info!("Motor {} report: {:?}", ch, report);
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
