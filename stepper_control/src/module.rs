//! Stepper function module: one motor with its limit switches, reference
//! run, life-cycle counters and reporting.
//!
//! ## Module states
//!
//! | State          | Position requests | Speed requests | Entered by                         |
//! |----------------|-------------------|----------------|------------------------------------|
//! | `Unconfigured` | rejected          | rejected       | start-up                           |
//! | `Init`         | rejected          | accepted       | configuration, re-init fault       |
//! | `Ready`        | accepted          | accepted       | successful reference run           |
//! | `ReferenceRun` | rejected          | rejected       | `start_reference_run`              |
//!
//! The task loop ([`Module::poll`]) samples the switches, publishes the stop
//! condition of the current position code, supervises the reference run,
//! turns motion events into reports and keeps the life-cycle counters.

use tracing::{debug, info, warn};

use stepper_common::config::ModuleConfig;
use stepper_common::consts::{LIFECYCLE_FLUSH_INTERVAL_MS, MAX_LIMIT_SWITCHES};
use stepper_common::error::{ConfigError, MotionFault, RequestError};
use stepper_common::hal::{IsrHardware, LifeCycleCounters, TaskHardware};
use stepper_common::report::{Ack, Report};

use crate::lifecycle::LifeCycle;
use crate::motion::{
    MotionEvents, Motor, MotorSetup, PositionOutcome, SpeedOutcome, StopRequest,
};
use crate::profile::TimerTiming;
use crate::refrun::{RefRunState, RefRunTick, ReferenceRun};

// ─── Module State ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleState {
    #[default]
    Unconfigured,
    /// Configured, absolute position unknown.
    Init,
    Ready,
    ReferenceRun,
}

// ─── Limit-Switch Debounce ──────────────────────────────────────────

/// Accepts a level change after `samples` consecutive samples of the new level.
#[derive(Debug, Clone, Copy, Default)]
struct SwitchDebounce {
    level: bool,
    count: u8,
}

impl SwitchDebounce {
    fn sample(&mut self, raw: bool, samples: u8) -> bool {
        if raw == self.level {
            self.count = 0;
        } else {
            self.count = self.count.saturating_add(1);
            if self.count >= samples.max(1) {
                self.level = raw;
                self.count = 0;
            }
        }
        self.level
    }
}

// ─── Module ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Module {
    channel: u8,
    state: ModuleState,
    cfg: ModuleConfig,
    motor: Option<Motor>,
    switches: [SwitchDebounce; MAX_LIMIT_SWITCHES],
    position_code: u8,
    /// An invalid position code has been reported and not yet left.
    code_fault: bool,
    refrun: Option<ReferenceRun>,
    lifecycle: Option<LifeCycle>,
    last_report_ms: u64,
}

impl Module {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            state: ModuleState::Unconfigured,
            cfg: ModuleConfig::default(),
            motor: None,
            switches: [SwitchDebounce::default(); MAX_LIMIT_SWITCHES],
            position_code: 0,
            code_fault: false,
            refrun: None,
            lifecycle: None,
            last_report_ms: 0,
        }
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &ModuleConfig {
        &self.cfg
    }

    #[inline]
    pub fn motor(&self) -> Option<&Motor> {
        self.motor.as_ref()
    }

    /// Debounced position code.
    #[inline]
    pub fn position_code(&self) -> u8 {
        self.position_code
    }

    pub fn lifecycle(&self) -> Option<LifeCycleCounters> {
        self.lifecycle.as_ref().map(LifeCycle::counters)
    }

    /// Step of the reference run in progress.
    pub fn reference_run_state(&self) -> Option<RefRunState> {
        self.refrun.as_ref().map(ReferenceRun::state)
    }

    /// Enable the module with a complete configuration.
    ///
    /// # Errors
    ///
    /// Any validation, profile feasibility or timer compatibility error.
    /// The module keeps its previous configuration on error.
    pub fn configure<H: TaskHardware + ?Sized>(
        &mut self,
        cfg: ModuleConfig,
        timing: TimerTiming,
        hw: &mut H,
        now_ms: u64,
    ) -> Result<(), ConfigError> {
        if self.motor.as_ref().is_some_and(|m| !m.is_idle()) {
            return Err(ConfigError::ValidationError("motor is moving".to_string()));
        }
        cfg.validate()?;
        let setup = MotorSetup::new(self.channel, &cfg, timing)?;

        let mut motor = Motor::new(setup);
        motor.reference_encoder(hw);
        let mut lifecycle =
            LifeCycle::load(hw, self.channel, cfg.motor.halfsteps_per_rev, LIFECYCLE_FLUSH_INTERVAL_MS);
        lifecycle.start(motor.isr().halfsteps_moved, now_ms);

        let levels = hw.switch_levels(self.channel);
        for (i, sw) in self.switches.iter_mut().enumerate() {
            let ls = &cfg.limit_switches[i];
            *sw = SwitchDebounce {
                level: ls.exists && ((levels >> i) & 1 != 0) != ls.inverted,
                count: 0,
            };
        }

        info!(
            "Motor {} configured: {} profiles, {} half-steps/rev{}",
            self.channel,
            cfg.profiles.len(),
            cfg.motor.halfsteps_per_rev,
            if cfg.motor.is_rotary() { ", rotary" } else { "" }
        );
        self.cfg = cfg;
        self.motor = Some(motor);
        self.lifecycle = Some(lifecycle);
        self.refrun = None;
        self.code_fault = false;
        self.last_report_ms = now_ms;
        self.position_code = self.current_code();
        self.state = ModuleState::Init;
        Ok(())
    }

    // ─── Requests ───────────────────────────────────────────────────

    /// Move to an absolute position. Needs a completed reference run.
    pub fn position_request<H: TaskHardware + ?Sized>(
        &mut self,
        target: i64,
        profile: u8,
        hw: &mut H,
    ) -> Result<PositionOutcome, RequestError> {
        match self.state {
            ModuleState::Unconfigured => return Err(RequestError::NotConfigured),
            ModuleState::Init => return Err(RequestError::NotReferenced),
            ModuleState::ReferenceRun => return Err(RequestError::Busy),
            ModuleState::Ready => {}
        }
        let code = self.position_code;
        let motor = self.motor.as_mut().ok_or(RequestError::NotConfigured)?;
        let outcome = motor.position_request(target, profile, code, hw).inspect_err(|e| {
            debug!("Motor {} position request rejected: {}", self.channel, e);
        })?;
        match outcome {
            PositionOutcome::Started => {
                debug!("Motor {} moving to {} with profile {}", self.channel, target, profile);
            }
            PositionOutcome::AlreadyAtTarget => {
                let position = motor.position();
                hw.report(
                    self.channel,
                    Report::MovementDone { position, position_code: code, ack: Ack::Ack },
                );
            }
        }
        Ok(outcome)
    }

    /// Run at a signed speed; 0 decelerates to a stop.
    pub fn speed_request<H: TaskHardware + ?Sized>(
        &mut self,
        speed: i32,
        profile: u8,
        hw: &mut H,
    ) -> Result<SpeedOutcome, RequestError> {
        match self.state {
            ModuleState::Unconfigured => return Err(RequestError::NotConfigured),
            ModuleState::ReferenceRun => return Err(RequestError::Busy),
            ModuleState::Init | ModuleState::Ready => {}
        }
        let code = self.position_code;
        let motor = self.motor.as_mut().ok_or(RequestError::NotConfigured)?;
        let outcome = motor.speed_request(speed, profile, code, hw).inspect_err(|e| {
            debug!("Motor {} speed request rejected: {}", self.channel, e);
        })?;
        if outcome == SpeedOutcome::AlreadyStopped {
            let position = motor.position();
            hw.report(self.channel, Report::SpeedReached { speed: 0, position, ack: Ack::Ack });
        }
        Ok(outcome)
    }

    /// Halt at the next half-step. Returns `false` if nothing was moving.
    pub fn stop_motion(&mut self) -> bool {
        self.motor.as_mut().is_some_and(Motor::stop_motion)
    }

    /// Rotary axes: decelerate from constant speed onto `target`.
    pub fn stop_rotation_at_position(&mut self, target: i64) -> Result<(), RequestError> {
        match self.state {
            ModuleState::Unconfigured => return Err(RequestError::NotConfigured),
            ModuleState::ReferenceRun => return Err(RequestError::Busy),
            ModuleState::Init | ModuleState::Ready => {}
        }
        let motor = self.motor.as_mut().ok_or(RequestError::NotConfigured)?;
        motor.stop_rotation_at_position(target)
    }

    /// Start the homing sequence. Progress is driven by [`Module::poll`].
    pub fn start_reference_run(&mut self) -> Result<(), RequestError> {
        let motor = match self.state {
            ModuleState::Unconfigured => return Err(RequestError::NotConfigured),
            ModuleState::ReferenceRun => return Err(RequestError::Busy),
            ModuleState::Init | ModuleState::Ready => {
                self.motor.as_ref().ok_or(RequestError::NotConfigured)?
            }
        };
        if !motor.is_idle() {
            return Err(RequestError::Busy);
        }
        let approach = self
            .cfg
            .reference_run
            .approach_direction(&self.cfg.position_codes)
            .ok_or(RequestError::NotConfigured)?;
        info!("Motor {} reference run started, approach {:?}", self.channel, approach);
        self.refrun = Some(ReferenceRun::new(self.cfg.reference_run, approach));
        self.state = ModuleState::ReferenceRun;
        Ok(())
    }

    pub fn report_position<H: TaskHardware + ?Sized>(&self, hw: &mut H) {
        let position = self.motor.as_ref().map_or(0, Motor::position);
        hw.report(self.channel, Report::Position { position, position_code: self.position_code });
    }

    pub fn report_speed<H: TaskHardware + ?Sized>(&self, hw: &mut H) {
        let speed = self.motor.as_ref().map_or(0, Motor::speed);
        hw.report(self.channel, Report::Speed { speed });
    }

    // ─── Execution Contexts ─────────────────────────────────────────

    /// Step timer compare match of this module's channel.
    #[inline]
    pub fn on_timer_interrupt<H: IsrHardware + ?Sized>(&mut self, hw: &mut H) {
        match self.motor.as_mut() {
            Some(motor) => motor.on_timer_interrupt(hw),
            None => hw.disable(self.channel),
        }
    }

    /// Task-loop tick.
    pub fn poll<H: TaskHardware + ?Sized>(&mut self, now_ms: u64, hw: &mut H) {
        if self.motor.is_none() {
            return;
        }
        self.sample_switches(hw);
        self.supervise_reference_run(now_ms, hw);
        self.report_events(hw);
        self.report_periodic(now_ms, hw);
        self.update_lifecycle(now_ms, hw);
    }

    fn current_code(&self) -> u8 {
        self.switches
            .iter()
            .enumerate()
            .fold(0, |code, (i, sw)| code | ((sw.level as u8) << i))
    }

    fn sample_switches<H: TaskHardware + ?Sized>(&mut self, hw: &mut H) {
        let levels = hw.switch_levels(self.channel);
        for (i, sw) in self.switches.iter_mut().enumerate() {
            let ls = &self.cfg.limit_switches[i];
            let raw = ls.exists && (((levels >> i) & 1 != 0) != ls.inverted);
            sw.sample(raw, ls.debounce_samples);
        }
        let code = self.current_code();
        if code != self.position_code {
            debug!("Motor {} position code {} -> {}", self.channel, self.position_code, code);
        }
        self.position_code = code;

        let pc = self.cfg.position_codes.get(code as usize);
        if let Some(motor) = self.motor.as_mut() {
            motor.set_limit_stop(StopRequest::from_code(pc));
        }

        let valid = pc.is_some_and(|c| c.valid);
        if valid {
            self.code_fault = false;
        } else if !self.code_fault {
            self.code_fault = true;
            warn!("Motor {} invalid position code {}", self.channel, code);
            hw.report(
                self.channel,
                Report::Fault { fault: MotionFault::INVALID_POSCODE, position_code: code },
            );
            if self.state == ModuleState::Ready {
                self.state = ModuleState::Init;
            }
        }
    }

    fn supervise_reference_run<H: TaskHardware + ?Sized>(&mut self, now_ms: u64, hw: &mut H) {
        let (Some(run), Some(motor)) = (self.refrun.as_mut(), self.motor.as_mut()) else {
            return;
        };
        let events = motor.take_events();
        if !events.is_empty() {
            debug!("Motor {} reference run motion events {:?}", self.channel, events);
        }
        match run.tick(motor, self.position_code, now_ms, hw) {
            RefRunTick::InProgress => {}
            RefRunTick::Done { position } => {
                motor.set_position(position);
                motor.reference_encoder(hw);
                info!("Motor {} referenced at {}", self.channel, position);
                hw.report(self.channel, Report::ReferenceRunDone { position, ack: Ack::Ack });
                self.refrun = None;
                self.state = ModuleState::Ready;
            }
            RefRunTick::Failed(fault) => {
                let position = motor.position();
                warn!("Motor {} reference run failed: {:?}", self.channel, fault);
                hw.report(self.channel, Report::ReferenceRunDone { position, ack: Ack::Nack(fault) });
                self.refrun = None;
                self.state = ModuleState::Init;
            }
        }
    }

    fn report_events<H: TaskHardware + ?Sized>(&mut self, hw: &mut H) {
        let Some(motor) = self.motor.as_mut() else {
            return;
        };
        let events = motor.take_events();
        let position = motor.position();
        let position_code = self.position_code;

        if events.contains(MotionEvents::TARGET_SPEED) {
            hw.report(
                self.channel,
                Report::SpeedReached { speed: motor.speed(), position, ack: Ack::Ack },
            );
        }
        if events.contains(MotionEvents::TARGET_POSITION) {
            debug!("Motor {} at target {}", self.channel, position);
            hw.report(self.channel, Report::MovementDone { position, position_code, ack: Ack::Ack });
        }
        if events.contains(MotionEvents::HALTED) {
            let fault = motor.isr().fault;
            let ack = if fault.is_empty() {
                Ack::Ack
            } else {
                warn!("Motor {} halted at {}: {:?}", self.channel, position, fault);
                Ack::Nack(fault)
            };
            hw.report(self.channel, Report::Stopped { position, position_code, ack });
            if fault.requires_reinit() && self.state == ModuleState::Ready {
                self.state = ModuleState::Init;
            }
        }
    }

    fn report_periodic<H: TaskHardware + ?Sized>(&mut self, now_ms: u64, hw: &mut H) {
        let interval = self.cfg.motor.report_interval_ms as u64;
        let moving = self.motor.as_ref().is_some_and(|m| !m.is_idle());
        if interval == 0 || !moving || now_ms.saturating_sub(self.last_report_ms) < interval {
            return;
        }
        self.last_report_ms = now_ms;
        self.report_position(hw);
    }

    fn update_lifecycle<H: TaskHardware + ?Sized>(&mut self, now_ms: u64, hw: &mut H) {
        let (Some(lc), Some(motor)) = (self.lifecycle.as_mut(), self.motor.as_ref()) else {
            return;
        };
        lc.update(motor.isr().halfsteps_moved, !motor.is_idle(), now_ms);
        if lc.flush_due(now_ms) {
            match lc.flush(hw, self.channel, now_ms) {
                Ok(()) => debug!("Motor {} life-cycle counters flushed", self.channel),
                Err(e) => warn!("Motor {} life-cycle flush failed: {}", self.channel, e),
            }
        }
    }
}
