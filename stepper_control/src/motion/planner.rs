//! Motion planner.
//!
//! Turns position, speed and stop requests into parameter sets.
//!
//! | From       | Request                      | To                          |
//! |------------|------------------------------|-----------------------------|
//! | `Idle`     | position                     | `Position`                  |
//! | `Idle`     | speed ≠ 0                    | `Speed`                     |
//! | `Speed`    | speed, same direction        | `Speed` (queued at cruise)  |
//! | `Speed`    | speed, other direction       | `Speed` (stop, then restart)|
//! | `Speed`    | speed 0                      | `Idle` after deceleration   |
//! | `Position` | speed 0                      | `Speed`, then `Idle`        |
//! | `Speed`    | stop at position (rotary)    | `Position`                  |
//! | any        | `StopMotion`                 | `Idle` at next half-step    |
//!
//! Every rejection happens before a parameter set is touched.

use stepper_common::error::RequestError;
use stepper_common::hal::StepTimer;
use stepper_common::types::Direction;

use super::params::{Chain, MotionGoal, ParamSetSwitch, PhaseParameterSet, SET_COUNT};
use super::state::MotionState;
use super::{MICRO, Motor};
use crate::profile::{Cruise, Phase, ProfileEntry, calc_phase_data};
use crate::units::{Fx, ceil_halfsteps, fx};

/// Accepted position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOutcome {
    Started,
    /// Target equals the current position; nothing to move.
    AlreadyAtTarget,
}

/// Accepted speed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedOutcome {
    /// Movement started from idle.
    Started,
    /// Parameter-set switch queued for the step generator.
    Queued,
    /// Speed 0 while idle.
    AlreadyStopped,
}

impl Motor {
    /// Move to absolute position `target` with profile `profile`.
    ///
    /// `position_code` is the current debounced position code.
    pub fn position_request<T: StepTimer + ?Sized>(
        &mut self,
        target: i64,
        profile: u8,
        position_code: u8,
        timer: &mut T,
    ) -> Result<PositionOutcome, RequestError> {
        let entry = *self.profile(profile)?;
        if !self.is_idle() {
            return Err(RequestError::Busy);
        }

        let target = self.setup.wrap(target);
        let delta = target - self.isr.abs_pos;
        if delta == 0 {
            return Ok(PositionOutcome::AlreadyAtTarget);
        }
        let dir = Direction::of(delta);
        self.check_direction(position_code, dir)?;

        let plan = entry.plan_distance(delta.abs()).map_err(|_| RequestError::PlanningFailed)?;
        let set = PhaseParameterSet::from_plan(
            &plan,
            entry.config.microsteps,
            dir,
            entry.v_min,
            MotionGoal::Position { target_micro: target * MICRO },
        );
        self.start(set, timer)?;
        Ok(PositionOutcome::Started)
    }

    /// Run at signed speed `speed` [half-steps/s]; 0 decelerates to a stop.
    pub fn speed_request<T: StepTimer + ?Sized>(
        &mut self,
        speed: i32,
        profile: u8,
        position_code: u8,
        timer: &mut T,
    ) -> Result<SpeedOutcome, RequestError> {
        let entry = *self.profile(profile)?;
        if !entry.config.fits_speed(speed.unsigned_abs()) {
            return Err(RequestError::ProfileUnfit { speed, profile });
        }

        match self.isr.state {
            MotionState::Idle => {
                if speed == 0 {
                    return Ok(SpeedOutcome::AlreadyStopped);
                }
                let dir = Direction::of(speed as i64);
                self.check_direction(position_code, dir)?;
                let set = self.speed_set(&entry, speed, dir, None)?;
                self.start(set, timer)?;
                Ok(SpeedOutcome::Started)
            }
            MotionState::Position if speed != 0 => Err(RequestError::Busy),
            _ if self.active_set().stopping && speed == 0 => Ok(SpeedOutcome::Queued),
            _ if self.switch_busy() => Err(RequestError::SwitchPending),
            _ if self.active_set().stopping => Err(RequestError::Busy),
            MotionState::Position | MotionState::Speed if speed == 0 => {
                let slot = self.free_slots()[0];
                self.sets[slot as usize] = self.active_set().to_stop(MotionGoal::Speed);
                self.requests.pending_switch = Some(ParamSetSwitch::next_halfstep(slot));
                Ok(SpeedOutcome::Queued)
            }
            MotionState::Position => Err(RequestError::Busy),
            MotionState::Speed => {
                let dir = Direction::of(speed as i64);
                let [first, second] = self.free_slots();
                if dir == self.isr.direction {
                    let from = self.cruise_speed();
                    let set = self.speed_set(&entry, speed, dir, Some(from))?;
                    self.sets[first as usize] = set;
                    self.requests.pending_switch = Some(ParamSetSwitch {
                        old_phase: Some(Phase::VelConst),
                        at_micro: None,
                        new_set: first,
                        new_phase: Some(Phase::AccJerkUp),
                    });
                } else {
                    self.check_direction(position_code, dir)?;
                    let restart = self.speed_set(&entry, speed, dir, None)?;
                    let mut stop = self.active_set().to_stop(MotionGoal::Speed);
                    stop.chain = Some(Chain { set: second, direction: dir });
                    self.sets[second as usize] = restart;
                    self.sets[first as usize] = stop;
                    self.requests.pending_switch = Some(ParamSetSwitch::next_halfstep(first));
                }
                Ok(SpeedOutcome::Queued)
            }
        }
    }

    /// Halt at the next half-step boundary. Returns `false` if already idle.
    pub fn stop_motion(&mut self) -> bool {
        if self.is_idle() {
            return false;
        }
        self.requests.user_stop = true;
        true
    }

    /// Rotary axes at constant speed: decelerate so the motor comes to rest
    /// exactly at `target`.
    pub fn stop_rotation_at_position(&mut self, target: i64) -> Result<(), RequestError> {
        if !self.setup.is_rotary() {
            return Err(RequestError::NotRotary);
        }
        if self.isr.state != MotionState::Speed || self.active_set().stopping {
            return Err(RequestError::NotAtSpeed);
        }
        if self.switch_busy() {
            return Err(RequestError::SwitchPending);
        }

        let target = self.setup.wrap(target);
        let dir = self.isr.direction;
        let active = *self.active_set();
        let decel = ceil_halfsteps(active.stop_distance());
        let trigger = self.setup.wrap(target - dir.sign() * decel);

        let slot = self.free_slots()[0];
        self.sets[slot as usize] = active.to_stop(MotionGoal::Position { target_micro: target * MICRO });
        self.requests.pending_switch = Some(ParamSetSwitch {
            old_phase: Some(Phase::VelConst),
            at_micro: Some(trigger * MICRO),
            new_set: slot,
            new_phase: Some(Phase::DecJerkUp),
        });
        Ok(())
    }

    fn profile(&self, profile: u8) -> Result<&ProfileEntry, RequestError> {
        self.setup.profiles.get(profile).ok_or(RequestError::UnknownProfile(profile))
    }

    /// A switch is queued or a reversal is under way.
    fn switch_busy(&self) -> bool {
        self.requests.pending_switch.is_some() || self.active_set().chain.is_some()
    }

    fn check_direction(&self, position_code: u8, dir: Direction) -> Result<(), RequestError> {
        let code = self
            .setup
            .position_codes
            .get(position_code as usize)
            .filter(|c| c.valid)
            .ok_or(RequestError::InvalidPositionCode(position_code))?;
        if code.rotation.allows(dir) {
            Ok(())
        } else {
            Err(RequestError::DirectionNotAllowed { code: position_code })
        }
    }

    /// The two parameter-set slots not in use by the step generator.
    fn free_slots(&self) -> [u8; 2] {
        let mut free = [0u8; 2];
        let mut n = 0;
        for slot in 0..SET_COUNT as u8 {
            if slot != self.isr.active && n < free.len() {
                free[n] = slot;
                n += 1;
            }
        }
        free
    }

    /// Speed set cruising at `|speed|`, starting from `from` (running) or
    /// from `v_min` with a run-up (idle).
    fn speed_set(
        &self,
        entry: &ProfileEntry,
        speed: i32,
        dir: Direction,
        from: Option<Fx>,
    ) -> Result<PhaseParameterSet, RequestError> {
        let v_cruise = fx(speed.unsigned_abs() as i64).map_err(|_| RequestError::PlanningFailed)?;
        let mut shape = entry.shape().map_err(|_| RequestError::PlanningFailed)?.with_cruise(v_cruise);
        if let Some(v) = from {
            shape.v_start = v;
            shape.run_up = false;
        }
        let plan = calc_phase_data(Cruise::Infinite, &shape).map_err(|_| RequestError::PlanningFailed)?;
        Ok(PhaseParameterSet::from_plan(&plan, entry.config.microsteps, dir, entry.v_min, MotionGoal::Speed))
    }

    /// Load `set` into a free slot and arm the timer.
    fn start<T: StepTimer + ?Sized>(
        &mut self,
        set: PhaseParameterSet,
        timer: &mut T,
    ) -> Result<(), RequestError> {
        let first = set.first_active(Phase::Start).ok_or(RequestError::PlanningFailed)?;
        let slot = self.free_slots()[0];
        self.sets[slot as usize] = set;

        let isr = &mut self.isr;
        isr.active = slot;
        isr.state = match set.goal {
            MotionGoal::Position { .. } => MotionState::Position,
            MotionGoal::Speed => MotionState::Speed,
        };
        isr.direction = set.direction;
        isr.step_width = set.step_width;
        isr.t = Fx::ZERO;
        isr.hold = false;
        isr.events = Default::default();
        isr.fault = Default::default();
        isr.encoder.reset_for_move();
        self.requests.user_stop = false;
        self.requests.pending_switch = None;

        self.enter_phase(first);
        self.update_velocity();

        let delay = self.step_delay();
        self.isr.compare = timer.counter().wrapping_add(delay);
        timer.set_compare(self.setup.channel, self.isr.compare);
        Ok(())
    }
}
