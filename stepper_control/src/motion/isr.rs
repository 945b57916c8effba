//! Step generator.
//!
//! Runs on every compare match of the motor's timer channel:
//!
//! 1. Derive the step delay from the nominal speed and advance the compare
//!    register by it (never re-read from the running counter).
//! 2. At a half-step boundary with time to spare, run the encoder check.
//!    While step loss is active it runs at every boundary.
//! 3. Write the next sine index to the driver and advance the nominal
//!    position and phase time, unless step loss is active.
//! 4. At a half-step boundary: life-cycle count, absolute position, target
//!    check confirmed by the encoder, queued parameter-set switch, stop
//!    conditions, phase completion.
//! 5. Evaluate the phase's velocity law for the next delay.
//!
//! Must not block, allocate or log.

use stepper_common::consts::SINE_TABLE_LEN;
use stepper_common::error::MotionFault;
use stepper_common::hal::IsrHardware;
use stepper_common::types::Direction;

use super::encoder::EncoderVerdict;
use super::params::{MotionGoal, ParamSetSwitch};
use super::state::{MotionEvents, MotionState};
use super::{MICRO, Motor};
use crate::profile::Phase;
use crate::units::{Fx, counts_to_secs, step_interval_counts, velocity_at};

impl Motor {
    /// Timer compare-match handler of this motor.
    pub fn on_timer_interrupt<H: IsrHardware + ?Sized>(&mut self, hw: &mut H) {
        let ch = self.setup.channel;
        if self.isr.state == MotionState::Idle {
            hw.disable(ch);
            return;
        }

        let delay = self.step_delay();
        self.isr.compare = self.isr.compare.wrapping_add(delay);
        hw.set_compare(ch, self.isr.compare);

        if self.at_driver_boundary()
            && let Some(enc) = self.setup.encoder
            && (delay as u32 >= self.setup.timing.encoder_time_limit_counts
                || self.isr.encoder.step_loss_detected)
        {
            let raw = hw.read_encoder(ch);
            match self.isr.encoder.check(&enc, raw, self.isr.abs_pos, self.isr.direction) {
                EncoderVerdict::Halt(fault) => {
                    self.halt(hw, fault);
                    return;
                }
                EncoderVerdict::Recovered if self.rests_on_target() => {
                    self.finish(hw, MotionEvents::TARGET_POSITION);
                    return;
                }
                EncoderVerdict::StepAhead { position } => self.correct_position(position),
                EncoderVerdict::Consistent | EncoderVerdict::StepLoss | EncoderVerdict::Recovered => {}
            }
        }

        let sign = self.isr.direction.sign();
        let width = self.isr.step_width as i64;
        self.isr.sin_index =
            (self.isr.sin_index as i64 + sign * width).rem_euclid(SINE_TABLE_LEN as i64) as u16;
        hw.write_step(ch, self.isr.sin_index);

        if self.isr.encoder.step_loss_detected {
            if self.at_driver_boundary() {
                self.check_stop_requests(hw);
            }
            return;
        }

        self.isr.micro_pos += sign * width;
        self.isr.t = self
            .isr
            .t
            .saturating_add(counts_to_secs(delay as u32, self.setup.timing.counts_per_second));

        if self.isr.micro_pos.rem_euclid(MICRO) == 0 && !self.on_halfstep(hw) {
            return;
        }
        self.update_velocity();
    }

    /// Next compare offset, clamped to what the channel can count.
    pub(crate) fn step_delay(&self) -> u16 {
        let timing = &self.setup.timing;
        let counts = step_interval_counts(self.isr.step_width, timing.counts_per_second, self.isr.v);
        counts.clamp(1, timing.max_interval_counts.min(u16::MAX as u32)) as u16
    }

    #[inline]
    fn at_driver_boundary(&self) -> bool {
        self.isr.sin_index as i64 % MICRO == 0
    }

    /// Half-step boundary bookkeeping. Returns `false` once the movement ended.
    fn on_halfstep<H: IsrHardware + ?Sized>(&mut self, hw: &mut H) -> bool {
        self.isr.halfsteps_moved = self.isr.halfsteps_moved.wrapping_add(1);

        let span = self.setup.rotary_span * MICRO;
        if span > 0 {
            if self.isr.micro_pos >= span {
                self.isr.micro_pos -= span;
                self.isr.encoder.note_position_wrap(Direction::Cw);
            } else if self.isr.micro_pos < 0 {
                self.isr.micro_pos += span;
                self.isr.encoder.note_position_wrap(Direction::Ccw);
            }
        }
        self.isr.abs_pos = self.isr.micro_pos / MICRO;

        if let MotionGoal::Position { target_micro } = self.active_goal()
            && self.target_reached(target_micro)
        {
            match self.encoder_at_target(hw) {
                EncoderVerdict::Halt(fault) => {
                    self.halt(hw, fault);
                    return false;
                }
                // Nominal position waits on the target for the rotor.
                EncoderVerdict::StepLoss => {}
                EncoderVerdict::StepAhead { position } => {
                    self.correct_position(position);
                    self.finish(hw, MotionEvents::TARGET_POSITION);
                    return false;
                }
                EncoderVerdict::Consistent | EncoderVerdict::Recovered => {
                    self.finish(hw, MotionEvents::TARGET_POSITION);
                    return false;
                }
            }
        }

        if let Some(switch) = self.requests.pending_switch
            && switch.is_due(self.isr.phase, self.isr.micro_pos)
        {
            self.requests.pending_switch = None;
            self.apply_switch(&switch);
        }

        if !self.check_stop_requests(hw) {
            return false;
        }
        self.complete_phases(hw)
    }

    #[inline]
    fn active_goal(&self) -> MotionGoal {
        self.sets[self.isr.active as usize].goal
    }

    /// Reached, or on linear axes passed after a position correction.
    fn target_reached(&self, target_micro: i64) -> bool {
        if self.isr.encoder.step_loss_detected {
            return false;
        }
        if self.setup.is_rotary() {
            self.isr.micro_pos == target_micro
        } else {
            (target_micro - self.isr.micro_pos) * self.isr.direction.sign() <= 0
        }
    }

    /// Encoder verdict on arrival at the target; consistent without encoder.
    fn encoder_at_target<H: IsrHardware + ?Sized>(&mut self, hw: &mut H) -> EncoderVerdict {
        let Some(enc) = self.setup.encoder else {
            return EncoderVerdict::Consistent;
        };
        let raw = hw.read_encoder(self.setup.channel);
        self.isr.encoder.check(&enc, raw, self.isr.abs_pos, self.isr.direction)
    }

    /// Nominal position held on the target of a position move.
    fn rests_on_target(&self) -> bool {
        self.isr.micro_pos.rem_euclid(MICRO) == 0
            && matches!(self.active_goal(),
                MotionGoal::Position { target_micro } if self.target_reached(target_micro))
    }

    /// Honour `StopMotion` and limit-switch stops. Returns `false` if halted.
    fn check_stop_requests<H: IsrHardware + ?Sized>(&mut self, hw: &mut H) -> bool {
        if self.requests.user_stop {
            self.requests.user_stop = false;
            self.halt(hw, MotionFault::empty());
            return false;
        }
        let limit = self.requests.limit_stop;
        if limit.applies(self.isr.direction) {
            self.halt(hw, limit.fault().unwrap_or(MotionFault::empty()));
            return false;
        }
        true
    }

    fn apply_switch(&mut self, switch: &ParamSetSwitch) {
        self.isr.active = switch.new_set;
        let set = &self.sets[switch.new_set as usize];
        self.isr.state = match set.goal {
            MotionGoal::Position { .. } => MotionState::Position,
            MotionGoal::Speed => MotionState::Speed,
        };
        self.isr.step_width = set.step_width;
        self.isr.direction = set.direction;
        self.isr.hold = false;
        let entry = match switch.new_phase {
            Some(phase) => Some(set.first_active(phase).unwrap_or(phase)),
            // The new set cut the running phase: its successor starts afresh.
            None if set.phase(self.isr.phase).is_skipped() => set.next_active(self.isr.phase),
            None => None,
        };
        if let Some(phase) = entry {
            self.isr.t = Fx::ZERO;
            self.enter_phase(phase);
        }
    }

    /// Walk past every phase whose duration has elapsed.
    fn complete_phases<H: IsrHardware + ?Sized>(&mut self, hw: &mut H) -> bool {
        if self.isr.hold {
            return true;
        }
        loop {
            let set = &self.sets[self.isr.active as usize];
            let param = *set.phase(self.isr.phase);
            if param.is_infinite() || self.isr.t < param.dt {
                return true;
            }
            self.isr.t -= param.dt;

            if let Some(next) = set.next_active(self.isr.phase) {
                self.enter_phase(next);
                continue;
            }
            match (set.goal, set.chain) {
                (MotionGoal::Position { .. }, _) => {
                    // Short of the target after the last phase: keep its end speed.
                    self.isr.hold = true;
                    self.isr.t = param.dt;
                    return true;
                }
                (MotionGoal::Speed, Some(chain)) => {
                    self.isr.active = chain.set;
                    self.isr.direction = chain.direction;
                    self.isr.encoder.reset_for_move();
                    let restart = &self.sets[chain.set as usize];
                    self.isr.step_width = restart.step_width;
                    self.isr.t = Fx::ZERO;
                    let first = restart.first_active(Phase::Start).unwrap_or(Phase::VelConst);
                    self.enter_phase(first);
                    return true;
                }
                (MotionGoal::Speed, None) => {
                    self.finish(hw, MotionEvents::TARGET_SPEED);
                    return false;
                }
            }
        }
    }

    pub(crate) fn enter_phase(&mut self, phase: Phase) {
        self.isr.phase = phase;
        if phase == Phase::VelConst && self.active_goal() == MotionGoal::Speed {
            self.isr.events |= MotionEvents::TARGET_SPEED;
        }
    }

    pub(crate) fn update_velocity(&mut self) {
        let set = &self.sets[self.isr.active as usize];
        let p = set.phase(self.isr.phase);
        let t = if p.is_infinite() { self.isr.t } else { self.isr.t.min(p.dt) };
        self.isr.v = velocity_at(p.v, p.a, p.j, t).max(set.v_floor);
    }

    fn correct_position(&mut self, position: i64) {
        self.isr.abs_pos = position;
        self.isr.micro_pos = position * MICRO;
        self.isr.encoder.corrected();
    }

    fn halt<H: IsrHardware + ?Sized>(&mut self, hw: &mut H, fault: MotionFault) {
        self.isr.fault = fault;
        self.finish(hw, MotionEvents::HALTED);
    }

    fn finish<H: IsrHardware + ?Sized>(&mut self, hw: &mut H, event: MotionEvents) {
        self.isr.state = MotionState::Idle;
        self.isr.events |= event;
        self.isr.v = Fx::ZERO;
        self.isr.hold = false;
        self.requests.pending_switch = None;
        self.requests.user_stop = false;
        hw.disable(self.setup.channel);
    }
}
