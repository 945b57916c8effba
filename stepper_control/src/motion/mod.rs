//! Motion core of one motor: parameter sets, step generator, planner and
//! encoder consistency checker.
//!
//! ## Concurrency
//!
//! | Part                    | Writer                 | Reader        |
//! |-------------------------|------------------------|---------------|
//! | [`IsrState`]            | step generator         | task loop     |
//! | [`Requests`]            | task loop              | step generator|
//! | active parameter set    | never while running    | step generator|
//! | other parameter sets    | planner                | step generator after a switch |
//!
//! The step generator picks up requests only at half-step boundaries.

pub mod encoder;
pub mod isr;
pub mod params;
pub mod planner;
pub mod state;

use stepper_common::config::{ModuleConfig, PositionCodeConfig};
use stepper_common::consts::{MICROSTEPS_PER_HALFSTEP, POSITION_CODE_COUNT};
use stepper_common::error::ConfigError;
use stepper_common::hal::EncoderInput;

pub use encoder::{EncoderSetup, EncoderStepLossState, EncoderVerdict};
pub use params::{Chain, MotionGoal, ParamSetSwitch, PhaseParameterSet, SET_COUNT};
pub use planner::{PositionOutcome, SpeedOutcome};
pub use state::{IsrState, MotionEvents, MotionState, Requests, StopRequest};

use crate::profile::{ProfileTable, TimerTiming, check_profiles_timing};
use crate::units::Fx;

const MICRO: i64 = MICROSTEPS_PER_HALFSTEP as i64;

/// Immutable per-motor data derived from a validated configuration.
#[derive(Debug, Clone)]
pub struct MotorSetup {
    /// Timer compare channel.
    pub channel: u8,
    pub halfsteps_per_rev: i64,
    /// Rotary span in half-steps, 0 for linear axes.
    pub rotary_span: i64,
    pub encoder: Option<EncoderSetup>,
    pub timing: TimerTiming,
    pub profiles: ProfileTable,
    pub position_codes: [PositionCodeConfig; POSITION_CODE_COUNT],
}

impl MotorSetup {
    /// Evaluate profiles and check them against the timer.
    ///
    /// The configuration must already be validated.
    pub fn new(channel: u8, cfg: &ModuleConfig, timing: TimerTiming) -> Result<Self, ConfigError> {
        let profiles = ProfileTable::new(&cfg.profiles)?;
        check_profiles_timing(&cfg.profiles, &timing)?;
        Ok(Self {
            channel,
            halfsteps_per_rev: cfg.motor.halfsteps_per_rev as i64,
            rotary_span: cfg.motor.rotary_span as i64,
            encoder: EncoderSetup::from_config(&cfg.encoder, &cfg.motor),
            timing,
            profiles,
            position_codes: cfg.position_codes,
        })
    }

    #[inline]
    pub fn is_rotary(&self) -> bool {
        self.rotary_span > 0
    }

    /// Wrap a half-step position onto the rotary span.
    #[inline]
    pub fn wrap(&self, position: i64) -> i64 {
        if self.is_rotary() { position.rem_euclid(self.rotary_span) } else { position }
    }
}

/// One motor: setup, parameter sets, ISR state and request mailbox.
#[derive(Debug, Clone)]
pub struct Motor {
    pub(crate) setup: MotorSetup,
    pub(crate) sets: [PhaseParameterSet; SET_COUNT],
    pub(crate) isr: IsrState,
    pub(crate) requests: Requests,
}

impl Motor {
    pub fn new(setup: MotorSetup) -> Self {
        Self {
            setup,
            sets: [PhaseParameterSet::default(); SET_COUNT],
            isr: IsrState::default(),
            requests: Requests::default(),
        }
    }

    #[inline]
    pub fn setup(&self) -> &MotorSetup {
        &self.setup
    }

    #[inline]
    pub fn isr(&self) -> &IsrState {
        &self.isr
    }

    #[inline]
    pub fn state(&self) -> MotionState {
        self.isr.state
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.isr.state == MotionState::Idle
    }

    /// Absolute position [half-steps].
    #[inline]
    pub fn position(&self) -> i64 {
        self.isr.abs_pos
    }

    /// Nominal speed [half-steps/s], negative counter-clockwise.
    pub fn speed(&self) -> i32 {
        if self.is_idle() {
            return 0;
        }
        let v: i32 = self.isr.v.saturating_to_num();
        if self.isr.direction.sign() < 0 { -v } else { v }
    }

    #[inline]
    pub fn active_set(&self) -> &PhaseParameterSet {
        &self.sets[self.isr.active as usize]
    }

    #[inline]
    pub fn pending_switch(&self) -> Option<&ParamSetSwitch> {
        self.requests.pending_switch.as_ref()
    }

    /// Take the terminal events raised since the last call.
    pub fn take_events(&mut self) -> MotionEvents {
        std::mem::take(&mut self.isr.events)
    }

    /// Publish the stop condition of the current position code.
    #[inline]
    pub fn set_limit_stop(&mut self, stop: StopRequest) {
        self.requests.limit_stop = stop;
    }

    /// Set the absolute position of an idle motor.
    pub fn set_position(&mut self, position: i64) {
        if !self.is_idle() {
            return;
        }
        let position = self.setup.wrap(position);
        self.isr.abs_pos = position;
        self.isr.micro_pos = position * MICRO;
    }

    /// Align the encoder with the current nominal position.
    pub fn reference_encoder<E: EncoderInput + ?Sized>(&mut self, hw: &mut E) {
        if let Some(setup) = self.setup.encoder {
            let raw = hw.read_encoder(self.setup.channel);
            self.isr.encoder.reference(&setup, raw, self.isr.abs_pos);
        }
    }

    /// Speed at which the active set cruises.
    #[inline]
    pub fn cruise_speed(&self) -> Fx {
        self.active_set().cruise_speed()
    }
}
