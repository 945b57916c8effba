//! Encoder/position consistency checker.
//!
//! Runs inside the step generator at half-step boundaries and compares the
//! nominal position against the encoder. The deviation is taken in the
//! direction of travel: positive means the motor lags the commanded
//! position.
//!
//! | Deviation              | Verdict                                   |
//! |------------------------|-------------------------------------------|
//! | `|dev| > resolution`   | halt, `DEVIATION_LIMIT`                   |
//! | `dev >= 8`             | step loss, nominal position freezes       |
//! | `dev <= 0` during loss | recovered, nominal position resumes       |
//! | `dev <= -8`            | step ahead, nominal corrected to encoder  |
//!
//! Step loss is counted in lost commutations (8 half-steps). While the loss
//! persists, every further commutation the encoder does not move adds to the
//! count; exceeding the configured limit halts with `STEP_LOSS_LIMIT`.
//!
//! On rotary axes both positions wrap at the span. The first of the two to
//! cross the wrap sets its overflow flag until the other one follows, and the
//! deviation is corrected by one span meanwhile.

use stepper_common::config::{EncoderConfig, MotorConfig};
use stepper_common::consts::HALFSTEPS_PER_COMMUTATION;
use stepper_common::error::MotionFault;
use stepper_common::types::Direction;

/// Encoder geometry derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSetup {
    pub ticks_per_rev: i64,
    pub halfsteps_per_rev: i64,
    /// +1, or -1 when the encoder counts against `Cw`.
    pub sign: i64,
    /// Rotary span in half-steps, 0 for linear axes.
    pub span: i64,
    /// Lost commutations tolerated per movement.
    pub step_loss_limit: u16,
}

impl EncoderSetup {
    pub fn from_config(encoder: &EncoderConfig, motor: &MotorConfig) -> Option<Self> {
        (encoder.present && encoder.ticks_per_rev > 0).then(|| Self {
            ticks_per_rev: encoder.ticks_per_rev as i64,
            halfsteps_per_rev: motor.halfsteps_per_rev as i64,
            sign: if encoder.reversed { -1 } else { 1 },
            span: motor.rotary_span as i64,
            step_loss_limit: motor.step_loss_limit,
        })
    }
}

/// Outcome of one consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderVerdict {
    Consistent,
    /// Step loss active, nominal position must not advance.
    StepLoss,
    /// Encoder caught up, step loss cleared.
    Recovered,
    /// Encoder ahead of nominal; nominal is to be set to `position`.
    StepAhead { position: i64 },
    Halt(MotionFault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderStepLossState {
    /// Encoder position at the last check [half-steps].
    pub last_encoder: i64,
    /// Raw encoder count at the reference point.
    pub ref_raw: i64,
    /// Nominal position assigned to `ref_raw`.
    pub ref_pos: i64,
    pub pos_overflow: bool,
    pub enc_overflow: bool,
    pub overflow_dir: Direction,
    pub step_loss_detected: bool,
    /// Lost commutations in the current movement.
    pub step_loss_count: u16,
    /// Half-steps without encoder progress since the last counted loss.
    lost_halfsteps: i64,
}

impl EncoderStepLossState {
    /// Align the encoder with nominal position `position`.
    pub fn reference(&mut self, setup: &EncoderSetup, raw: i64, position: i64) {
        self.ref_raw = raw;
        self.ref_pos = position;
        self.last_encoder = self.encoder_position(setup, raw);
        self.pos_overflow = false;
        self.enc_overflow = false;
        self.reset_for_move();
    }

    /// Clear step-loss bookkeeping at the start of a movement.
    pub fn reset_for_move(&mut self) {
        self.step_loss_detected = false;
        self.step_loss_count = 0;
        self.lost_halfsteps = 0;
    }

    /// Encoder reading in half-steps, wrapped on rotary axes.
    pub fn encoder_position(&self, setup: &EncoderSetup, raw: i64) -> i64 {
        let ticks = raw.wrapping_sub(self.ref_raw).saturating_mul(setup.halfsteps_per_rev);
        let pos = self.ref_pos + setup.sign * ticks.div_euclid(setup.ticks_per_rev.max(1));
        if setup.span > 0 { pos.rem_euclid(setup.span) } else { pos }
    }

    /// Nominal position crossed the rotary wrap moving in `dir`.
    pub fn note_position_wrap(&mut self, dir: Direction) {
        note_wrap(&mut self.pos_overflow, &mut self.enc_overflow, &mut self.overflow_dir, dir);
    }

    fn note_encoder_wrap(&mut self, dir: Direction) {
        note_wrap(&mut self.enc_overflow, &mut self.pos_overflow, &mut self.overflow_dir, dir);
    }

    /// Nominal position was set to the encoder position.
    pub fn corrected(&mut self) {
        self.pos_overflow = false;
        self.enc_overflow = false;
    }

    /// Compare nominal position `nominal` with encoder count `raw` while
    /// moving in `dir`.
    pub fn check(
        &mut self,
        setup: &EncoderSetup,
        raw: i64,
        nominal: i64,
        dir: Direction,
    ) -> EncoderVerdict {
        let enc = self.encoder_position(setup, raw);
        if setup.span > 0 {
            let jump = enc - self.last_encoder;
            if jump.abs() > setup.span / 2 {
                self.note_encoder_wrap(if jump < 0 { Direction::Cw } else { Direction::Ccw });
            }
        }
        let moved = enc != self.last_encoder;
        self.last_encoder = enc;

        let mut raw_dev = nominal - enc;
        if self.pos_overflow != self.enc_overflow {
            let span = setup.span * self.overflow_dir.sign();
            raw_dev += if self.pos_overflow { span } else { -span };
        }
        let dev = raw_dev * dir.sign();

        if dev.abs() > setup.halfsteps_per_rev {
            return EncoderVerdict::Halt(MotionFault::DEVIATION_LIMIT);
        }

        if self.step_loss_detected {
            if dev <= 0 {
                self.step_loss_detected = false;
                self.lost_halfsteps = 0;
                return EncoderVerdict::Recovered;
            }
            if !moved {
                self.lost_halfsteps += 1;
                if self.lost_halfsteps >= HALFSTEPS_PER_COMMUTATION {
                    self.lost_halfsteps = 0;
                    return self.count_loss(setup, 1);
                }
            }
            return EncoderVerdict::StepLoss;
        }

        if dev >= HALFSTEPS_PER_COMMUTATION {
            self.step_loss_detected = true;
            return self.count_loss(setup, dev / HALFSTEPS_PER_COMMUTATION);
        }
        if dev <= -HALFSTEPS_PER_COMMUTATION {
            return EncoderVerdict::StepAhead { position: enc };
        }
        EncoderVerdict::Consistent
    }

    fn count_loss(&mut self, setup: &EncoderSetup, commutations: i64) -> EncoderVerdict {
        let added = u16::try_from(commutations).unwrap_or(u16::MAX);
        self.step_loss_count = self.step_loss_count.saturating_add(added);
        if self.step_loss_count > setup.step_loss_limit {
            EncoderVerdict::Halt(MotionFault::STEP_LOSS_LIMIT)
        } else {
            EncoderVerdict::StepLoss
        }
    }
}

/// Record a wrap crossing of one position; cancels a pending crossing of
/// the other one in the same direction.
fn note_wrap(own: &mut bool, other: &mut bool, overflow_dir: &mut Direction, dir: Direction) {
    if *other && *overflow_dir == dir {
        *other = false;
    } else if *own && *overflow_dir != dir {
        *own = false;
    } else {
        *own = true;
        *overflow_dir = dir;
    }
}
