//! # Stepper Control Library
//!
//! Motion core for up to four stepper motors driven by sine commutation
//! from one shared 16-bit step timer. Turns position and speed requests
//! into jerk-limited (S-curve) motion profiles, generates the micro-steps
//! in the timer interrupt, supervises step loss with an optional encoder,
//! honours limit switches and performs reference runs.
//!
//! ## Execution contexts
//!
//! 1. **Timer interrupt** ([`bank::MotorBank::on_timer_interrupt`]): one
//!    micro-step per compare match, phase transitions, encoder checks.
//! 2. **Task loop** ([`bank::MotorBank::poll`]): switch sampling, reference
//!    run supervision, reports and life-cycle counters.
//! 3. **Requests** ([`module::Module`]): validate, plan into a free
//!    parameter set and hand it to the interrupt.
//!
//! All runtime state is pre-allocated; neither context allocates after
//! configuration.
//!
//! ## Units
//!
//! Positions are signed half-steps, speeds half-steps per second. The
//! interrupt advances an internal position in 1/64 half-step units.

pub mod bank;
pub mod config;
pub mod lifecycle;
pub mod module;
pub mod motion;
pub mod profile;
pub mod refrun;
pub mod sim;
pub mod units;
