//! Simulated hardware.
//!
//! Implements every hardware trait in software for development and testing
//! without a physical drive:
//!
//! - a 16-bit step timer with one compare channel per motor on a 64-bit
//!   simulation clock
//! - a sine driver whose rotor follows the commanded field, with injectable
//!   stalls that lose whole commutations
//! - an incremental encoder on the rotor
//! - limit switches as position windows on the rotor
//! - an in-memory life-cycle store and a recording status reporter
//!
//! [`Simulation`] drives a [`MotorBank`] on this hardware: compare matches
//! in time order, and the task loop once per millisecond.

use std::ops::RangeInclusive;

use tracing::{debug, warn};

use stepper_common::config::ModuleConfig;
use stepper_common::consts::{
    MAX_LIMIT_SWITCHES, MICROSTEPS_PER_HALFSTEP, SINE_TABLE_LEN, TASK_PERIOD_MS,
    TIMER_COUNTS_PER_SECOND,
};
use stepper_common::error::{FatalError, StoreError};
use stepper_common::hal::{
    EncoderInput, InterruptFlags, LifeCycleCounters, LifeCycleStore, LimitSwitchInput,
    MotorDriver, StatusReporter, StepTimer,
};
use stepper_common::report::Report;

use crate::bank::MotorBank;

const MICRO: i64 = MICROSTEPS_PER_HALFSTEP as i64;
const TABLE: i64 = SINE_TABLE_LEN as i64;

#[derive(Debug, Clone, Copy)]
struct SimEncoder {
    ticks_per_rev: i64,
    halfsteps_per_rev: i64,
    reversed: bool,
}

#[derive(Debug, Clone)]
struct SwitchWindow {
    switch: u8,
    range: RangeInclusive<i64>,
}

/// One simulated motor channel.
#[derive(Debug, Clone, Default)]
struct SimChannel {
    /// Absolute simulation time of the next compare match.
    due: Option<u64>,
    compare: u16,
    steps: u64,
    /// Last sine index written.
    field: u16,
    /// Rotor position in internal micro-steps.
    rotor: i64,
    /// Field travel still to be ignored by a stalled rotor [micro-steps].
    stall: i64,
    encoder: Option<SimEncoder>,
    rotary_span: i64,
    windows: Vec<SwitchWindow>,
    forced_levels: Option<u8>,
    counters: LifeCycleCounters,
    store_writes: u32,
    fail_store: bool,
}

impl SimChannel {
    fn rotor_halfsteps(&self) -> i64 {
        let hs = self.rotor.div_euclid(MICRO);
        if self.rotary_span > 0 { hs.rem_euclid(self.rotary_span) } else { hs }
    }
}

/// Software implementation of all hardware traits.
#[derive(Debug, Clone)]
pub struct SimHardware {
    now: u64,
    counts_per_second: u32,
    running: bool,
    channels: Vec<SimChannel>,
    reports: Vec<(u8, Report)>,
}

impl SimHardware {
    /// Hardware with `channels` motor channels and the default timer rate.
    pub fn new(channels: usize) -> Self {
        Self::with_rate(channels, TIMER_COUNTS_PER_SECOND)
    }

    pub fn with_rate(channels: usize, counts_per_second: u32) -> Self {
        Self {
            now: 0,
            counts_per_second,
            running: true,
            channels: vec![SimChannel::default(); channels],
            reports: Vec::new(),
        }
    }

    /// Apply the motor-side parts of a module configuration to `channel`.
    pub fn configure_channel(&mut self, channel: u8, cfg: &ModuleConfig) {
        let ch = self.channel_mut(channel);
        ch.rotary_span = cfg.motor.rotary_span as i64;
        ch.encoder = cfg.encoder.present.then_some(SimEncoder {
            ticks_per_rev: cfg.encoder.ticks_per_rev as i64,
            halfsteps_per_rev: cfg.motor.halfsteps_per_rev as i64,
            reversed: cfg.encoder.reversed,
        });
    }

    /// Simulation time [timer counts].
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Simulation time [ms].
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.now * 1000 / self.counts_per_second as u64
    }

    #[inline]
    pub fn counts_per_ms(&self) -> u64 {
        (self.counts_per_second / 1000).max(1) as u64
    }

    /// Timer still running (not stopped by an overload).
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn channel_enabled(&self, channel: u8) -> bool {
        self.channel(channel).is_some_and(|c| c.due.is_some())
    }

    pub fn compare(&self, channel: u8) -> u16 {
        self.channel(channel).map_or(0, |c| c.compare)
    }

    /// Sine indices written to the driver so far.
    pub fn steps_written(&self, channel: u8) -> u64 {
        self.channel(channel).map_or(0, |c| c.steps)
    }

    /// Physical rotor position [half-steps], wrapped on rotary channels.
    pub fn rotor_position(&self, channel: u8) -> i64 {
        self.channel(channel).map_or(0, SimChannel::rotor_halfsteps)
    }

    /// Move the rotor without stepping (hand-turning the axis).
    pub fn set_rotor_position(&mut self, channel: u8, halfsteps: i64) {
        self.channel_mut(channel).rotor = halfsteps * MICRO;
    }

    /// Let the rotor ignore the next `commutations` electrical cycles.
    pub fn inject_stall(&mut self, channel: u8, commutations: u32) {
        self.channel_mut(channel).stall += commutations as i64 * TABLE;
    }

    /// Close `switch` while the rotor is within `range` [half-steps].
    pub fn add_switch_window(&mut self, channel: u8, switch: u8, range: RangeInclusive<i64>) {
        self.channel_mut(channel).windows.push(SwitchWindow { switch, range });
    }

    /// Override the raw switch levels, `None` returns to the windows.
    pub fn force_switch_levels(&mut self, channel: u8, levels: Option<u8>) {
        self.channel_mut(channel).forced_levels = levels;
    }

    pub fn set_lifecycle(&mut self, channel: u8, counters: LifeCycleCounters) {
        self.channel_mut(channel).counters = counters;
    }

    pub fn lifecycle(&self, channel: u8) -> LifeCycleCounters {
        self.channel(channel).map(|c| c.counters).unwrap_or_default()
    }

    /// Successful life-cycle writes.
    pub fn store_writes(&self, channel: u8) -> u32 {
        self.channel(channel).map_or(0, |c| c.store_writes)
    }

    pub fn fail_store(&mut self, channel: u8, fail: bool) {
        self.channel_mut(channel).fail_store = fail;
    }

    pub fn reports(&self) -> &[(u8, Report)] {
        &self.reports
    }

    pub fn take_reports(&mut self) -> Vec<(u8, Report)> {
        std::mem::take(&mut self.reports)
    }

    /// Earliest pending compare match.
    pub fn next_due(&self) -> Option<u64> {
        self.channels.iter().filter_map(|c| c.due).min()
    }

    /// Advance to `time` and collect the channels due there.
    ///
    /// Their compare interrupts are consumed; the handler re-arms or
    /// disables them.
    pub fn take_due(&mut self, time: u64) -> InterruptFlags {
        self.now = self.now.max(time);
        let mut flags = InterruptFlags::empty();
        for (i, ch) in self.channels.iter_mut().enumerate() {
            if ch.due.is_some_and(|d| d <= self.now) {
                ch.due = None;
                if let Some(flag) = InterruptFlags::channel(i as u8) {
                    flags |= flag;
                }
            }
        }
        flags
    }

    /// Advance the clock without processing interrupts.
    pub fn advance_to(&mut self, time: u64) {
        self.now = self.now.max(time);
    }

    fn channel(&self, channel: u8) -> Option<&SimChannel> {
        self.channels.get(channel as usize)
    }

    fn channel_mut(&mut self, channel: u8) -> &mut SimChannel {
        let index = channel as usize;
        if index >= self.channels.len() {
            self.channels.resize(index + 1, SimChannel::default());
        }
        &mut self.channels[index]
    }
}

impl StepTimer for SimHardware {
    fn counter(&self) -> u16 {
        self.now as u16
    }

    fn set_compare(&mut self, channel: u8, value: u16) {
        if !self.running {
            return;
        }
        let now = self.now;
        let ch = self.channel_mut(channel);
        let delta = value.wrapping_sub(now as u16);
        ch.compare = value;
        ch.due = Some(now + if delta == 0 { 1 << 16 } else { delta as u64 });
    }

    fn disable(&mut self, channel: u8) {
        self.channel_mut(channel).due = None;
    }

    fn stop(&mut self) {
        self.running = false;
        for ch in &mut self.channels {
            ch.due = None;
        }
    }
}

impl MotorDriver for SimHardware {
    fn write_step(&mut self, channel: u8, sin_index: u16) {
        let ch = self.channel_mut(channel);
        let mut delta = (sin_index as i64 - ch.field as i64).rem_euclid(TABLE);
        if delta > TABLE / 2 {
            delta -= TABLE;
        }
        ch.field = sin_index;
        ch.steps += 1;
        if ch.stall > 0 {
            ch.stall = (ch.stall - delta.abs()).max(0);
        } else {
            ch.rotor += delta;
        }
    }
}

impl EncoderInput for SimHardware {
    fn read_encoder(&mut self, channel: u8) -> i64 {
        let ch = self.channel_mut(channel);
        let Some(enc) = ch.encoder else {
            return 0;
        };
        let ticks = (ch.rotor * enc.ticks_per_rev).div_euclid(enc.halfsteps_per_rev * MICRO);
        if enc.reversed { -ticks } else { ticks }
    }
}

impl LimitSwitchInput for SimHardware {
    fn switch_levels(&mut self, channel: u8) -> u8 {
        let ch = self.channel_mut(channel);
        if let Some(levels) = ch.forced_levels {
            return levels;
        }
        let pos = ch.rotor_halfsteps();
        ch.windows
            .iter()
            .filter(|w| (w.switch as usize) < MAX_LIMIT_SWITCHES && w.range.contains(&pos))
            .fold(0, |levels, w| levels | (1 << w.switch))
    }
}

impl LifeCycleStore for SimHardware {
    fn load(&mut self, channel: u8) -> LifeCycleCounters {
        self.channel_mut(channel).counters
    }

    fn store(&mut self, channel: u8, counters: &LifeCycleCounters) -> Result<(), StoreError> {
        let ch = self.channel_mut(channel);
        if ch.fail_store {
            return Err(StoreError::WriteFailed(format!("channel {channel} write-protected")));
        }
        ch.counters = *counters;
        ch.store_writes += 1;
        Ok(())
    }
}

impl StatusReporter for SimHardware {
    fn report(&mut self, channel: u8, report: Report) {
        self.reports.push((channel, report));
    }
}

/// A motor bank running on simulated hardware.
#[derive(Debug)]
pub struct Simulation {
    pub bank: MotorBank,
    pub hw: SimHardware,
}

impl Simulation {
    pub fn new(bank: MotorBank, hw: SimHardware) -> Self {
        Self { bank, hw }
    }

    /// Run for `ms` milliseconds: every compare match in time order, then
    /// the task loop at each millisecond tick.
    pub fn run_for(&mut self, ms: u64) -> Result<(), FatalError> {
        let step = self.hw.counts_per_ms() * TASK_PERIOD_MS;
        for _ in 0..ms.div_ceil(TASK_PERIOD_MS) {
            let tick_end = self.hw.now() + step;
            while let Some(due) = self.hw.next_due().filter(|d| *d <= tick_end) {
                let flags = self.hw.take_due(due);
                if let Err(e) = self.bank.on_timer_interrupt(flags, &mut self.hw) {
                    warn!("Simulation stopped: {}", e);
                    return Err(e);
                }
            }
            self.hw.advance_to(tick_end);
            let now_ms = self.hw.now_ms();
            self.bank.poll(now_ms, &mut self.hw);
        }
        debug!("Simulated {} ms, t = {} counts", ms, self.hw.now());
        Ok(())
    }

    /// Run until `done` holds, checking after every task tick.
    ///
    /// Returns whether `done` held within `max_ms`.
    pub fn run_until(
        &mut self,
        max_ms: u64,
        mut done: impl FnMut(&MotorBank, &SimHardware) -> bool,
    ) -> Result<bool, FatalError> {
        for _ in 0..max_ms {
            if done(&self.bank, &self.hw) {
                return Ok(true);
            }
            self.run_for(1)?;
        }
        Ok(done(&self.bank, &self.hw))
    }
}
