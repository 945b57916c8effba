//! Hardware abstraction traits consumed by the motion core.
//!
//! The step generator only touches [`StepTimer`], [`MotorDriver`] and
//! [`EncoderInput`] (bundled as [`IsrHardware`]); everything else is used
//! from the task loop. Implementations must not block.
//!
//! | Trait             | Context   | Constraint                 |
//! |-------------------|-----------|----------------------------|
//! | `StepTimer`       | ISR, task | compare writes only        |
//! | `MotorDriver`     | ISR       | **HARD**, single write     |
//! | `EncoderInput`    | ISR, task | single sampled read        |
//! | `LimitSwitchInput`| task      | raw switch levels          |
//! | `LifeCycleStore`  | task      | may be slow, never in ISR  |
//! | `StatusReporter`  | task      | queue and return           |

use bitflags::bitflags;

use crate::error::StoreError;
use crate::report::Report;

bitflags! {
    /// Compare-match interrupt flags of the shared step timer, one per channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InterruptFlags: u8 {
        const CH0 = 0x01;
        const CH1 = 0x02;
        const CH2 = 0x04;
        const CH3 = 0x08;
    }
}

impl InterruptFlags {
    /// Flag of a single channel, if the channel exists.
    #[inline]
    pub const fn channel(channel: u8) -> Option<Self> {
        match channel {
            0 => Some(Self::CH0),
            1 => Some(Self::CH1),
            2 => Some(Self::CH2),
            3 => Some(Self::CH3),
            _ => None,
        }
    }
}

/// Shared 16-bit step timer with one compare channel per motor.
pub trait StepTimer {
    /// Free-running counter value.
    fn counter(&self) -> u16;
    /// Program the compare value of `channel` and enable its interrupt.
    fn set_compare(&mut self, channel: u8, value: u16);
    /// Disable the compare interrupt of `channel`.
    fn disable(&mut self, channel: u8);
    /// Stop the timer for all channels.
    fn stop(&mut self);
}

/// Physical motor driver.
pub trait MotorDriver {
    /// Drive the coils to micro-step `sin_index` of the sine table.
    fn write_step(&mut self, channel: u8, sin_index: u16);
}

/// Incremental encoder.
pub trait EncoderInput {
    /// Raw sampled tick count. Wraparound is the caller's concern.
    fn read_encoder(&mut self, channel: u8) -> i64;
}

/// Limit-switch inputs.
pub trait LimitSwitchInput {
    /// Raw level of each switch, bit `n` = switch `n` closed.
    fn switch_levels(&mut self, channel: u8) -> u8;
}

/// Life-cycle counters kept in non-volatile storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifeCycleCounters {
    /// Completed motor revolutions.
    pub revolutions: u64,
    /// Time spent moving [ms].
    pub operating_ms: u64,
}

/// Non-volatile store for [`LifeCycleCounters`].
pub trait LifeCycleStore {
    fn load(&mut self, channel: u8) -> LifeCycleCounters;
    fn store(&mut self, channel: u8, counters: &LifeCycleCounters) -> Result<(), StoreError>;
}

/// Outbound status and acknowledgement reports.
pub trait StatusReporter {
    fn report(&mut self, channel: u8, report: Report);
}

/// Everything the step generator touches.
pub trait IsrHardware: StepTimer + MotorDriver + EncoderInput {}

impl<T: StepTimer + MotorDriver + EncoderInput> IsrHardware for T {}

/// Everything the task loop touches.
pub trait TaskHardware:
    StepTimer + EncoderInput + LimitSwitchInput + LifeCycleStore + StatusReporter
{
}

impl<T> TaskHardware for T where
    T: StepTimer + EncoderInput + LimitSwitchInput + LifeCycleStore + StatusReporter
{
}
