//! Motor instances sharing one step timer.
//!
//! Compare matches of several channels may be pending at once; they are
//! served in a single pass in increasing channel order, so the worst-case
//! step latency of any motor is bounded by the handlers of the lower
//! channels.

use heapless::Vec;

use stepper_common::consts::MAX_MOTORS;
use stepper_common::error::FatalError;
use stepper_common::hal::{InterruptFlags, IsrHardware, TaskHardware};

use crate::module::Module;

#[derive(Debug, Clone, Default)]
pub struct MotorBank {
    modules: Vec<Module, MAX_MOTORS>,
}

impl MotorBank {
    /// Bank of `count` unconfigured modules on channels `0..count`.
    pub fn new(count: usize) -> Self {
        let modules = (0..count.min(MAX_MOTORS)).map(|ch| Module::new(ch as u8)).collect();
        Self { modules }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[inline]
    pub fn module(&self, channel: u8) -> Option<&Module> {
        self.modules.get(channel as usize)
    }

    #[inline]
    pub fn module_mut(&mut self, channel: u8) -> Option<&mut Module> {
        self.modules.get_mut(channel as usize)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Interrupt flags that belong to a module of this bank.
    pub fn known_flags(&self) -> InterruptFlags {
        (0..self.modules.len() as u8)
            .filter_map(InterruptFlags::channel)
            .fold(InterruptFlags::empty(), |acc, f| acc | f)
    }

    /// Shared step-timer interrupt.
    ///
    /// # Errors
    ///
    /// [`FatalError::TimerOverload`] when the flags name no module or a
    /// channel outside the bank. The timer is stopped before returning.
    pub fn on_timer_interrupt<H: IsrHardware + ?Sized>(
        &mut self,
        flags: InterruptFlags,
        hw: &mut H,
    ) -> Result<(), FatalError> {
        if flags.is_empty() || !self.known_flags().contains(flags) {
            hw.stop();
            return Err(FatalError::TimerOverload { flags: flags.bits() });
        }
        for module in self.modules.iter_mut() {
            if InterruptFlags::channel(module.channel()).is_some_and(|f| flags.contains(f)) {
                module.on_timer_interrupt(hw);
            }
        }
        Ok(())
    }

    /// Task-loop tick of every module.
    pub fn poll<H: TaskHardware + ?Sized>(&mut self, now_ms: u64, hw: &mut H) {
        for module in self.modules.iter_mut() {
            module.poll(now_ms, hw);
        }
    }
}
