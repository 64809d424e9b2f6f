//! Scheduler configuration.
//!
//! Values are fixed for the duration of a run: the stack size applies to
//! every task created afterwards and the quantum to every slice.

use core::time::Duration;

use crate::error::Error;

/// Usable stack bytes per task.
pub const STACK_SIZE: usize = 64 * 1024;

/// Smallest stack accepted. A preempted task carries a kernel signal frame
/// (several KiB with extended FPU state) on top of its own frames.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Time slice after which a running task is preempted.
pub const QUANTUM: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub stack_size: usize,
    /// `Duration::ZERO` disables timer preemption; tasks then switch only
    /// when they yield or finish.
    pub quantum: Duration,
}

impl Config {
    pub const fn new() -> Self {
        Config {
            stack_size: STACK_SIZE,
            quantum: QUANTUM,
        }
    }

    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub const fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    /// Purely cooperative scheduling: no timer is armed.
    pub const fn cooperative(self) -> Self {
        self.with_quantum(Duration::ZERO)
    }

    pub fn preemptive(&self) -> bool {
        !self.quantum.is_zero()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::Config("stack size below minimum"));
        }
        if self.stack_size % 16 != 0 {
            return Err(Error::Config("stack size must be a multiple of 16"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
