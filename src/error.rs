use core::fmt;
use std::io;

/// Errors reported by the scheduler's public operations.
#[derive(Debug)]
pub enum Error {
    /// A task was created without an entry routine.
    NullEntry,
    /// The task record or its stack could not be allocated.
    OutOfMemory,
    /// The scheduler is dispatching, or tasks are already registered.
    Busy,
    /// The scheduler is owned by another thread.
    ForeignThread,
    /// A configuration value was rejected.
    Config(&'static str),
    /// The preemption signal handler could not be installed.
    Timer(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NullEntry => write!(f, "task entry routine is missing"),
            Error::OutOfMemory => write!(f, "out of memory while creating task"),
            Error::Busy => write!(f, "scheduler is busy"),
            Error::ForeignThread => write!(f, "scheduler belongs to another thread"),
            Error::Config(reason) => write!(f, "invalid configuration: {}", reason),
            Error::Timer(err) => write!(f, "cannot install preemption timer: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Timer(err) => Some(err),
            _ => None,
        }
    }
}
