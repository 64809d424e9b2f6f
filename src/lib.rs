//! User-level round-robin task scheduler.
//!
//! Several tasks share one thread. Each gets a private stack; the
//! dispatcher switches between them when a task yields, finishes, or runs
//! past its quantum and is interrupted by `SIGALRM`.
//!
//! ```ignore
//! use coop_sched::task;
//!
//! task::spawn(|| for _ in 0..3 { task::yield_now() })?;
//! task::spawn(|| for _ in 0..3 { task::yield_now() })?;
//! task::execute()?;
//! ```

extern crate alloc;

pub mod config;
pub mod error;
pub mod logger;
pub mod memory;
pub mod task;
pub mod testing;

pub use config::Config;
pub use error::Error;
