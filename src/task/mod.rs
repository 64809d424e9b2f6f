//! Tasks and the round-robin scheduler that runs them.
//!
//! Every task owns a private stack. The dispatcher hands the thread to one
//! task at a time and gets it back when the task finishes, yields, or is
//! interrupted by the preemption timer.

use core::ffi::c_void;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

// Multitasking components
pub mod context;
pub mod preempt;
pub mod ready_list;
pub mod scheduler;
mod timer;

use crate::memory::Stack;
use context::Context;

pub use preempt::{PREEMPT_SIGNAL, preempt, without_preemption, yield_now};
pub use scheduler::{
    configure, create, current_task_id, execute, set_stack_allocator, spawn, task_count,
};

/// Opaque argument handed to a task's entry routine. The scheduler never
/// dereferences or frees it.
pub type TaskArg = *mut c_void;

/// Task entry routine.
pub type TaskFn = fn(TaskArg);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn new() -> Self {
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotStarted,
    Running,
    Sleeping,
    Terminated,
}

/// Task record.
pub(crate) struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub entry: TaskFn,
    pub arg: TaskArg,
    pub stack: Stack,
    /// Meaningful only while `Sleeping`.
    pub context: Context,
}

impl Task {
    pub fn new(entry: TaskFn, arg: TaskArg, stack: Stack) -> Self {
        Task {
            id: TaskId::new(),
            status: TaskStatus::NotStarted,
            entry,
            arg,
            stack,
            context: Context::default(),
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.status != TaskStatus::Terminated
    }
}
