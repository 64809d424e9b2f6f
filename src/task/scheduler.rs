use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::panic::AssertUnwindSafe;
use lazy_static::lazy_static;
use std::panic;

use super::context::Context;
use super::preempt::{self, without_preemption};
use super::ready_list::ReadyList;
use super::timer::PreemptionTimer;
use super::{Task, TaskArg, TaskFn, TaskId, TaskStatus};
use crate::config::Config;
use crate::error::Error;
use crate::memory::{SYSTEM_STACKS, Stack, StackAllocator};

lazy_static! {
    static ref SCHEDULER: SchedulerCell = SchedulerCell(UnsafeCell::new(Scheduler::new()));
}

struct SchedulerCell(UnsafeCell<Scheduler>);

// Safety: only the thread recorded by `preempt::claim_thread` reaches the
// cell. On that thread the preemption handler touches it only while task
// code runs, and task code touches it only with preemption deferred or
// already given up, so no two borrows overlap.
unsafe impl Sync for SchedulerCell {}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    unsafe { f(&mut *SCHEDULER.0.get()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Suspended,
}

pub(crate) struct Scheduler {
    config: Config,
    stacks: &'static dyn StackAllocator,
    tasks: ReadyList<Task>,
    // Where control goes whenever a task gives up the thread.
    dispatch: Context,
    dispatching: bool,
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            config: Config::default(),
            stacks: &SYSTEM_STACKS,
            tasks: ReadyList::new(),
            dispatch: Context::default(),
            dispatching: false,
        }
    }

    fn is_idle(&self) -> bool {
        !self.dispatching && self.tasks.is_empty()
    }

    fn create(&mut self, entry: TaskFn, arg: TaskArg) -> Result<TaskId, Error> {
        self.tasks.try_reserve().map_err(|_| Error::OutOfMemory)?;
        let stack = Stack::allocate(self.stacks, self.config.stack_size)?;
        let (base, size) = (stack.base(), stack.size());

        let task = Task::new(entry, arg, stack);
        let id = task.id;
        let index = self.tasks.insert_after_current(task);
        // Before the first dispatch the cursor trails the newest record, so
        // the first rotation runs tasks in creation order. Once dispatching,
        // a new task lands right after the one that created it.
        if !self.dispatching {
            self.tasks.set_current(index);
        }

        log::debug!(
            "[sched] created {} ({} byte stack at {:#x})",
            id,
            size,
            base.as_u64()
        );
        Ok(id)
    }

    fn select_next(&self) -> Option<usize> {
        self.tasks.select_next(Task::is_runnable)
    }

    // Switch operands that hand the thread to the task at `index`.
    fn prepare(&mut self, index: usize) -> (*mut Context, *const Context) {
        self.tasks.set_current(index);
        let task = &mut self.tasks[index];
        if task.status == TaskStatus::NotStarted {
            // Safety: the stack belongs to this task alone and lives until
            // shutdown.
            task.context = unsafe { Context::fresh(task.stack.top(), task_trampoline) };
        }
        task.status = TaskStatus::Running;
        (&mut self.dispatch as *mut Context, &task.context as *const Context)
    }

    fn outcome(&self, index: usize) -> (TaskId, Outcome) {
        let task = &self.tasks[index];
        let outcome = match task.status {
            TaskStatus::Terminated => Outcome::Finished,
            _ => Outcome::Suspended,
        };
        (task.id, outcome)
    }

    fn current_entry(&self) -> Option<(TaskFn, TaskArg, TaskId)> {
        let task = &self.tasks[self.tasks.current()?];
        Some((task.entry, task.arg, task.id))
    }

    fn running_task(&self) -> Option<TaskId> {
        let task = &self.tasks[self.tasks.current()?];
        (task.status == TaskStatus::Running).then_some(task.id)
    }

    fn suspend_current(&mut self) -> Option<(*mut Context, *const Context)> {
        let task = self.tasks.current_mut()?;
        if task.status != TaskStatus::Running {
            return None;
        }
        task.status = TaskStatus::Sleeping;
        Some((&mut task.context as *mut Context, &self.dispatch as *const Context))
    }

    fn finish_current(&mut self) -> Option<(*mut Context, *const Context)> {
        let task = self.tasks.current_mut()?;
        task.status = TaskStatus::Terminated;
        Some((&mut task.context as *mut Context, &self.dispatch as *const Context))
    }

    fn shutdown(&mut self) -> usize {
        let mut released = 0;
        self.tasks.clear_from_current(|task| {
            log::trace!("[sched] releasing {} ({:?})", task.id, task.stack);
            drop(task);
            released += 1;
        });
        self.dispatching = false;
        released
    }
}

// First code to run on a task's private stack.
extern "C" fn task_trampoline() -> ! {
    if let Some((entry, arg, id)) = with_scheduler(|s| s.current_entry()) {
        preempt::enter_task();
        let result = panic::catch_unwind(AssertUnwindSafe(|| entry(arg)));
        preempt::leave_task();
        if result.is_err() {
            log::error!("[sched] {} panicked, terminating it", id);
        }
    }

    if let Some((save, load)) = with_scheduler(|s| s.finish_current()) {
        unsafe { Context::switch(save, load) };
    }
    unreachable!("terminated task was resumed");
}

fn transfer(index: usize) -> (TaskId, Outcome) {
    let (save, load) = with_scheduler(|s| s.prepare(index));
    // Safety: `load` is a fresh context on the task's own stack or one the
    // task captured when it was last suspended.
    unsafe { Context::switch(save, load) };
    with_scheduler(|s| s.outcome(index))
}

// False when no task is running; true once the dispatcher resumes the caller.
pub(crate) fn suspend_current() -> bool {
    let Some((save, load)) = with_scheduler(|s| s.suspend_current()) else {
        return false;
    };
    unsafe { Context::switch(save, load) };
    true
}

/// Registers a task that will run `entry(arg)` on its own stack.
pub fn create(entry: Option<TaskFn>, arg: TaskArg) -> Result<TaskId, Error> {
    let Some(entry) = entry else {
        log::warn!("[sched] rejected task without entry routine");
        return Err(Error::NullEntry);
    };
    preempt::claim_thread()?;
    without_preemption(|| with_scheduler(|s| s.create(entry, arg)))
}

/// Registers a closure as a task.
pub fn spawn<F>(f: F) -> Result<TaskId, Error>
where
    F: FnOnce() + 'static,
{
    fn run_closure<F: FnOnce()>(arg: TaskArg) {
        let f = without_preemption(|| unsafe { *Box::from_raw(arg.cast::<F>()) });
        f();
    }

    without_preemption(|| {
        let arg = Box::into_raw(Box::new(f)).cast::<c_void>();
        create(Some(run_closure::<F> as TaskFn), arg)
            .inspect_err(|_| drop(unsafe { Box::from_raw(arg.cast::<F>()) }))
    })
}

/// Runs every registered task to completion, then releases them all.
pub fn execute() -> Result<(), Error> {
    preempt::claim_thread()?;
    let config = without_preemption(|| {
        with_scheduler(|s| {
            if s.dispatching {
                return Err(Error::Busy);
            }
            s.dispatching = true;
            Ok(s.config)
        })
    })?;

    let timer = match PreemptionTimer::install(&config) {
        Ok(timer) => timer,
        Err(err) => {
            with_scheduler(|s| s.dispatching = false);
            return Err(err);
        }
    };
    if config.preemptive() {
        log::info!(
            "[sched] dispatching {} task(s), quantum {:?}",
            with_scheduler(|s| s.tasks.len()),
            config.quantum
        );
    } else {
        log::info!(
            "[sched] dispatching {} task(s) cooperatively",
            with_scheduler(|s| s.tasks.len())
        );
    }

    let mut slices: u64 = 0;
    while let Some(index) = with_scheduler(|s| s.select_next()) {
        timer.arm();
        let (id, outcome) = transfer(index);
        timer.disarm();

        slices += 1;
        log::trace!("[sched] {} {:?}", id, outcome);
        if outcome == Outcome::Finished {
            log::debug!("[sched] {} finished", id);
        }
    }
    drop(timer);

    let released = with_scheduler(|s| s.shutdown());
    preempt::release_thread();
    log::info!(
        "[sched] all tasks terminated after {} slice(s), released {}",
        slices,
        released
    );
    Ok(())
}

/// Replaces the configuration. Only allowed while no task is registered.
pub fn configure(config: Config) -> Result<(), Error> {
    config.validate()?;
    preempt::claim_thread()?;
    without_preemption(|| {
        with_scheduler(|s| {
            if !s.is_idle() {
                return Err(Error::Busy);
            }
            s.config = config;
            Ok(())
        })
    })
}

// Only while idle, so every stack goes back to the allocator it came from.
pub fn set_stack_allocator(stacks: &'static dyn StackAllocator) -> Result<(), Error> {
    preempt::claim_thread()?;
    without_preemption(|| {
        with_scheduler(|s| {
            if !s.is_idle() {
                return Err(Error::Busy);
            }
            s.stacks = stacks;
            Ok(())
        })
    })
}

/// Number of records in the ready list, terminated ones included until the
/// run ends.
pub fn task_count() -> usize {
    if preempt::claim_thread().is_err() {
        return 0;
    }
    without_preemption(|| with_scheduler(|s| s.tasks.len()))
}

pub fn current_task_id() -> Option<TaskId> {
    preempt::claim_thread().ok()?;
    without_preemption(|| with_scheduler(|s| s.running_task()))
}
