use core::ffi::c_int;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use super::scheduler;
use crate::error::Error;

// The handler may run between any two instructions of a task: it only
// touches atomics and never allocates or logs.
// IDLE: dispatcher (or nothing) running, ticks ignored.
// RUNNING: task code running, suspended in place.
// DEFERRED: inside `without_preemption`, tick held until the section ends.
const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const DEFERRED: u8 = 2;

static MODE: AtomicU8 = AtomicU8::new(IDLE);
static PENDING: AtomicBool = AtomicBool::new(false);
// pthread_t of the owning thread, 0 when unowned.
static OWNER: AtomicUsize = AtomicUsize::new(0);

/// Signal that drives preemption.
pub const PREEMPT_SIGNAL: c_int = libc::SIGALRM;

fn this_thread() -> usize {
    unsafe { libc::pthread_self() as usize }
}

pub(crate) fn claim_thread() -> Result<(), Error> {
    let me = this_thread();
    match OWNER.compare_exchange(0, me, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => Ok(()),
        Err(owner) if owner == me => Ok(()),
        Err(_) => Err(Error::ForeignThread),
    }
}

pub(crate) fn release_thread() {
    OWNER.store(0, Ordering::SeqCst);
}

fn on_owner_thread() -> bool {
    OWNER.load(Ordering::SeqCst) == this_thread()
}

pub(crate) fn enter_task() {
    MODE.store(RUNNING, Ordering::SeqCst);
}

pub(crate) fn leave_task() {
    MODE.store(IDLE, Ordering::SeqCst);
    PENDING.store(false, Ordering::SeqCst);
}

fn relinquish() {
    // A task suspended while unwinding leaves std's per-thread panic state
    // set, and the next task to panic on this thread would abort the
    // process. Hold the tick until the panic is caught.
    if std::thread::panicking() {
        if MODE.load(Ordering::SeqCst) != IDLE {
            PENDING.store(true, Ordering::SeqCst);
        }
        return;
    }
    match MODE.compare_exchange(RUNNING, IDLE, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => {
            if scheduler::suspend_current() {
                // Resumed by the dispatcher.
                enter_task();
            } else {
                MODE.store(RUNNING, Ordering::SeqCst);
            }
        }
        Err(DEFERRED) => PENDING.store(true, Ordering::SeqCst),
        Err(_) => {}
    }
}

fn contract_violation() -> ! {
    const MSG: &[u8] = b"coop_sched: preempt() called with a signal other than SIGALRM\n";
    unsafe {
        libc::write(libc::STDERR_FILENO, MSG.as_ptr().cast(), MSG.len());
    }
    std::process::abort()
}

/// `SIGALRM` handler, also callable from task code with `SIGALRM` to give up
/// the rest of the slice. Any other signal number aborts the process.
pub extern "C" fn preempt(signum: c_int) {
    if signum != PREEMPT_SIGNAL {
        contract_violation();
    }
    if !on_owner_thread() {
        let owner = OWNER.load(Ordering::SeqCst);
        if owner != 0 {
            unsafe {
                libc::pthread_kill(owner as libc::pthread_t, signum);
            }
        }
        return;
    }
    relinquish();
}

/// Gives up the rest of the current slice. A no-op outside task code.
pub fn yield_now() {
    if on_owner_thread() {
        relinquish();
    }
}

/// Runs `f` with timer preemption deferred. Wrap heap, stdio and other
/// non-reentrant locks in this; a tick that arrives meanwhile makes the task
/// yield as soon as `f` returns.
pub fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    let _guard = DeferGuard::enter();
    f()
}

struct DeferGuard {
    outermost: bool,
}

impl DeferGuard {
    fn enter() -> Self {
        let outermost = on_owner_thread()
            && MODE
                .compare_exchange(RUNNING, DEFERRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
        DeferGuard { outermost }
    }
}

impl Drop for DeferGuard {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        MODE.store(RUNNING, Ordering::SeqCst);
        if PENDING.swap(false, Ordering::SeqCst) && !std::thread::panicking() {
            relinquish();
        }
    }
}
