//! Interval timer that raises the preemption signal.

use core::mem::MaybeUninit;
use core::ptr;
use core::time::Duration;
use std::io;

use super::preempt::{PREEMPT_SIGNAL, preempt};
use crate::config::Config;
use crate::error::Error;

/// Preemption handler installation for one scheduler run.
///
/// Dropping it disarms the timer and puts back the signal disposition and
/// mask the thread had before.
pub(crate) struct PreemptionTimer {
    quantum: Option<libc::timeval>,
    previous_action: libc::sigaction,
    previous_mask: libc::sigset_t,
}

fn timeval(duration: Duration) -> libc::timeval {
    let mut tv = libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    };
    if tv.tv_sec == 0 && tv.tv_usec == 0 {
        // Sub-microsecond quantum; a zero value would disarm the timer.
        tv.tv_usec = 1;
    }
    tv
}

impl PreemptionTimer {
    // The handler is installed even for cooperative runs, so a stray or
    // forwarded tick still lands in `preempt`.
    pub fn install(config: &Config) -> Result<Self, Error> {
        let quantum = config.preemptive().then(|| timeval(config.quantum));

        unsafe {
            let mut action = MaybeUninit::<libc::sigaction>::zeroed().assume_init();
            action.sa_sigaction = preempt as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            // The handler may leave through a context switch instead of
            // returning, so the kernel must not keep the signal blocked.
            action.sa_flags = libc::SA_RESTART | libc::SA_NODEFER;

            let mut previous_action = MaybeUninit::<libc::sigaction>::zeroed().assume_init();
            if libc::sigaction(PREEMPT_SIGNAL, &action, &mut previous_action) != 0 {
                return Err(Error::Timer(io::Error::last_os_error()));
            }

            let mut set = MaybeUninit::<libc::sigset_t>::uninit();
            libc::sigemptyset(set.as_mut_ptr());
            libc::sigaddset(set.as_mut_ptr(), PREEMPT_SIGNAL);
            let mut previous_mask = MaybeUninit::<libc::sigset_t>::uninit();
            let rc = libc::pthread_sigmask(libc::SIG_UNBLOCK, set.as_ptr(), previous_mask.as_mut_ptr());
            if rc != 0 {
                libc::sigaction(PREEMPT_SIGNAL, &previous_action, ptr::null_mut());
                return Err(Error::Timer(io::Error::from_raw_os_error(rc)));
            }

            Ok(PreemptionTimer {
                quantum,
                previous_action,
                previous_mask: previous_mask.assume_init(),
            })
        }
    }

    fn set(&self, interval: libc::timeval) -> io::Result<()> {
        let value = libc::itimerval {
            it_interval: interval,
            it_value: interval,
        };
        if unsafe { libc::setitimer(libc::ITIMER_REAL, &value, ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Starts a fresh quantum that keeps firing until disarmed.
    pub fn arm(&self) {
        let Some(quantum) = self.quantum else {
            return;
        };
        if let Err(err) = self.set(quantum) {
            log::warn!("[sched] cannot arm preemption timer, slice runs unpreempted: {}", err);
        }
    }

    pub fn disarm(&self) {
        if self.quantum.is_none() {
            return;
        }
        let zero = libc::timeval { tv_sec: 0, tv_usec: 0 };
        if let Err(err) = self.set(zero) {
            log::warn!("[sched] cannot disarm preemption timer: {}", err);
        }
    }
}

impl Drop for PreemptionTimer {
    fn drop(&mut self) {
        self.disarm();
        unsafe {
            libc::sigaction(PREEMPT_SIGNAL, &self.previous_action, ptr::null_mut());
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous_mask, ptr::null_mut());
        }
    }
}
