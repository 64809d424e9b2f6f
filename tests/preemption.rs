use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;
use std::env;
use std::os::unix::process::ExitStatusExt;
use std::panic;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use coop_sched::task::{self, TaskArg, TaskFn};
use coop_sched::testing::test_runner;
use coop_sched::{Config, Error};

const QUANTUM: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(10);

static PROGRESS: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
static SWITCHES: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
static DONE: [AtomicBool; 2] = [AtomicBool::new(false), AtomicBool::new(false)];
static STATE_INTACT: [AtomicBool; 2] = [AtomicBool::new(false), AtomicBool::new(false)];
static TIMED_OUT: AtomicBool = AtomicBool::new(false);

static BUMPS: AtomicUsize = AtomicUsize::new(0);
static OBSERVED: Mutex<Option<(usize, usize, usize)>> = Mutex::new(None);

static LINES: Mutex<Vec<usize>> = Mutex::new(Vec::new());

static PANIC_REPORTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static SURVIVORS: AtomicUsize = AtomicUsize::new(0);

static WAITER_STARTED: AtomicBool = AtomicBool::new(false);
static OTHER_RAN: AtomicBool = AtomicBool::new(false);

// Set in the environment of a re-executed copy of this binary.
const WRONG_SIGNAL_CHILD: &str = "COOP_SCHED_WRONG_SIGNAL_CHILD";

fn main() {
    if env::var_os(WRONG_SIGNAL_CHILD).is_some() {
        task::preempt(libc::SIGUSR1);
        return;
    }

    task::configure(Config::new().with_quantum(QUANTUM)).unwrap();
    test_runner(&[
        &test_spinning_tasks_are_interleaved_by_the_timer,
        &test_sole_task_survives_repeated_preemption,
        &test_tick_inside_deferred_section_waits_for_its_end,
        &test_sleeping_tasks_share_the_thread,
        &test_panics_under_preemption_stay_contained,
        &test_wrong_signal_number_aborts,
        &test_foreign_thread_is_refused,
        &test_tick_raised_on_another_thread_is_forwarded,
    ]);
}

/// Spins without ever yielding, accumulating a running sum in locals, until
/// it has seen the other spinner make progress three separate times.
fn spinner(arg: TaskArg) {
    let me = arg as usize;
    let other = 1 - me;
    let deadline = Instant::now() + DEADLINE;

    let mut n: u64 = 0;
    let mut sum: u64 = 0;
    let mut switches = 0;
    let mut last_seen = PROGRESS[other].load(Ordering::SeqCst);

    while switches < 3 && !DONE[other].load(Ordering::SeqCst) {
        if Instant::now() >= deadline {
            TIMED_OUT.store(true, Ordering::SeqCst);
            break;
        }
        n += 1;
        sum += n;
        PROGRESS[me].fetch_add(1, Ordering::SeqCst);

        let seen = PROGRESS[other].load(Ordering::SeqCst);
        if seen != last_seen {
            switches += 1;
            last_seen = seen;
        }
    }

    SWITCHES[me].store(switches, Ordering::SeqCst);
    STATE_INTACT[me].store(sum == n * (n + 1) / 2, Ordering::SeqCst);
    DONE[me].store(true, Ordering::SeqCst);
}

fn test_spinning_tasks_are_interleaved_by_the_timer() {
    for i in 0..2 {
        PROGRESS[i].store(0, Ordering::SeqCst);
        SWITCHES[i].store(0, Ordering::SeqCst);
        DONE[i].store(false, Ordering::SeqCst);
        STATE_INTACT[i].store(false, Ordering::SeqCst);
    }
    TIMED_OUT.store(false, Ordering::SeqCst);

    task::create(Some(spinner as TaskFn), 0usize as TaskArg).unwrap();
    task::create(Some(spinner as TaskFn), 1usize as TaskArg).unwrap();
    task::execute().unwrap();

    assert!(!TIMED_OUT.load(Ordering::SeqCst), "spinners were never preempted");
    assert_eq!(SWITCHES[0].load(Ordering::SeqCst), 3);
    assert!(SWITCHES[1].load(Ordering::SeqCst) >= 2);
    assert!(STATE_INTACT[0].load(Ordering::SeqCst));
    assert!(STATE_INTACT[1].load(Ordering::SeqCst));
}

fn test_sole_task_survives_repeated_preemption() {
    STATE_INTACT[0].store(false, Ordering::SeqCst);

    task::spawn(|| {
        let start = Instant::now();
        let mut n: u64 = 0;
        let mut sum: u64 = 0;
        let mut squares: u64 = 0;
        while start.elapsed() < QUANTUM * 10 {
            n += 1;
            sum += n;
            squares = squares.wrapping_add(n * n);
        }
        let expected_squares = (1..=n).fold(0u64, |acc, k| acc.wrapping_add(k * k));
        STATE_INTACT[0].store(
            sum == n * (n + 1) / 2 && squares == expected_squares,
            Ordering::SeqCst,
        );
    })
    .unwrap();
    task::execute().unwrap();

    assert!(STATE_INTACT[0].load(Ordering::SeqCst));
}

fn holder(_: TaskArg) {
    let before = BUMPS.load(Ordering::SeqCst);
    let during = task::without_preemption(|| {
        let start = Instant::now();
        while start.elapsed() < QUANTUM * 5 {
            spin_loop();
        }
        BUMPS.load(Ordering::SeqCst)
    });
    let after = BUMPS.load(Ordering::SeqCst);
    task::without_preemption(|| *OBSERVED.lock() = Some((before, during, after)));
}

fn bumper(_: TaskArg) {
    BUMPS.fetch_add(1, Ordering::SeqCst);
}

fn test_tick_inside_deferred_section_waits_for_its_end() {
    BUMPS.store(0, Ordering::SeqCst);
    *OBSERVED.lock() = None;

    task::create(Some(holder as TaskFn), core::ptr::null_mut()).unwrap();
    task::create(Some(bumper as TaskFn), core::ptr::null_mut()).unwrap();
    task::execute().unwrap();

    // Nothing else ran inside the section; the pending tick handed the
    // thread to the bumper as soon as it ended.
    assert_eq!(*OBSERVED.lock(), Some((0, 0, 1)));
}

fn sleeper(arg: TaskArg) {
    let me = arg as usize;
    for _ in 0..5 {
        task::without_preemption(|| LINES.lock().push(me));
        thread::sleep(QUANTUM * 2);
    }
}

fn test_sleeping_tasks_share_the_thread() {
    LINES.lock().clear();
    let start = Instant::now();

    task::create(Some(sleeper as TaskFn), 0usize as TaskArg).unwrap();
    task::create(Some(sleeper as TaskFn), 1usize as TaskArg).unwrap();
    task::execute().unwrap();

    let lines = LINES.lock();
    assert_eq!(lines.iter().filter(|&&who| who == 0).count(), 5);
    assert_eq!(lines.iter().filter(|&&who| who == 1).count(), 5);
    assert!(start.elapsed() >= QUANTUM * 10);
}

fn test_panics_under_preemption_stay_contained() {
    PANIC_REPORTS.lock().clear();
    SURVIVORS.store(0, Ordering::SeqCst);
    task::configure(Config::new().with_quantum(Duration::from_micros(200))).unwrap();

    // Holds a lock across several quanta, so ticks arrive mid-hook.
    let hook = panic::take_hook();
    panic::set_hook(Box::new(|info| {
        let mut reports = PANIC_REPORTS.lock();
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(1) {
            spin_loop();
        }
        reports.push(info.to_string());
    }));

    for n in 0..20usize {
        task::spawn(move || {
            let start = Instant::now();
            while start.elapsed() < Duration::from_millis(5) {
                spin_loop();
            }
            if n % 2 == 0 {
                panic!("task {} failed", n);
            }
            SURVIVORS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    let result = task::execute();

    panic::set_hook(hook);
    task::configure(Config::new().with_quantum(QUANTUM)).unwrap();
    result.unwrap();
    assert_eq!(SURVIVORS.load(Ordering::SeqCst), 10);
    assert_eq!(PANIC_REPORTS.lock().len(), 10);
    assert_eq!(task::task_count(), 0);
}

fn test_wrong_signal_number_aborts() {
    let exe = env::current_exe().unwrap();
    let output = Command::new(exe)
        .env(WRONG_SIGNAL_CHILD, "1")
        .output()
        .unwrap();

    assert_eq!(output.status.signal(), Some(libc::SIGABRT));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("signal other than SIGALRM"), "stderr: {}", stderr);
}

fn test_foreign_thread_is_refused() {
    // Binds the scheduler to this thread.
    assert_eq!(task::task_count(), 0);

    let refused = thread::spawn(|| {
        let create = task::create(Some(bumper as TaskFn), ptr::null_mut());
        let configure = task::configure(Config::new());
        let execute = task::execute();
        (
            matches!(create, Err(Error::ForeignThread)),
            matches!(configure, Err(Error::ForeignThread)),
            matches!(execute, Err(Error::ForeignThread)),
            task::current_task_id().is_none(),
        )
    })
    .join()
    .unwrap();

    assert_eq!(refused, (true, true, true, true));
    assert_eq!(task::task_count(), 0);
}

fn waits_for_other_task(_: TaskArg) {
    WAITER_STARTED.store(true, Ordering::SeqCst);
    let deadline = Instant::now() + DEADLINE;
    while !OTHER_RAN.load(Ordering::SeqCst) {
        if Instant::now() >= deadline {
            TIMED_OUT.store(true, Ordering::SeqCst);
            break;
        }
        spin_loop();
    }
}

fn marks_other_ran(_: TaskArg) {
    OTHER_RAN.store(true, Ordering::SeqCst);
}

fn test_tick_raised_on_another_thread_is_forwarded() {
    WAITER_STARTED.store(false, Ordering::SeqCst);
    OTHER_RAN.store(false, Ordering::SeqCst);
    TIMED_OUT.store(false, Ordering::SeqCst);
    // No timer of our own: the only tick is the one raised by the helper.
    task::configure(Config::new().cooperative()).unwrap();

    let helper = thread::spawn(|| {
        while !WAITER_STARTED.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        unsafe {
            let mut set: libc::sigset_t = core::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGALRM);
            libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, ptr::null_mut());
            libc::raise(libc::SIGALRM);
        }
    });

    task::create(Some(waits_for_other_task as TaskFn), ptr::null_mut()).unwrap();
    task::create(Some(marks_other_ran as TaskFn), ptr::null_mut()).unwrap();
    task::execute().unwrap();
    helper.join().unwrap();
    task::configure(Config::new().with_quantum(QUANTUM)).unwrap();

    assert!(!TIMED_OUT.load(Ordering::SeqCst), "forwarded tick never arrived");
    assert!(OTHER_RAN.load(Ordering::SeqCst));
}
