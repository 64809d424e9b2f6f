//! Demo: five tasks print and sleep; the preemption timer interleaves them.
//! Their stacks come from a dedicated arena whose usage is reported at exit.
//!
//! Set `COOP_SCHED_LOG` (`error`..`trace`) to see the scheduler's own log.

use std::env;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use coop_sched::config::STACK_SIZE;
use coop_sched::memory::{ArenaStacks, page_size};
use coop_sched::{logger, task};
use log::LevelFilter;

static NAMES: [&str; 5] = ["hello", "world", "love", "this", "course!"];

const ROUNDS: u32 = 100;
const PAUSE: Duration = Duration::from_millis(20);

fn greeter(arg: task::TaskArg) {
    let name = unsafe { *arg.cast::<&'static str>() };
    for i in 0..ROUNDS {
        task::without_preemption(|| println!("{} {}", name, i));
        thread::sleep(PAUSE);
    }
}

fn main() -> ExitCode {
    let level = env::var("COOP_SCHED_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::Info);
    logger::init(level);

    // One page of slack per stack for alignment, one for the allocator.
    let arena = ArenaStacks::leak((NAMES.len() + 1) * (STACK_SIZE + page_size()));
    if let Err(err) = task::set_stack_allocator(arena) {
        log::error!("cannot use stack arena: {}", err);
        return ExitCode::FAILURE;
    }

    for name in NAMES.iter() {
        let arg = name as *const &'static str as task::TaskArg;
        if let Err(err) = task::create(Some(greeter as task::TaskFn), arg) {
            log::error!("cannot create task {}: {}", name, err);
            return ExitCode::FAILURE;
        }
    }

    match task::execute() {
        Ok(()) => {
            log::info!("stacks: {}", arena.stats());
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("scheduler failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
