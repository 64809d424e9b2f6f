//! Sequential test runner for the integration tests.
//!
//! The scheduler is a process-wide singleton driven by a process-directed
//! signal, so its tests cannot share the default multi-threaded harness.
//! Each file under `tests/` is built with `harness = false` and hands its
//! test functions to [`test_runner`] from `main`:
//!
//! ```ignore
//! fn main() {
//!     coop_sched::testing::test_runner(&[&test_rotation, &test_null_entry]);
//! }
//! ```
//!
//! A failing test panics, which ends the process with a non-zero status.

use std::io::{self, Write};

pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        print!("{}...\t", core::any::type_name::<T>());
        let _ = io::stdout().flush();
        self();
        println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    println!("All {} tests passed", tests.len());
}
