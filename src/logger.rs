//! Stderr backend for the `log` facade.

use log::{LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};

use crate::task::without_preemption;

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Tasks share the thread, and with it stderr's lock: a task
        // suspended mid-write must not let another one in.
        without_preemption(|| {
            let _ = writeln!(io::stderr().lock(), "[{:<5}] {}", record.level(), record.args());
        });
    }

    fn flush(&self) {}
}

/// Installs the logger. Later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
