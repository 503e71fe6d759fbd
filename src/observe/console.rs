//! A minimal [log] backend printing to stdout.
//! `println!` locks stdout for the whole line, so lines from different threads never mix.

use std::{
    io::{self, Write},
    thread,
};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: ConsoleLogger = ConsoleLogger;

pub struct ConsoleLogger;

impl ConsoleLogger {
    /// can only succeed once per process
    pub fn install(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let current = thread::current();
        println!(
            "{:<5} [{}] {}",
            record.level(),
            current.name().unwrap_or("-"),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
