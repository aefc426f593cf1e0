//! Console verbosity for `fwgen`, plus the `log` sink for `fwgen-core`.
//!
//! `-q` keeps errors only. The default adds the "Building"/"Checking" lines,
//! placements and library warnings. `-v` adds timings, output paths and the
//! library's `debug` records.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Output verbosity level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    Verbose = 2,
}

/// Global verbosity level, set once at startup.
static VERBOSITY: AtomicU8 = AtomicU8::new(1); // Default

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Initialize the verbosity level and route `log` records to the console.
pub fn init(quiet: bool, verbose: bool) {
    let level = if quiet {
        Verbosity::Quiet
    } else if verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Default
    };
    VERBOSITY.store(level as u8, Ordering::Relaxed);

    // A logger may already be installed when running under a test harness.
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level(level));
    }
}

/// Returns the current verbosity level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

/// Returns `true` if verbose mode is active.
pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

/// Returns `true` if quiet mode is active.
pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

fn max_level(level: Verbosity) -> LevelFilter {
    match level {
        Verbosity::Quiet => LevelFilter::Error,
        Verbosity::Default => LevelFilter::Warn,
        Verbosity::Verbose => LevelFilter::Debug,
    }
}

/// Forwards library records to the console, filtered by verbosity.
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= max_level(verbosity())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error | Level::Warn => {
                eprintln!("{}: {}", record.level().as_str().to_lowercase(), record.args());
            }
            _ => println!("  {}", record.args()),
        }
    }

    fn flush(&self) {}
}

/// `println!` under `-v` only.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// `println!` unless `-q` was given.
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Prints `  <phase>: <elapsed>` when dropped under `-v`.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            let elapsed = self.start.elapsed();
            println!("  {}: {:.1?}", self.label, elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_records_follow_verbosity() {
        assert_eq!(max_level(Verbosity::Quiet), LevelFilter::Error);
        assert_eq!(max_level(Verbosity::Default), LevelFilter::Warn);
        assert_eq!(max_level(Verbosity::Verbose), LevelFilter::Debug);
        assert!(max_level(Verbosity::Verbose) < LevelFilter::Trace);
    }
}
