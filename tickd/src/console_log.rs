//! `log` backend that writes to stderr

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

struct StderrLog;

static LOGGER: StderrLog = StderrLog;

/// Installs the stderr logger; `verbose` also shows kernel trace output
pub fn init(verbose: bool) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(if verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    });
    Ok(())
}

impl Log for StderrLog {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", record.args());
        }
    }

    fn flush(&self) {}
}
