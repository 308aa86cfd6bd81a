//! # Daemon Runtime
//!
//! One loop iteration is one host tick: boot a kernel from the store, make
//! sure `init` exists, run, checkpoint, advance the simulated clock.

use crate::programs::{registry, INIT};
use kernel_api::{HostApi, KernelError};
use logger::{FacadeLog, LogLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use storage::{FileStore, Store, StoreError};
use thiserror::Error;
use tick_kernel::{Kernel, ProcessRegistry, SimHost, TickReport};

/// Store key holding the simulated host's clock and bucket
pub const HOST_KEY: &str = "host";

/// Daemon error types
#[derive(Debug, Error)]
pub enum TickdError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Host state is unreadable: {0}")]
    HostState(#[from] serde_json::Error),
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TickdConfig {
    /// Directory of the file store
    pub store: PathBuf,
    /// Ticks to run before exiting
    pub ticks: u64,
    /// Nominal CPU allowance per tick
    pub cpu_limit: f64,
    /// Overrides the persisted bucket
    pub bucket: Option<f64>,
    /// Print every tick report and debug log entries
    pub verbose: bool,
}

impl Default for TickdConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from("tickd-store"),
            ticks: 100,
            cpu_limit: 20.0,
            bucket: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HostImage {
    tick: u64,
    bucket: f64,
}

/// The daemon
pub struct Tickd {
    config: TickdConfig,
    host: SimHost,
    store: FileStore,
    registry: ProcessRegistry,
    sink: FacadeLog,
    ticks_run: u64,
}

impl Tickd {
    /// Opens the store and restores the simulated host from it
    pub fn new(config: TickdConfig) -> Result<Self, TickdError> {
        let store = FileStore::open(&config.store)?;

        let mut host = SimHost::new(config.cpu_limit);
        if let Some(raw) = store.load(HOST_KEY)? {
            let image: HostImage = serde_json::from_str(&raw)?;
            host = host.with_tick(image.tick).with_bucket(image.bucket);
        }
        if let Some(bucket) = config.bucket {
            host.set_bucket(bucket);
        }

        let level = if config.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };

        Ok(Self {
            config,
            host,
            store,
            registry: registry(),
            sink: FacadeLog::new(level),
            ticks_run: 0,
        })
    }

    /// Runs the configured number of ticks, printing a report for each
    pub fn run(&mut self) -> Result<(), TickdError> {
        for _ in 0..self.config.ticks {
            let report = self.step()?;
            if self.config.verbose || !report.failed_threads().is_empty() {
                println!("{}", report);
            } else {
                println!(
                    "tick {}: {} processes, {} threads, cpu {:.2}/{:.2}",
                    report.tick,
                    report.processes,
                    report.threads,
                    report.budget.used,
                    report.budget.limit
                );
            }
        }
        Ok(())
    }

    /// Runs exactly one tick
    pub fn step(&mut self) -> Result<TickReport, TickdError> {
        let mut kernel = Kernel::boot(&self.host, &self.registry, &mut self.sink, &self.store);
        if let Err(err) = kernel.ensure_process(INIT, Value::Null) {
            log::error!(target: "tickd", "Cannot start {}: {}", INIT, err);
        }
        let report = kernel.run();
        kernel.checkpoint(&mut self.store)?;
        drop(kernel);

        self.host.next_tick();
        self.save_host()?;
        self.ticks_run += 1;
        Ok(report)
    }

    fn save_host(&mut self) -> Result<(), TickdError> {
        let image = HostImage {
            tick: self.host.time().as_u64(),
            bucket: self.host.bucket(),
        };
        self.store.save(HOST_KEY, serde_json::to_string(&image)?)?;
        Ok(())
    }

    pub fn config(&self) -> &TickdConfig {
        &self.config
    }

    pub fn host(&self) -> &SimHost {
        &self.host
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn ticks_run(&self) -> u64 {
        self.ticks_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TickdConfig::default();
        assert_eq!(config.ticks, 100);
        assert_eq!(config.cpu_limit, 20.0);
        assert!(config.bucket.is_none());
        assert!(!config.verbose);
    }

    #[test]
    fn test_host_image_format() {
        let image: HostImage = serde_json::from_str(r#"{"tick": 12, "bucket": 9000.5}"#).unwrap();
        assert_eq!(image.tick, 12);
        assert_eq!(image.bucket, 9000.5);
    }
}
