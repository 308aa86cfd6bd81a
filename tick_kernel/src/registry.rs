//! Program registry
//!
//! Maps a program name to the constructor that rebuilds its behavior from
//! persisted options. The registry is assembled once by the host and handed
//! to the kernel every tick.

use crate::process::{Process, ProcessError};
use crate::thread::ThreadFailure;
use kernel_api::KernelError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

type Constructor = Box<dyn Fn(&Value) -> Result<Box<dyn Process>, ProcessError>>;

#[derive(Default)]
pub struct ProcessRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, replacing any earlier constructor
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Box<dyn Process>, ProcessError> + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    /// Builder form of [`ProcessRegistry::register`]
    pub fn with<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Value) -> Result<Box<dyn Process>, ProcessError> + 'static,
    {
        self.register(name, constructor);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds the behavior for `name`
    ///
    /// A constructor that panics is reported as a spawn failure, same as one
    /// that returns an error.
    pub fn construct(&self, name: &str, options: &Value) -> Result<Box<dyn Process>, KernelError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| KernelError::UnknownProgram(name.to_string()))?;
        let reason = match panic::catch_unwind(AssertUnwindSafe(|| constructor(options))) {
            Ok(Ok(process)) => return Ok(process),
            Ok(Err(err)) => err.to_string(),
            Err(payload) => {
                format!("constructor panicked: {}", ThreadFailure::from_panic(payload).message)
            }
        };
        Err(KernelError::SpawnFailed {
            name: name.to_string(),
            reason,
        })
    }
}

impl fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}
