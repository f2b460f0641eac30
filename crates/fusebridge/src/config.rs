//! Runtime configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default time allowed for the engine runtime to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of engine worker threads. `None` uses one per core.
    pub worker_threads: Option<u32>,

    /// Upper bound on threads for blocking work. `None` uses the engine default.
    pub max_blocking_threads: Option<u32>,

    /// Time allowed for the runtime to stop when it is dropped.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Checks the thread counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if a thread count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(Error::argument("worker_threads must be at least 1"));
        }
        if self.max_blocking_threads == Some(0) {
            return Err(Error::argument("max_blocking_threads must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for `RuntimeConfig`.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    worker_threads: Option<u32>,
    max_blocking_threads: Option<u32>,
    shutdown_timeout: Option<Duration>,
}

impl RuntimeConfigBuilder {
    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, threads: u32) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Sets the blocking thread limit.
    #[must_use]
    pub fn max_blocking_threads(mut self, threads: u32) -> Self {
        self.max_blocking_threads = Some(threads);
        self
    }

    /// Sets the shutdown timeout used on drop.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> RuntimeConfig {
        RuntimeConfig {
            worker_threads: self.worker_threads,
            max_blocking_threads: self.max_blocking_threads,
            shutdown_timeout: self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}
