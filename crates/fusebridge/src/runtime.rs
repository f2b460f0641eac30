//! The engine runtime.

use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use fusebridge_native::{fb_runtime_destroy, fb_runtime_new, fb_session_new, FbRuntime, FbSession};

use crate::config::{RuntimeConfig, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::error::{Error, ErrorKind, Result};
use crate::handle::NativeHandle;
use crate::session::{release_session, Session};

unsafe fn release_runtime(runtime: *mut FbRuntime) {
    // SAFETY: forwarded caller contract
    unsafe { destroy(runtime, DEFAULT_SHUTDOWN_TIMEOUT) };
}

/// # Safety
///
/// `runtime` must be live and exclusively owned by the caller.
unsafe fn destroy(runtime: *mut FbRuntime, timeout: Duration) -> u32 {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    // SAFETY: forwarded caller contract
    unsafe { fb_runtime_destroy(runtime, millis) }
}

struct RuntimeInner {
    handle: NativeHandle<FbRuntime>,
    shutdown_timeout: Duration,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.handle.take() {
            // SAFETY: take() handed over exclusive ownership
            let status = unsafe { destroy(runtime.as_ptr(), self.shutdown_timeout) };
            if let Some(kind) = ErrorKind::from_raw(status) {
                tracing::warn!(%kind, timeout = ?self.shutdown_timeout, "engine runtime did not stop cleanly");
            }
        }
    }
}

/// An engine runtime: the thread pool that executes every operation of its
/// sessions.
///
/// Cloning is cheap and shares the runtime. The native runtime stops when
/// the last clone, and every [`Session`] created from it, is dropped, or
/// earlier on [`shutdown`](Runtime::shutdown).
///
/// Dropping the last reference blocks the current thread for up to the
/// configured shutdown timeout.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Start a runtime with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with
    /// [`ErrorKind::RuntimeInitializationFailed`] if the engine cannot start
    /// its threads.
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Start a runtime with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] for a zero thread count, or
    /// [`Error::Rejected`] if the engine cannot start.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let mut raw: *mut FbRuntime = ptr::null_mut();
        // SAFETY: raw is a valid out pointer
        let status = unsafe {
            fb_runtime_new(
                config.worker_threads.unwrap_or(0),
                config.max_blocking_threads.unwrap_or(0),
                &mut raw,
            )
        };
        if let Some(kind) = ErrorKind::from_raw(status) {
            return Err(Error::Rejected {
                kind,
                operation: "runtime_new",
            });
        }
        tracing::debug!(
            worker_threads = ?config.worker_threads,
            max_blocking_threads = ?config.max_blocking_threads,
            "engine runtime started"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                // SAFETY: raw was just created and is owned by nothing else
                handle: unsafe { NativeHandle::wrap(raw, release_runtime) },
                shutdown_timeout: config.shutdown_timeout,
            }),
        })
    }

    /// Create a session with its own, empty catalog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with [`ErrorKind::InvalidArgument`] after
    /// [`shutdown`](Runtime::shutdown).
    pub fn create_session(&self) -> Result<Session> {
        let mut raw: *mut FbSession = ptr::null_mut();
        // SAFETY: the runtime pointer is live or null; raw is a valid out pointer
        let status = self
            .inner
            .handle
            .with_handle(|runtime| unsafe { fb_session_new(runtime, &mut raw) });
        if let Some(kind) = ErrorKind::from_raw(status) {
            return Err(Error::Rejected {
                kind,
                operation: "create_session",
            });
        }
        // SAFETY: raw was just created and is owned by nothing else
        let handle = unsafe { NativeHandle::wrap(raw, release_session) };
        Ok(Session::new(self.clone(), handle))
    }

    /// Stop the native runtime now.
    ///
    /// Work still pending on any session of this runtime completes with
    /// [`ErrorKind::RuntimeShutdownFailed`]; later operations on those
    /// sessions fail the same way, and [`create_session`](Runtime::create_session)
    /// is rejected. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Native`] with [`ErrorKind::RuntimeShutdownFailed`]
    /// if the runtime did not stop within `timeout`. The runtime is released
    /// either way.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let Some(runtime) = self.inner.handle.take() else {
            return Ok(());
        };
        // SAFETY: take() handed over exclusive ownership
        let status = unsafe { destroy(runtime.as_ptr(), timeout) };
        match ErrorKind::from_raw(status) {
            None => Ok(()),
            Some(kind) => Err(Error::Native {
                kind,
                message: format!("engine runtime did not stop within {timeout:?}"),
            }),
        }
    }

    /// Whether [`shutdown`](Runtime::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.handle.is_released()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("handle", &self.inner.handle)
            .field("shutdown_timeout", &self.inner.shutdown_timeout)
            .finish()
    }
}
