//! Execution runtime lifecycle.
//!
//! A runtime owns the tokio worker pool on which every asynchronous
//! operation of its sessions runs.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{entry, NativeError, FB_ERR_RUNTIME_INIT};

/// Opaque runtime handle.
///
/// Created by `fb_runtime_new`, freed by `fb_runtime_destroy`.
pub struct FbRuntime {
    runtime: tokio::runtime::Runtime,
}

impl FbRuntime {
    /// Build a multi-threaded runtime. Zero means the engine default.
    ///
    /// # Errors
    ///
    /// Returns `FB_ERR_RUNTIME_INIT` if the worker pool cannot be started.
    pub fn new(worker_threads: u32, max_blocking_threads: u32) -> Result<Self, NativeError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("fusebridge-worker");
        if worker_threads > 0 {
            builder.worker_threads(worker_threads as usize);
        }
        if max_blocking_threads > 0 {
            builder.max_blocking_threads(max_blocking_threads as usize);
        }
        let runtime = builder.build().map_err(|e| {
            tracing::error!("failed to build runtime: {e}");
            NativeError::new(FB_ERR_RUNTIME_INIT, format!("failed to build runtime: {e}"))
        })?;
        Ok(Self { runtime })
    }

    /// Handle for spawning work on this runtime.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Shut down, waiting at most `timeout` for running work to stop.
    ///
    /// The runtime is dropped on a helper thread so that blocking work can
    /// finish without holding up the caller past `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `FB_ERR_RUNTIME_SHUTDOWN` if the runtime has not stopped in time.
    pub fn shutdown(self, timeout: Duration) -> Result<(), NativeError> {
        let (done_tx, done_rx) = mpsc::channel();
        thread::Builder::new()
            .name("fusebridge-shutdown".into())
            .spawn(move || {
                drop(self);
                let _ = done_tx.send(());
            })
            .map_err(|e| NativeError::shutdown(format!("failed to start shutdown thread: {e}")))?;

        done_rx.recv_timeout(timeout).map_err(|_| {
            tracing::warn!(?timeout, "runtime did not shut down in time");
            NativeError::shutdown(format!(
                "runtime did not shut down within {} ms",
                timeout.as_millis()
            ))
        })
    }
}

/// Create a runtime.
///
/// # Arguments
///
/// * `worker_threads` - Worker thread count, 0 for one per core
/// * `max_blocking_threads` - Blocking pool limit, 0 for the default
/// * `out` - Pointer to receive the runtime handle
///
/// # Returns
///
/// `FB_OK` on success, or an error code.
///
/// # Safety
///
/// `out` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn fb_runtime_new(
    worker_threads: u32,
    max_blocking_threads: u32,
    out: *mut *mut FbRuntime,
) -> u32 {
    entry("fb_runtime_new", || {
        if out.is_null() {
            return Err(NativeError::invalid_argument("out is null"));
        }
        let runtime = FbRuntime::new(worker_threads, max_blocking_threads)?;
        // SAFETY: out is non-null (checked above)
        unsafe { *out = Box::into_raw(Box::new(runtime)) };
        Ok(())
    })
}

/// Shut down and free a runtime.
///
/// Pending operations of its sessions are cancelled and complete with
/// `FB_ERR_RUNTIME_SHUTDOWN`.
///
/// # Arguments
///
/// * `runtime` - Runtime to free
/// * `timeout_millis` - How long to wait for running work to stop
///
/// # Returns
///
/// `FB_OK` if the runtime stopped in time, `FB_ERR_RUNTIME_SHUTDOWN` otherwise.
/// The handle is consumed either way.
///
/// # Safety
///
/// `runtime` must be a handle from `fb_runtime_new` that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn fb_runtime_destroy(runtime: *mut FbRuntime, timeout_millis: u64) -> u32 {
    entry("fb_runtime_destroy", || {
        if runtime.is_null() {
            return Err(NativeError::invalid_argument("runtime is null"));
        }
        // SAFETY: runtime was allocated by fb_runtime_new and ownership returns here
        let runtime = unsafe { Box::from_raw(runtime) };
        runtime.shutdown(Duration::from_millis(timeout_millis))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FB_ERR_INVALID_ARGUMENT, FB_ERR_RUNTIME_SHUTDOWN, FB_OK};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_create_and_destroy() {
        let mut rt: *mut FbRuntime = std::ptr::null_mut();
        // SAFETY: valid out pointer
        assert_eq!(unsafe { fb_runtime_new(2, 4, &mut rt) }, FB_OK);
        assert!(!rt.is_null());
        // SAFETY: rt was just created
        assert_eq!(unsafe { fb_runtime_destroy(rt, 1_000) }, FB_OK);
    }

    #[test]
    fn test_null_pointer_checks() {
        // SAFETY: testing null handling
        unsafe {
            assert_eq!(fb_runtime_new(0, 0, std::ptr::null_mut()), FB_ERR_INVALID_ARGUMENT);
            assert_eq!(fb_runtime_destroy(std::ptr::null_mut(), 10), FB_ERR_INVALID_ARGUMENT);
        }
    }

    #[test]
    fn test_shutdown_times_out_on_stuck_blocking_work() {
        let runtime = FbRuntime::new(1, 1).unwrap();
        let release = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));
        {
            let release = Arc::clone(&release);
            let started = Arc::clone(&started);
            runtime.handle().spawn_blocking(move || {
                started.store(true, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            });
        }
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }

        let err = runtime.shutdown(Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind, FB_ERR_RUNTIME_SHUTDOWN);
        release.store(true, Ordering::SeqCst);
    }
}
