//! Completion callbacks for asynchronous entry points.
//!
//! # Contract
//!
//! - Every entry point that returns [`FB_OK`](crate::error::FB_OK) invokes its
//!   callback exactly once, either with a result or with an error.
//! - The callback may run on any runtime worker thread, or synchronously
//!   before the entry point returns.
//! - `result` and `error` point to memory owned by the engine that is only
//!   valid until the callback returns.
//! - Callbacks must not unwind.

use std::ffi::c_void;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::ptr;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{FbErrorInfo, NativeError};

// ============================================================================
// Callback Function Type
// ============================================================================

/// Completion callback.
///
/// # Arguments
///
/// * `result` - Operation-specific result, null on failure
/// * `error` - Error payload, null on success
/// * `user_data` - Value passed to the entry point, returned verbatim
pub type FbCallback =
    unsafe extern "C" fn(result: *const c_void, error: *const FbErrorInfo, user_data: u64);

// ============================================================================
// Payloads
// ============================================================================

/// A successful result that knows how to present itself to a callback.
pub trait CallbackPayload: Send + 'static {
    /// Invoke `callback` with a pointer to this payload.
    ///
    /// Must either invoke the callback exactly once and return `Ok`, or
    /// return `Err` without invoking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be exported.
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError>;
}

impl CallbackPayload for () {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        // SAFETY: the callback contract accepts a null result for void operations
        unsafe { callback(ptr::null(), ptr::null(), user_data) };
        Ok(())
    }
}

impl CallbackPayload for u64 {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        let value = self;
        // SAFETY: value lives on this frame for the whole call
        unsafe { callback(ptr::addr_of!(value).cast(), ptr::null(), user_data) };
        Ok(())
    }
}

impl CallbackPayload for String {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        let bytes = crate::memory::FbBytes::from_slice(self.as_bytes())
            .ok_or_else(|| NativeError::data_frame("string result exceeds 4 GiB"))?;
        // SAFETY: self and bytes live on this frame for the whole call
        unsafe { callback(ptr::addr_of!(bytes).cast(), ptr::null(), user_data) };
        Ok(())
    }
}

// ============================================================================
// Completion Guard
// ============================================================================

/// Owns the right to complete one operation.
///
/// Dropping an undelivered completion (for example because the runtime shut
/// down and cancelled the task) reports a shutdown error, so an accepted
/// operation always reaches its callback.
pub struct Completion {
    callback: FbCallback,
    user_data: u64,
    delivered: bool,
}

impl Completion {
    /// Create a completion for one accepted operation.
    #[must_use]
    pub fn new(callback: FbCallback, user_data: u64) -> Self {
        Self {
            callback,
            user_data,
            delivered: false,
        }
    }

    /// Deliver a result or error.
    pub fn finish<P: CallbackPayload>(mut self, result: Result<P, NativeError>) {
        match result.and_then(|payload| payload.deliver(self.callback, self.user_data)) {
            Ok(()) => self.delivered = true,
            Err(e) => self.fail(&e),
        }
    }

    /// Deliver an error.
    pub fn fail(mut self, error: &NativeError) {
        self.invoke_error(error);
    }

    fn invoke_error(&mut self, error: &NativeError) {
        self.delivered = true;
        let (callback, user_data) = (self.callback, self.user_data);
        // SAFETY: info is valid for the duration of the callback
        error.with_info(|info| unsafe { callback(ptr::null(), info, user_data) });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.delivered {
            tracing::warn!(
                user_data = self.user_data,
                "operation dropped before completion"
            );
            self.invoke_error(&NativeError::shutdown(
                "operation was cancelled because the runtime shut down",
            ));
        }
    }
}

/// Run `future` on `runtime` and report its outcome through `completion`.
///
/// Panics inside the future are caught and reported as `FB_ERR_PANIC`.
pub(crate) fn spawn_completion<F, P>(
    runtime: &Handle,
    operation: &'static str,
    completion: Completion,
    future: F,
) -> JoinHandle<()>
where
    F: Future<Output = Result<P, NativeError>> + Send + 'static,
    P: CallbackPayload,
{
    runtime.spawn(async move {
        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let err = NativeError::panic(payload.as_ref());
                tracing::error!(operation, "engine task panicked: {err}");
                Err(err)
            }
        };
        if let Err(e) = &outcome {
            tracing::debug!(operation, kind = e.kind, "operation failed: {e}");
        }
        completion.finish(outcome);
    })
}
