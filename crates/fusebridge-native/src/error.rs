//! Error kinds and the error payload handed to completion callbacks.
//!
//! Every entry point returns one of the `FB_*` status codes synchronously.
//! Asynchronous failures are reported through [`FbErrorInfo`], whose `kind`
//! uses the same discriminants.

use std::any::Any;
use std::fmt::Display;

/// Accepted / success.
pub const FB_OK: u32 = 0;
/// A panic was caught inside the engine.
pub const FB_ERR_PANIC: u32 = 1;
/// A pointer, string or options blob was invalid.
pub const FB_ERR_INVALID_ARGUMENT: u32 = 2;
/// The execution runtime could not be built.
pub const FB_ERR_RUNTIME_INIT: u32 = 3;
/// The execution runtime did not shut down in time, or was already gone.
pub const FB_ERR_RUNTIME_SHUTDOWN: u32 = 4;
/// Registering or deregistering a table failed.
pub const FB_ERR_TABLE_REGISTRATION: u32 = 5;
/// Planning a SQL statement failed.
pub const FB_ERR_SQL: u32 = 6;
/// Executing or exporting a result set failed.
pub const FB_ERR_DATA_FRAME: u32 = 7;

/// Error payload passed to a completion callback.
///
/// `message` points to `message_len` bytes of UTF-8 that are only valid for
/// the duration of the callback. A null `message` means an empty message.
#[repr(C)]
#[derive(Debug)]
pub struct FbErrorInfo {
    /// One of the `FB_ERR_*` codes.
    pub kind: u32,
    /// Message bytes, not NUL-terminated.
    pub message: *const u8,
    /// Length of `message` in bytes.
    pub message_len: u32,
}

/// An engine failure tagged with its `FB_ERR_*` kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct NativeError {
    /// One of the `FB_ERR_*` codes.
    pub kind: u32,
    /// Human-readable description.
    pub message: String,
}

impl NativeError {
    /// Create an error with an explicit kind.
    pub fn new(kind: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Invalid pointer, string or options blob.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FB_ERR_INVALID_ARGUMENT, message)
    }

    /// Table registration failure.
    pub fn registration(err: impl Display) -> Self {
        Self::new(FB_ERR_TABLE_REGISTRATION, err.to_string())
    }

    /// SQL planning failure.
    pub fn sql(err: impl Display) -> Self {
        Self::new(FB_ERR_SQL, err.to_string())
    }

    /// Result set execution or export failure.
    pub fn data_frame(err: impl Display) -> Self {
        Self::new(FB_ERR_DATA_FRAME, err.to_string())
    }

    /// Runtime teardown failure.
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::new(FB_ERR_RUNTIME_SHUTDOWN, message)
    }

    /// A panic caught at the boundary.
    pub fn panic(payload: &(dyn Any + Send)) -> Self {
        Self::new(FB_ERR_PANIC, panic_message(payload))
    }

    /// Run `f` with a borrowed [`FbErrorInfo`] describing this error.
    pub(crate) fn with_info<R>(&self, f: impl FnOnce(*const FbErrorInfo) -> R) -> R {
        let info = FbErrorInfo {
            kind: self.kind,
            message: self.message.as_ptr(),
            message_len: u32::try_from(self.message.len()).unwrap_or(u32::MAX),
        };
        f(&info)
    }
}

/// Run the body of an entry point, turning errors and panics into a status.
///
/// Panics must never unwind into the caller, so they are caught here and
/// reported as [`FB_ERR_PANIC`].
pub(crate) fn entry(operation: &'static str, body: impl FnOnce() -> Result<(), NativeError>) -> u32 {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)) {
        Ok(Ok(())) => FB_OK,
        Ok(Err(e)) => {
            tracing::debug!(operation, kind = e.kind, "call rejected: {e}");
            e.kind
        }
        Err(payload) => {
            tracing::error!(operation, "panic at entry point: {}", panic_message(payload.as_ref()));
            FB_ERR_PANIC
        }
    }
}

/// Extract the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
