//! Decoding of native error payloads.

use fusebridge_native::FbErrorInfo;

use crate::error::{Error, ErrorKind};

/// Decode the error payload handed to a completion callback.
///
/// The message is copied before returning, so the payload may be freed as
/// soon as the callback returns. A null or empty message decodes to an empty
/// string; invalid UTF-8 is replaced lossily. A payload carrying the success
/// discriminant is still an error and decodes as [`ErrorKind::Unknown`].
///
/// # Safety
///
/// `info` must be non-null and point to a valid payload whose message covers
/// `message_len` readable bytes.
#[must_use]
pub unsafe fn decode_error(info: *const FbErrorInfo) -> Error {
    // SAFETY: guaranteed by the caller
    let info = unsafe { &*info };
    let message = if info.message.is_null() || info.message_len == 0 {
        String::new()
    } else {
        // SAFETY: message covers message_len bytes per the caller contract
        let bytes = unsafe { std::slice::from_raw_parts(info.message, info.message_len as usize) };
        String::from_utf8_lossy(bytes).into_owned()
    };
    let kind = ErrorKind::from_raw(info.kind).unwrap_or(ErrorKind::Unknown(info.kind));
    Error::Native { kind, message }
}
