//! Borrowed byte views and string arguments crossing the boundary.

use std::ffi::{c_char, CStr};

use crate::error::NativeError;

/// A borrowed `(ptr, len)` view over caller-owned bytes.
///
/// Used for options blobs going in and UTF-8 strings coming out. The bytes
/// are only valid for the synchronous part of the call (inbound) or for the
/// duration of the callback (outbound).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FbBytes {
    /// Start of the bytes; may be null when `len` is 0.
    pub ptr: *const u8,
    /// Number of bytes.
    pub len: u32,
}

impl FbBytes {
    /// An empty view.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
        }
    }

    /// Borrow `bytes` for the duration of a call.
    ///
    /// Lengths beyond `u32::MAX` are rejected by returning `None`.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let len = u32::try_from(bytes.len()).ok()?;
        Some(Self {
            ptr: if len == 0 { std::ptr::null() } else { bytes.as_ptr() },
            len,
        })
    }

    /// View the bytes as a slice.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to `len` readable bytes that outlive `'a`.
    #[must_use]
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() || self.len == 0 {
            &[]
        } else {
            // SAFETY: guaranteed by the caller
            unsafe { std::slice::from_raw_parts(self.ptr, self.len as usize) }
        }
    }
}

/// Copy a NUL-terminated UTF-8 argument into an owned string.
///
/// # Safety
///
/// `s` must be null or a valid NUL-terminated string.
pub(crate) unsafe fn read_str(s: *const c_char, what: &str) -> Result<String, NativeError> {
    if s.is_null() {
        return Err(NativeError::invalid_argument(format!("{what} is null")));
    }
    // SAFETY: s is non-null and NUL-terminated per the caller contract
    let raw = unsafe { CStr::from_ptr(s) };
    raw.to_str()
        .map(str::to_owned)
        .map_err(|_| NativeError::invalid_argument(format!("{what} is not valid UTF-8")))
}

/// Library version as a static NUL-terminated string.
///
/// # Safety
///
/// The returned pointer is valid for the lifetime of the process and must not
/// be freed.
#[no_mangle]
pub extern "C" fn fb_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr().cast()
}
