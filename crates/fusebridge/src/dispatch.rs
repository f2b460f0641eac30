//! Native-callable completion entry points.
//!
//! One function per result shape. Each runs on an engine thread, decodes the
//! payload while it is still valid, and resolves the pending operation named
//! by `operation`. Nothing unwinds back into the engine: decoding failures,
//! including panics, resolve the operation with an error instead.

use std::ffi::{c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use fusebridge_native::{
    FbBytes, FbCallback, FbColumnarRecord, FbErrorInfo, FbResultSet, FbStream, FbStreamOpened,
};

use crate::bridge::decode_error;
use crate::column_set::ColumnSet;
use crate::error::{Error, ErrorKind, Result};
use crate::handle::NativeHandle;
use crate::import::{import_column_set, import_schema};
use crate::registry::{Completion, OperationRegistry};
use crate::result_set::release_result_set;
use crate::stream::release_stream;

/// Result of `execute_stream`: the schema and the stream handle.
pub(crate) type OpenedStream = (SchemaRef, NativeHandle<FbStream>);

/// Register an operation and issue its native call.
///
/// `issue` receives the completion callback and the operation id and returns
/// the native status. A non-zero status aborts the operation; the callback
/// will not fire for it.
pub(crate) fn start<T, F>(operation: &'static str, callback: FbCallback, issue: F) -> Result<Completion<T>>
where
    T: Send + 'static,
    F: FnOnce(Option<FbCallback>, u64) -> u32,
{
    let registry = OperationRegistry::global();
    let (id, completion) = registry.create::<T>();
    let status = issue(Some(callback), id.get());
    match ErrorKind::from_raw(status) {
        None => Ok(completion),
        Some(kind) => {
            registry.abort(id);
            tracing::warn!(operation, %kind, "native call rejected");
            Err(Error::Rejected { kind, operation })
        }
    }
}

/// Copy a string argument for a native call.
pub(crate) fn c_string(value: &str, what: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::argument(format!("{what} contains a NUL byte")))
}

/// Copy a path argument for a native call.
pub(crate) fn c_path(path: &Path) -> Result<CString> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::argument(format!("path {} is not valid UTF-8", path.display())))?;
    c_string(text, "path")
}

fn dispatch<T, F>(error: *const FbErrorInfo, operation: u64, shape: &'static str, decode: F)
where
    T: Send + 'static,
    F: FnOnce() -> Result<T>,
{
    let registry = OperationRegistry::global();
    if !error.is_null() {
        // SAFETY: the engine passes a valid payload for the duration of the callback
        let err = unsafe { decode_error(error) };
        registry.complete_error(operation, err);
        return;
    }
    match panic::catch_unwind(AssertUnwindSafe(decode)) {
        Ok(Ok(value)) => {
            registry.complete_value(operation, value);
        }
        Ok(Err(e)) => {
            tracing::warn!(operation, shape, "failed to decode result: {e}");
            registry.complete_error(operation, e);
        }
        Err(_) => {
            tracing::error!(operation, shape, "panic while decoding result");
            registry.complete_error(
                operation,
                Error::Import(ArrowError::ComputeError(format!(
                    "panic while decoding {shape} result"
                ))),
            );
        }
    }
}

fn require(result: *const c_void, shape: &'static str) -> Result<()> {
    if result.is_null() {
        Err(Error::Import(ArrowError::CDataInterface(format!(
            "missing {shape} result"
        ))))
    } else {
        Ok(())
    }
}

/// Completion for operations without a result.
pub(crate) unsafe extern "C" fn complete_void(
    _result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "void", || Ok(()));
}

/// Completion for `*const u64` results.
pub(crate) unsafe extern "C" fn complete_count(
    result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "count", || {
        require(result, "count")?;
        // SAFETY: the engine passes a valid u64 for the duration of the callback
        Ok(unsafe { *result.cast::<u64>() })
    });
}

/// Completion for `*const FbBytes` UTF-8 results.
pub(crate) unsafe extern "C" fn complete_string(
    result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "string", || {
        require(result, "string")?;
        // SAFETY: the engine passes a valid view for the duration of the callback
        let bytes = unsafe { (*result.cast::<FbBytes>()).as_slice() };
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Import(ArrowError::ParseError(e.to_string())))
    });
}

/// Completion for `*const *mut FbResultSet` results.
pub(crate) unsafe extern "C" fn complete_result_set(
    result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "result set", || {
        require(result, "result set")?;
        // SAFETY: the engine hands over ownership of the result set
        let ptr = unsafe { *result.cast::<*mut FbResultSet>() };
        // SAFETY: nothing else releases ptr
        Ok(unsafe { NativeHandle::wrap(ptr, release_result_set) })
    });
}

/// Completion for `*mut ArrowSchema` results.
pub(crate) unsafe extern "C" fn complete_schema(
    result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "schema", || {
        require(result, "schema")?;
        // SAFETY: the engine passes a valid, movable descriptor
        unsafe { import_schema(result.cast_mut().cast()) }
    });
}

/// Completion for `*mut FbColumnarRecord` results.
pub(crate) unsafe extern "C" fn complete_column_set(
    result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "column set", || -> Result<ColumnSet> {
        require(result, "column set")?;
        // SAFETY: the engine passes a valid record with movable descriptors
        unsafe { import_column_set(result.cast_mut().cast::<FbColumnarRecord>()) }
    });
}

/// Completion for `*mut FbStreamOpened` results.
pub(crate) unsafe extern "C" fn complete_stream(
    result: *const c_void,
    error: *const FbErrorInfo,
    operation: u64,
) {
    dispatch(error, operation, "stream", || -> Result<OpenedStream> {
        require(result, "stream")?;
        // SAFETY: the engine passes a valid record
        let opened = unsafe { &mut *result.cast_mut().cast::<FbStreamOpened>() };
        // Own the stream first so a schema failure still releases it.
        // SAFETY: the engine hands over ownership of the stream
        let stream = unsafe { NativeHandle::wrap(opened.stream, release_stream) };
        // SAFETY: the schema descriptor is valid and movable
        let schema = unsafe { import_schema(opened.schema) }?;
        Ok((schema, stream))
    });
}
