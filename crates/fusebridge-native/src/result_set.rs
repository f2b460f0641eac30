//! Result set entry points.
//!
//! A result set is a planned query. Every operation executes the plan
//! independently, so a result set can be counted, collected, streamed and
//! written any number of times.

use std::ffi::c_char;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use datafusion::dataframe::DataFrame;
use tokio::runtime::Handle;

use crate::callback::{spawn_completion, CallbackPayload, Completion, FbCallback};
use crate::error::{entry, NativeError};
use crate::export::{ColumnSet, OpenedStream};
use crate::memory::{read_str, FbBytes};
use crate::options::{decode_csv_write, decode_json_write, decode_parquet_write, WriteSettings};
use crate::stream::FbStream;

/// Opaque result set handle.
///
/// Delivered by `fb_session_sql`, freed by `fb_result_set_destroy`.
pub struct FbResultSet {
    runtime: Handle,
    frame: DataFrame,
}

impl FbResultSet {
    pub(crate) fn new(runtime: Handle, frame: DataFrame) -> Self {
        Self { runtime, frame }
    }
}

/// Spawn `op` against a copy of the result set's plan.
unsafe fn run<F, Fut, P>(
    result_set: *mut FbResultSet,
    operation: &'static str,
    callback: Option<FbCallback>,
    user_data: u64,
    op: F,
) -> Result<(), NativeError>
where
    F: FnOnce(DataFrame, Handle) -> Fut,
    Fut: std::future::Future<Output = Result<P, NativeError>> + Send + 'static,
    P: CallbackPayload,
{
    if result_set.is_null() {
        return Err(NativeError::invalid_argument("result set is null"));
    }
    let callback = callback.ok_or_else(|| NativeError::invalid_argument("callback is null"))?;
    // SAFETY: result_set is non-null (checked above) and live per the caller contract
    let result_set = unsafe { &*result_set };
    let future = op(result_set.frame.clone(), result_set.runtime.clone());
    spawn_completion(
        &result_set.runtime,
        operation,
        Completion::new(callback, user_data),
        future,
    );
    Ok(())
}

/// Free a result set.
///
/// # Safety
///
/// `result_set` must be a handle delivered by `fb_session_sql` that has not
/// been freed.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_destroy(result_set: *mut FbResultSet) -> u32 {
    entry("fb_result_set_destroy", || {
        if result_set.is_null() {
            return Err(NativeError::invalid_argument("result set is null"));
        }
        // SAFETY: ownership returns here per the caller contract
        drop(unsafe { Box::from_raw(result_set) });
        Ok(())
    })
}

/// Count the rows of the result. Completes with a `*const u64`.
///
/// # Safety
///
/// `result_set` must be live.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_count(
    result_set: *mut FbResultSet,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_count", || {
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "count", callback, user_data, |frame, _| async move {
                let rows = frame.count().await.map_err(NativeError::data_frame)?;
                u64::try_from(rows).map_err(NativeError::data_frame)
            })
        }
    })
}

/// Describe the result. Completes with a `*mut ArrowSchema`.
///
/// # Safety
///
/// `result_set` must be live.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_schema(
    result_set: *mut FbResultSet,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_schema", || {
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "schema", callback, user_data, |frame, _| async move {
                Ok(Arc::clone(frame.schema().inner()))
            })
        }
    })
}

/// Execute and materialize every batch. Completes with a `*mut FbColumnarRecord`.
///
/// # Safety
///
/// `result_set` must be live.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_collect(
    result_set: *mut FbResultSet,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_collect", || {
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "collect", callback, user_data, |frame, _| async move {
                let logical = Arc::clone(frame.schema().inner());
                let batches = frame.collect().await.map_err(NativeError::data_frame)?;
                let schema = batches.first().map_or(logical, RecordBatch::schema);
                Ok(ColumnSet { schema, batches })
            })
        }
    })
}

/// Start executing and return a batch stream. Completes with a `*mut FbStreamOpened`.
///
/// # Safety
///
/// `result_set` must be live.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_execute_stream(
    result_set: *mut FbResultSet,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_execute_stream", || {
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "execute_stream", callback, user_data, |frame, runtime| async move {
                let stream = frame.execute_stream().await.map_err(NativeError::data_frame)?;
                let schema = stream.schema();
                Ok(OpenedStream {
                    schema: Arc::clone(&schema),
                    stream: Box::new(FbStream::new(runtime, schema, stream)),
                })
            })
        }
    })
}

/// Execute and render the result as a table. Completes with a `*const FbBytes`.
///
/// # Safety
///
/// `result_set` must be live.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_to_string(
    result_set: *mut FbResultSet,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_to_string", || {
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "to_string", callback, user_data, |frame, _| async move {
                let schema = Arc::clone(frame.schema().inner());
                let mut batches = frame.collect().await.map_err(NativeError::data_frame)?;
                if batches.is_empty() {
                    batches.push(RecordBatch::new_empty(schema));
                }
                let table = pretty_format_batches(&batches).map_err(NativeError::data_frame)?;
                Ok(table.to_string())
            })
        }
    })
}

/// Decoded arguments shared by the write entry points.
struct WriteArgs {
    path: String,
    write: WriteSettings,
    format: Vec<u8>,
}

unsafe fn write_args(
    path: *const c_char,
    write_options: FbBytes,
    format_options: FbBytes,
) -> Result<WriteArgs, NativeError> {
    // SAFETY: forwarded caller contract
    let path = unsafe { read_str(path, "path") }?;
    // SAFETY: both blobs are readable for this call
    let (write, format) = unsafe { (write_options.as_slice(), format_options.as_slice()) };
    Ok(WriteArgs {
        path,
        write: WriteSettings::decode(write)?,
        format: format.to_vec(),
    })
}

/// Execute and write the result as CSV. Completes with no result.
///
/// # Arguments
///
/// * `result_set` - Result to write
/// * `path` - Output file or directory
/// * `write_options` - Format-independent write options blob
/// * `format_options` - CSV writer options blob
/// * `callback` - Completion callback
/// * `user_data` - Passed back to `callback`
///
/// # Safety
///
/// `result_set` must be live, `path` a valid C string, and both blobs
/// readable for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_write_csv(
    result_set: *mut FbResultSet,
    path: *const c_char,
    write_options: FbBytes,
    format_options: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_write_csv", || {
        // SAFETY: forwarded caller contract
        let args = unsafe { write_args(path, write_options, format_options) }?;
        let csv = decode_csv_write(&args.format)?;
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "write_csv", callback, user_data, |frame, _| async move {
                frame
                    .write_csv(&args.path, args.write.to_options(), Some(csv))
                    .await
                    .map(|_| ())
                    .map_err(NativeError::data_frame)
            })
        }
    })
}

/// Execute and write the result as newline-delimited JSON. Completes with no result.
///
/// # Safety
///
/// Same requirements as `fb_result_set_write_csv`.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_write_json(
    result_set: *mut FbResultSet,
    path: *const c_char,
    write_options: FbBytes,
    format_options: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_write_json", || {
        // SAFETY: forwarded caller contract
        let args = unsafe { write_args(path, write_options, format_options) }?;
        let json = decode_json_write(&args.format)?;
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "write_json", callback, user_data, |frame, _| async move {
                frame
                    .write_json(&args.path, args.write.to_options(), Some(json))
                    .await
                    .map(|_| ())
                    .map_err(NativeError::data_frame)
            })
        }
    })
}

/// Execute and write the result as Parquet. Completes with no result.
///
/// # Safety
///
/// Same requirements as `fb_result_set_write_csv`.
#[no_mangle]
pub unsafe extern "C" fn fb_result_set_write_parquet(
    result_set: *mut FbResultSet,
    path: *const c_char,
    write_options: FbBytes,
    format_options: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_result_set_write_parquet", || {
        // SAFETY: forwarded caller contract
        let args = unsafe { write_args(path, write_options, format_options) }?;
        let parquet = decode_parquet_write(&args.format)?;
        // SAFETY: forwarded caller contract
        unsafe {
            run(result_set, "write_parquet", callback, user_data, |frame, _| async move {
                frame
                    .write_parquet(&args.path, args.write.to_options(), Some(parquet))
                    .await
                    .map(|_| ())
                    .map_err(NativeError::data_frame)
            })
        }
    })
}
