//! Incremental batch streams.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use datafusion::physical_plan::SendableRecordBatchStream;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::callback::{spawn_completion, Completion, FbCallback};
use crate::error::{entry, NativeError};
use crate::export::ColumnSet;

/// Opaque stream handle.
///
/// Delivered by `fb_result_set_execute_stream`, freed by `fb_stream_destroy`.
pub struct FbStream {
    runtime: Handle,
    schema: SchemaRef,
    inner: Arc<Mutex<SendableRecordBatchStream>>,
}

impl FbStream {
    pub(crate) fn new(runtime: Handle, schema: SchemaRef, stream: SendableRecordBatchStream) -> Self {
        Self {
            runtime,
            schema,
            inner: Arc::new(Mutex::new(stream)),
        }
    }
}

/// Fetch the next batch.
///
/// Completes with a `*mut FbColumnarRecord` holding one batch, or zero
/// batches once the stream is exhausted.
///
/// # Safety
///
/// `stream` must be live.
#[no_mangle]
pub unsafe extern "C" fn fb_stream_next(
    stream: *mut FbStream,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_stream_next", || {
        if stream.is_null() {
            return Err(NativeError::invalid_argument("stream is null"));
        }
        let callback = callback.ok_or_else(|| NativeError::invalid_argument("callback is null"))?;
        // SAFETY: stream is non-null (checked above) and live per the caller contract
        let stream = unsafe { &*stream };
        let schema = Arc::clone(&stream.schema);
        let inner = Arc::clone(&stream.inner);
        spawn_completion(
            &stream.runtime,
            "stream_next",
            Completion::new(callback, user_data),
            async move {
                let next = inner.lock().await.next().await;
                let batches = match next {
                    Some(batch) => vec![batch.map_err(NativeError::data_frame)?],
                    None => Vec::new(),
                };
                Ok(ColumnSet { schema, batches })
            },
        );
        Ok(())
    })
}

/// Free a stream, stopping any work still producing batches.
///
/// # Safety
///
/// `stream` must be a handle delivered by `fb_result_set_execute_stream`
/// that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn fb_stream_destroy(stream: *mut FbStream) -> u32 {
    entry("fb_stream_destroy", || {
        if stream.is_null() {
            return Err(NativeError::invalid_argument("stream is null"));
        }
        // SAFETY: ownership returns here per the caller contract
        drop(unsafe { Box::from_raw(stream) });
        Ok(())
    })
}
