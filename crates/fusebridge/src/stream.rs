//! Incremental consumption of a query result.

use std::fmt;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use futures::stream::{self, Stream};
use fusebridge_native::{fb_stream_destroy, fb_stream_next, FbStream};

use crate::column_set::ColumnSet;
use crate::dispatch::{complete_column_set, start};
use crate::error::Result;
use crate::handle::NativeHandle;
use crate::result_set::ResultSet;

pub(crate) unsafe fn release_stream(stream: *mut FbStream) {
    // SAFETY: the handle owns stream exclusively
    let status = unsafe { fb_stream_destroy(stream) };
    if status != 0 {
        tracing::warn!(status, "failed to release stream");
    }
}

/// A running query yielding one batch at a time.
///
/// Dropping the stream stops the query.
pub struct ResultStream {
    handle: NativeHandle<FbStream>,
    schema: SchemaRef,
    // the plan this stream executes
    _result_set: ResultSet,
}

impl ResultStream {
    pub(crate) fn new(result_set: ResultSet, schema: SchemaRef, handle: NativeHandle<FbStream>) -> Self {
        Self {
            handle,
            schema,
            _result_set: result_set,
        }
    }

    /// Schema of every batch.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Fetch the next batch, or `None` once the query is exhausted.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution fails. The stream should not be polled again after an
    /// error.
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let completion = self.handle.with_handle(|native| {
            start::<ColumnSet, _>("stream_next", complete_column_set, |callback, id| {
                // SAFETY: native is live or null
                unsafe { fb_stream_next(native, callback, id) }
            })
        })?;
        let batches = completion.await?;
        Ok(batches.into_batches().into_iter().next())
    }

    /// Adapt into a [`Stream`] of batches.
    ///
    /// The stream ends after the last batch or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RecordBatch>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut this = state?;
            match this.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), Some(this))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Stop the query and release the native stream now.
    ///
    /// Later calls to [`next_batch`](ResultStream::next_batch) are rejected
    /// with [`ErrorKind::InvalidArgument`](crate::ErrorKind).
    pub fn close(&self) {
        self.handle.release();
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("handle", &self.handle)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
