//! Planned queries and their results.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use fusebridge_native::{
    fb_result_set_collect, fb_result_set_count, fb_result_set_destroy, fb_result_set_execute_stream,
    fb_result_set_schema, fb_result_set_to_string, fb_result_set_write_csv,
    fb_result_set_write_json, fb_result_set_write_parquet, FbBytes, FbCallback, FbResultSet,
};

use crate::column_set::ColumnSet;
use crate::dispatch::{
    c_path, complete_column_set, complete_count, complete_schema, complete_stream,
    complete_string, complete_void, start, OpenedStream,
};
use crate::error::Result;
use crate::handle::NativeHandle;
use crate::options::{
    to_blob, CsvWriteOptions, DataFrameWriteOptions, JsonWriteOptions, OptionsBlob,
    ParquetWriteOptions,
};
use crate::session::Session;
use crate::stream::ResultStream;

pub(crate) unsafe fn release_result_set(result_set: *mut FbResultSet) {
    // SAFETY: the handle owns result_set exclusively
    let status = unsafe { fb_result_set_destroy(result_set) };
    if status != 0 {
        tracing::warn!(status, "failed to release result set");
    }
}

type WriteFn = unsafe extern "C" fn(
    *mut FbResultSet,
    *const std::ffi::c_char,
    FbBytes,
    FbBytes,
    Option<FbCallback>,
    u64,
) -> u32;

struct ResultSetInner {
    handle: NativeHandle<FbResultSet>,
    session: Session,
}

/// A planned query.
///
/// Nothing runs until a result is requested. Each request executes the plan
/// again, so one result set can be counted, collected, streamed and written
/// any number of times.
#[derive(Clone)]
pub struct ResultSet {
    inner: Arc<ResultSetInner>,
}

impl ResultSet {
    pub(crate) fn new(session: Session, handle: NativeHandle<FbResultSet>) -> Self {
        Self {
            inner: Arc::new(ResultSetInner { handle, session }),
        }
    }

    /// The session that planned this query.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution fails.
    pub async fn count(&self) -> Result<u64> {
        let completion = self.inner.handle.with_handle(|rs| {
            start::<u64, _>("count", complete_count, |callback, id| {
                // SAFETY: rs is live or null
                unsafe { fb_result_set_count(rs, callback, id) }
            })
        })?;
        completion.await
    }

    /// Output schema, without executing the query.
    ///
    /// # Errors
    ///
    /// Fails if the schema cannot be exported or imported.
    pub async fn schema(&self) -> Result<SchemaRef> {
        let completion = self.inner.handle.with_handle(|rs| {
            start::<SchemaRef, _>("schema", complete_schema, |callback, id| {
                // SAFETY: rs is live or null
                unsafe { fb_result_set_schema(rs, callback, id) }
            })
        })?;
        completion.await
    }

    /// Execute and gather every batch.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution fails, or [`Error::Import`](crate::Error::Import) if a batch
    /// cannot be imported.
    pub async fn collect(&self) -> Result<ColumnSet> {
        let completion = self.inner.handle.with_handle(|rs| {
            start::<ColumnSet, _>("collect", complete_column_set, |callback, id| {
                // SAFETY: rs is live or null
                unsafe { fb_result_set_collect(rs, callback, id) }
            })
        })?;
        completion.await
    }

    /// Execute and return a stream of batches.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution cannot start.
    pub async fn execute_stream(&self) -> Result<ResultStream> {
        let completion = self.inner.handle.with_handle(|rs| {
            start::<OpenedStream, _>("execute_stream", complete_stream, |callback, id| {
                // SAFETY: rs is live or null
                unsafe { fb_result_set_execute_stream(rs, callback, id) }
            })
        })?;
        let (schema, handle) = completion.await?;
        Ok(ResultStream::new(self.clone(), schema, handle))
    }

    /// Execute and render the result as a table.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution or formatting fails.
    pub async fn to_display_string(&self) -> Result<String> {
        let completion = self.inner.handle.with_handle(|rs| {
            start::<String, _>("to_string", complete_string, |callback, id| {
                // SAFETY: rs is live or null
                unsafe { fb_result_set_to_string(rs, callback, id) }
            })
        })?;
        completion.await
    }

    /// Execute and write the result as CSV to `path`.
    ///
    /// Without `single_file_output`, `path` is a directory of part files.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution or writing fails.
    pub async fn write_csv(
        &self,
        path: impl AsRef<Path>,
        write_options: Option<&DataFrameWriteOptions>,
        csv_options: Option<&CsvWriteOptions>,
    ) -> Result<()> {
        let format = to_blob(csv_options)?;
        self.write("write_csv", fb_result_set_write_csv, path.as_ref(), write_options, &format)
            .await
    }

    /// Execute and write the result as newline-delimited JSON to `path`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution or writing fails.
    pub async fn write_json(
        &self,
        path: impl AsRef<Path>,
        write_options: Option<&DataFrameWriteOptions>,
        json_options: Option<&JsonWriteOptions>,
    ) -> Result<()> {
        let format = to_blob(json_options)?;
        self.write("write_json", fb_result_set_write_json, path.as_ref(), write_options, &format)
            .await
    }

    /// Execute and write the result as Parquet to `path`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DataFrameError`](crate::ErrorKind) if
    /// execution or writing fails, including an unknown codec name.
    pub async fn write_parquet(
        &self,
        path: impl AsRef<Path>,
        write_options: Option<&DataFrameWriteOptions>,
        parquet_options: Option<&ParquetWriteOptions>,
    ) -> Result<()> {
        let format = to_blob(parquet_options)?;
        self.write(
            "write_parquet",
            fb_result_set_write_parquet,
            path.as_ref(),
            write_options,
            &format,
        )
        .await
    }

    async fn write(
        &self,
        operation: &'static str,
        native: WriteFn,
        path: &Path,
        write_options: Option<&DataFrameWriteOptions>,
        format: &OptionsBlob,
    ) -> Result<()> {
        let path = c_path(path)?;
        let write = to_blob(write_options)?;
        let completion = self.inner.handle.with_handle(|rs| {
            start::<(), _>(operation, complete_void, |callback, id| {
                // SAFETY: rs is live or null; path and both blobs outlive the call
                unsafe { native(rs, path.as_ptr(), write.as_ffi(), format.as_ffi(), callback, id) }
            })
        })?;
        completion.await
    }

    /// Release the native result set now instead of on drop.
    ///
    /// Later calls on this result set, and on clones of it, are rejected
    /// with [`ErrorKind::InvalidArgument`](crate::ErrorKind). Open streams
    /// stay usable.
    pub fn close(&self) {
        self.inner.handle.release();
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("handle", &self.inner.handle)
            .finish_non_exhaustive()
    }
}
