//! Sessions: table catalogs and SQL entry.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use fusebridge_native::{
    fb_session_deregister_table, fb_session_destroy, fb_session_register_csv,
    fb_session_register_json, fb_session_register_parquet, fb_session_sql, FbResultSet, FbSession,
};

use crate::dispatch::{c_path, c_string, complete_result_set, complete_void, start};
use crate::error::Result;
use crate::handle::NativeHandle;
use crate::options::{to_blob, CsvReadOptions, JsonReadOptions, ParquetReadOptions};
use crate::params::{encode_params, NamedParameter};
use crate::result_set::ResultSet;
use crate::runtime::Runtime;

pub(crate) unsafe fn release_session(session: *mut FbSession) {
    // SAFETY: the handle owns session exclusively
    let status = unsafe { fb_session_destroy(session) };
    if status != 0 {
        tracing::warn!(status, "failed to release session");
    }
}

/// File format of a table, with its read options.
#[derive(Debug, Clone)]
pub enum TableFormat {
    /// CSV files.
    Csv(CsvReadOptions),
    /// Newline-delimited JSON files.
    Json(JsonReadOptions),
    /// Parquet files.
    Parquet(ParquetReadOptions),
}

struct SessionInner {
    handle: NativeHandle<FbSession>,
    // keeps the engine running while the session is in use
    runtime: Runtime,
}

/// A query session with its own table catalog.
///
/// Tables registered in one session are invisible to every other session.
/// Cloning shares the session. Clones may be used from any thread, but
/// operations on the same session are not meant to run concurrently.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(runtime: Runtime, handle: NativeHandle<FbSession>) -> Self {
        Self {
            inner: Arc::new(SessionInner { handle, runtime }),
        }
    }

    /// The runtime executing this session's work.
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Register a CSV file, or a directory of CSV files, as table `name`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::TableRegistrationFailed`](crate::ErrorKind)
    /// if the path cannot be read or its schema cannot be inferred.
    pub async fn register_csv(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        options: Option<&CsvReadOptions>,
    ) -> Result<()> {
        let name = c_string(name, "table name")?;
        let path = c_path(path.as_ref())?;
        let blob = to_blob(options)?;
        let completion = self.inner.handle.with_handle(|session| {
            start::<(), _>("register_csv", complete_void, |callback, id| {
                // SAFETY: session is live or null; the strings and blob outlive the call
                unsafe {
                    fb_session_register_csv(
                        session,
                        name.as_ptr(),
                        path.as_ptr(),
                        blob.as_ffi(),
                        callback,
                        id,
                    )
                }
            })
        })?;
        completion.await
    }

    /// Register a newline-delimited JSON file or directory as table `name`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::TableRegistrationFailed`](crate::ErrorKind)
    /// if the path cannot be read or its schema cannot be inferred.
    pub async fn register_json(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        options: Option<&JsonReadOptions>,
    ) -> Result<()> {
        let name = c_string(name, "table name")?;
        let path = c_path(path.as_ref())?;
        let blob = to_blob(options)?;
        let completion = self.inner.handle.with_handle(|session| {
            start::<(), _>("register_json", complete_void, |callback, id| {
                // SAFETY: session is live or null; the strings and blob outlive the call
                unsafe {
                    fb_session_register_json(
                        session,
                        name.as_ptr(),
                        path.as_ptr(),
                        blob.as_ffi(),
                        callback,
                        id,
                    )
                }
            })
        })?;
        completion.await
    }

    /// Register a Parquet file or directory as table `name`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::TableRegistrationFailed`](crate::ErrorKind)
    /// if the path cannot be read.
    pub async fn register_parquet(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        options: Option<&ParquetReadOptions>,
    ) -> Result<()> {
        let name = c_string(name, "table name")?;
        let path = c_path(path.as_ref())?;
        let blob = to_blob(options)?;
        let completion = self.inner.handle.with_handle(|session| {
            start::<(), _>("register_parquet", complete_void, |callback, id| {
                // SAFETY: session is live or null; the strings and blob outlive the call
                unsafe {
                    fb_session_register_parquet(
                        session,
                        name.as_ptr(),
                        path.as_ptr(),
                        blob.as_ffi(),
                        callback,
                        id,
                    )
                }
            })
        })?;
        completion.await
    }

    /// Register `path` as table `name` in the given format.
    ///
    /// # Errors
    ///
    /// Same as the format-specific registration.
    pub async fn register_table(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        format: &TableFormat,
    ) -> Result<()> {
        match format {
            TableFormat::Csv(options) => self.register_csv(name, path, Some(options)).await,
            TableFormat::Json(options) => self.register_json(name, path, Some(options)).await,
            TableFormat::Parquet(options) => self.register_parquet(name, path, Some(options)).await,
        }
    }

    /// Remove table `name`. Removing a table that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`](crate::Error::Argument) for a name with a
    /// NUL byte.
    pub async fn deregister_table(&self, name: &str) -> Result<()> {
        let name = c_string(name, "table name")?;
        let completion = self.inner.handle.with_handle(|session| {
            start::<(), _>("deregister_table", complete_void, |callback, id| {
                // SAFETY: session is live or null; name outlives the call
                unsafe { fb_session_deregister_table(session, name.as_ptr(), callback, id) }
            })
        })?;
        completion.await
    }

    /// Plan `query`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::SqlError`](crate::ErrorKind) if the statement
    /// does not parse or refers to unknown tables or columns.
    pub async fn sql(&self, query: &str) -> Result<ResultSet> {
        self.sql_with_params(query, &[]).await
    }

    /// Plan `query`, binding `$name` placeholders from `params`.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::SqlError`](crate::ErrorKind) if planning
    /// fails, including when a placeholder has no value.
    pub async fn sql_with_params(&self, query: &str, params: &[NamedParameter]) -> Result<ResultSet> {
        let query = c_string(query, "query")?;
        let blob = encode_params(params)?;
        let completion = self.inner.handle.with_handle(|session| {
            start::<NativeHandle<FbResultSet>, _>("sql", complete_result_set, |callback, id| {
                // SAFETY: session is live or null; query and blob outlive the call
                unsafe { fb_session_sql(session, query.as_ptr(), blob.as_ffi(), callback, id) }
            })
        })?;
        let handle = completion.await?;
        Ok(ResultSet::new(self.clone(), handle))
    }

    /// Release the native session now instead of on drop.
    ///
    /// Later calls on this session, and on clones of it, are rejected with
    /// [`ErrorKind::InvalidArgument`](crate::ErrorKind). Result sets already
    /// planned stay usable.
    pub fn close(&self) {
        self.inner.handle.release();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.inner.handle)
            .finish_non_exhaustive()
    }
}
