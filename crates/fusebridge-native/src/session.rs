//! Session entry points: table registration and SQL planning.
//!
//! Each session owns its own catalog; tables registered in one session are
//! invisible to every other session.

use std::ffi::c_char;
use std::ops::ControlFlow;
use std::sync::Arc;

use datafusion::dataframe::DataFrame;
use datafusion::prelude::SessionContext;
use datafusion::sql::parser::{DFParser, Statement};
use datafusion::sql::sqlparser::ast::{visit_expressions_mut, Expr, Statement as SqlStatement, Value};
use datafusion::sql::sqlparser::dialect::GenericDialect;
use datafusion::sql::sqlparser::parser::Parser;
use tokio::runtime::Handle;

use crate::callback::{spawn_completion, Completion, FbCallback};
use crate::error::{entry, NativeError};
use crate::memory::{read_str, FbBytes};
use crate::options::{
    decode_params, CsvReadSettings, JsonReadSettings, ParquetReadSettings, SqlParams,
};
use crate::result_set::FbResultSet;
use crate::runtime::FbRuntime;

/// Opaque session handle.
///
/// Created by `fb_session_new`, freed by `fb_session_destroy`.
pub struct FbSession {
    runtime: Handle,
    context: Arc<SessionContext>,
}

impl FbSession {
    /// Create a session with an empty catalog, running work on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            context: Arc::new(SessionContext::new()),
        }
    }
}

/// Resolve the arguments shared by every table entry point.
unsafe fn table_args<'a>(
    session: *mut FbSession,
    name: *const c_char,
    callback: Option<FbCallback>,
) -> Result<(&'a FbSession, String, FbCallback), NativeError> {
    if session.is_null() {
        return Err(NativeError::invalid_argument("session is null"));
    }
    let callback = callback.ok_or_else(|| NativeError::invalid_argument("callback is null"))?;
    // SAFETY: name is null or NUL-terminated per the caller contract
    let name = unsafe { read_str(name, "table name") }?;
    // SAFETY: session is non-null (checked above) and live per the caller contract
    Ok((unsafe { &*session }, name, callback))
}

/// Create a session.
///
/// # Arguments
///
/// * `runtime` - Runtime that will run the session's work
/// * `out` - Pointer to receive the session handle
///
/// # Returns
///
/// `FB_OK` on success, or an error code.
///
/// # Safety
///
/// `runtime` must be a live runtime handle and `out` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn fb_session_new(runtime: *const FbRuntime, out: *mut *mut FbSession) -> u32 {
    entry("fb_session_new", || {
        if runtime.is_null() || out.is_null() {
            return Err(NativeError::invalid_argument("runtime or out is null"));
        }
        // SAFETY: runtime is non-null (checked above) and live per the caller contract
        let handle = unsafe { (*runtime).handle().clone() };
        // SAFETY: out is non-null (checked above)
        unsafe { *out = Box::into_raw(Box::new(FbSession::new(handle))) };
        Ok(())
    })
}

/// Free a session.
///
/// # Safety
///
/// `session` must be a handle from `fb_session_new` that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn fb_session_destroy(session: *mut FbSession) -> u32 {
    entry("fb_session_destroy", || {
        if session.is_null() {
            return Err(NativeError::invalid_argument("session is null"));
        }
        // SAFETY: session was allocated by fb_session_new and ownership returns here
        drop(unsafe { Box::from_raw(session) });
        Ok(())
    })
}

/// Register a CSV file or directory as a table.
///
/// Completes with no result, or `FB_ERR_TABLE_REGISTRATION`.
///
/// # Arguments
///
/// * `session` - Session owning the catalog
/// * `name` - Table name
/// * `path` - File or directory path
/// * `options` - CSV read options blob, empty for defaults
/// * `callback` - Completion callback
/// * `user_data` - Passed back to `callback`
///
/// # Safety
///
/// `session` must be live, `name` and `path` valid C strings, and `options`
/// readable for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn fb_session_register_csv(
    session: *mut FbSession,
    name: *const c_char,
    path: *const c_char,
    options: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_session_register_csv", || {
        // SAFETY: forwarded caller contract
        let (session, name, callback) = unsafe { table_args(session, name, callback) }?;
        // SAFETY: forwarded caller contract
        let path = unsafe { read_str(path, "path") }?;
        // SAFETY: options is readable for this call; the settings copy what they need
        let settings = CsvReadSettings::decode(unsafe { options.as_slice() })?;
        let context = Arc::clone(&session.context);
        spawn_completion(
            &session.runtime,
            "register_csv",
            Completion::new(callback, user_data),
            async move {
                context
                    .register_csv(name.as_str(), &path, settings.to_options())
                    .await
                    .map_err(NativeError::registration)
            },
        );
        Ok(())
    })
}

/// Register a newline-delimited JSON file or directory as a table.
///
/// Completes with no result, or `FB_ERR_TABLE_REGISTRATION`.
///
/// # Safety
///
/// Same requirements as `fb_session_register_csv`.
#[no_mangle]
pub unsafe extern "C" fn fb_session_register_json(
    session: *mut FbSession,
    name: *const c_char,
    path: *const c_char,
    options: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_session_register_json", || {
        // SAFETY: forwarded caller contract
        let (session, name, callback) = unsafe { table_args(session, name, callback) }?;
        // SAFETY: forwarded caller contract
        let path = unsafe { read_str(path, "path") }?;
        // SAFETY: options is readable for this call
        let settings = JsonReadSettings::decode(unsafe { options.as_slice() })?;
        let context = Arc::clone(&session.context);
        spawn_completion(
            &session.runtime,
            "register_json",
            Completion::new(callback, user_data),
            async move {
                context
                    .register_json(name.as_str(), &path, settings.to_options())
                    .await
                    .map_err(NativeError::registration)
            },
        );
        Ok(())
    })
}

/// Register a Parquet file or directory as a table.
///
/// Completes with no result, or `FB_ERR_TABLE_REGISTRATION`.
///
/// # Safety
///
/// Same requirements as `fb_session_register_csv`.
#[no_mangle]
pub unsafe extern "C" fn fb_session_register_parquet(
    session: *mut FbSession,
    name: *const c_char,
    path: *const c_char,
    options: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_session_register_parquet", || {
        // SAFETY: forwarded caller contract
        let (session, name, callback) = unsafe { table_args(session, name, callback) }?;
        // SAFETY: forwarded caller contract
        let path = unsafe { read_str(path, "path") }?;
        // SAFETY: options is readable for this call
        let settings = ParquetReadSettings::decode(unsafe { options.as_slice() })?;
        let context = Arc::clone(&session.context);
        spawn_completion(
            &session.runtime,
            "register_parquet",
            Completion::new(callback, user_data),
            async move {
                context
                    .register_parquet(name.as_str(), &path, settings.to_options())
                    .await
                    .map_err(NativeError::registration)
            },
        );
        Ok(())
    })
}

/// Remove a table from the catalog. Removing an unknown table succeeds.
///
/// # Safety
///
/// `session` must be live and `name` a valid C string.
#[no_mangle]
pub unsafe extern "C" fn fb_session_deregister_table(
    session: *mut FbSession,
    name: *const c_char,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_session_deregister_table", || {
        // SAFETY: forwarded caller contract
        let (session, name, callback) = unsafe { table_args(session, name, callback) }?;
        let context = Arc::clone(&session.context);
        spawn_completion(
            &session.runtime,
            "deregister_table",
            Completion::new(callback, user_data),
            async move {
                let removed = context
                    .deregister_table(name.as_str())
                    .map_err(NativeError::registration)?;
                if removed.is_none() {
                    tracing::debug!(table = %name, "deregistered table was not registered");
                }
                Ok(())
            },
        );
        Ok(())
    })
}

/// Plan a SQL statement, binding named parameters.
///
/// Completes with a pointer to a `FbResultSet*` whose ownership moves to the
/// consumer, or `FB_ERR_SQL`.
///
/// # Arguments
///
/// * `session` - Session whose catalog resolves table names
/// * `sql` - SQL text
/// * `params` - Named parameter blob, empty for none
/// * `callback` - Completion callback
/// * `user_data` - Passed back to `callback`
///
/// # Safety
///
/// `session` must be live, `sql` a valid C string, and `params` readable for
/// the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn fb_session_sql(
    session: *mut FbSession,
    sql: *const c_char,
    params: FbBytes,
    callback: Option<FbCallback>,
    user_data: u64,
) -> u32 {
    entry("fb_session_sql", || {
        // SAFETY: forwarded caller contract
        let (session, sql, callback) = unsafe { table_args(session, sql, callback) }?;
        // SAFETY: params is readable for this call
        let params = decode_params(unsafe { params.as_slice() })?;
        let context = Arc::clone(&session.context);
        let runtime = session.runtime.clone();
        spawn_completion(
            &session.runtime,
            "sql",
            Completion::new(callback, user_data),
            async move {
                let frame = match params {
                    Some(params) => plan_with_params(&context, &sql, params).await?,
                    None => context.sql(&sql).await.map_err(NativeError::sql)?,
                };
                Ok(Box::new(FbResultSet::new(runtime, frame)))
            },
        );
        Ok(())
    })
}

/// Plan `sql` and bind `params` to its placeholders.
///
/// Each bound placeholder is cast to the type of its value before planning,
/// so `$a + $b` plans without any other source of placeholder types. A
/// placeholder with no bound value fails planning and is named in the error.
async fn plan_with_params(
    context: &SessionContext,
    sql: &str,
    params: SqlParams,
) -> Result<DataFrame, NativeError> {
    let mut statements = DFParser::parse_sql(sql).map_err(NativeError::sql)?;
    let (Some(mut statement), None) = (statements.pop_front(), statements.pop_front()) else {
        return Err(NativeError::sql("expected exactly one SQL statement"));
    };
    if let Statement::Statement(inner) = &mut statement {
        bind_placeholder_types(inner, &params)?;
    }
    let plan = context
        .state()
        .statement_to_plan(statement)
        .await
        .map_err(NativeError::sql)?;
    let frame = context
        .execute_logical_plan(plan)
        .await
        .map_err(NativeError::sql)?;
    frame
        .with_param_values(params.into_param_values())
        .map_err(NativeError::sql)
}

/// Wrap every bound placeholder of `statement` in a cast to its value type.
fn bind_placeholder_types(statement: &mut SqlStatement, params: &SqlParams) -> Result<(), NativeError> {
    let flow = visit_expressions_mut(statement, |expr| {
        let Expr::Value(value) = expr else {
            return ControlFlow::Continue(());
        };
        let Value::Placeholder(placeholder) = &value.value else {
            return ControlFlow::Continue(());
        };
        let placeholder = placeholder.clone();
        if !params.contains(&placeholder) {
            return ControlFlow::Break(NativeError::sql(format!(
                "no value bound for placeholder {placeholder}"
            )));
        }
        let Some(sql_type) = params.sql_type(&placeholder) else {
            return ControlFlow::Continue(());
        };
        let cast = format!("CAST({placeholder} AS {sql_type})");
        match Parser::new(&GenericDialect {})
            .try_with_sql(&cast)
            .and_then(|mut parser| parser.parse_expr())
        {
            Ok(typed) => {
                *expr = typed;
                ControlFlow::Continue(())
            }
            Err(e) => ControlFlow::Break(NativeError::sql(e)),
        }
    });
    match flow {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(e) => Err(e),
    }
}
