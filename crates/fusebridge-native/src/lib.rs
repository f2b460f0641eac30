//! Native engine boundary for `fusebridge`.
//!
//! Exposes a small C ABI over a `DataFusion` session running on a dedicated
//! tokio runtime. Every asynchronous entry point returns a status immediately
//! and later reports its outcome exactly once through a completion callback:
//!
//! ```c
//! void on_count(const void* result, const FbErrorInfo* error, uint64_t user_data) {
//!     if (error) { /* error->kind, error->message, error->message_len */ return; }
//!     uint64_t rows = *(const uint64_t*)result;
//! }
//!
//! FbRuntime* rt;
//! fb_runtime_new(0, 0, &rt);
//! FbSession* session;
//! fb_session_new(rt, &session);
//! fb_session_sql(session, "SELECT 1", (FbBytes){0}, on_sql, 42);
//! ```
//!
//! Result pointers are only valid for the duration of the callback. Arrow C
//! data structs reachable from a result may be moved out by the consumer;
//! whatever is left behind is released after the callback returns.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod callback;
pub mod error;
pub mod export;
pub mod memory;
mod options;
pub mod result_set;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod wire;

pub use callback::FbCallback;
pub use error::*;
pub use export::{FbColumnarRecord, FbStreamOpened};
pub use memory::FbBytes;
pub use result_set::*;
pub use runtime::*;
pub use session::*;
pub use stream::*;
