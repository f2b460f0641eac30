//! Async access to an embedded `DataFusion` engine.
//!
//! The engine runs on its own thread pool behind a callback-based C ABI
//! (`fusebridge-native`). This crate turns each callback into a future,
//! imports Arrow results without copying them, and makes sure every native
//! handle is released exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use fusebridge::{NamedParameter, Runtime};
//!
//! let runtime = Runtime::new()?;
//! let session = runtime.create_session()?;
//! session.register_csv("orders", "data/orders.csv", None).await?;
//!
//! let result = session
//!     .sql_with_params(
//!         "SELECT status, COUNT(*) FROM orders WHERE amount > $min GROUP BY status",
//!         &[NamedParameter::new("min", 100_i64)?],
//!     )
//!     .await?;
//! println!("{}", result.to_display_string().await?);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
mod column_set;
mod config;
mod dispatch;
mod error;
pub mod handle;
pub mod import;
mod options;
mod params;
pub mod registry;
mod result_set;
mod runtime;
mod session;
mod stream;

pub use column_set::ColumnSet;
pub use config::{RuntimeConfig, RuntimeConfigBuilder, DEFAULT_SHUTDOWN_TIMEOUT};
pub use error::{Error, ErrorKind, Result};
pub use options::{
    CompressionType, CsvReadOptions, CsvWriteOptions, DataFrameWriteOptions, InsertOp,
    JsonReadOptions, JsonWriteOptions, ParquetReadOptions, ParquetWriteOptions, PartitionColumn,
};
pub use params::{NamedParameter, ParamValue};
pub use result_set::ResultSet;
pub use runtime::Runtime;
pub use session::{Session, TableFormat};
pub use stream::ResultStream;
