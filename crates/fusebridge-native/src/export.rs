//! Arrow C Data Interface export of engine results.
//!
//! Results are handed to callbacks by pointer into structs that live on the
//! delivering frame. The consumer takes ownership of a schema or array by
//! moving it out and leaving an empty struct (null `release`) in its place:
//!
//! ```c
//! void on_collect(const void* result, const FbErrorInfo* error, uint64_t user_data) {
//!     FbColumnarRecord* record = (FbColumnarRecord*)result;
//!     struct ArrowSchema schema = *record->schema;
//!     record->schema->release = NULL;
//!     for (uint32_t i = 0; i < record->batch_count; i++) {
//!         struct ArrowArray batch = record->batches[i];
//!         record->batches[i].release = NULL;
//!         // ...
//!     }
//! }
//! ```
//!
//! Anything not moved out is released once the callback returns.

use std::ffi::c_void;
use std::ptr;

use arrow::array::{Array, RecordBatch, StructArray};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::ffi::{FFI_ArrowArray, FFI_ArrowSchema};

use crate::callback::{CallbackPayload, FbCallback};
use crate::error::NativeError;
use crate::result_set::FbResultSet;
use crate::stream::FbStream;

/// Column set passed to `collect` and `stream next` callbacks.
///
/// Every entry of `batches` is a struct array whose children match `schema`.
#[repr(C)]
#[derive(Debug)]
pub struct FbColumnarRecord {
    /// Schema of every batch.
    pub schema: *mut FFI_ArrowSchema,
    /// Number of entries in `batches`.
    pub batch_count: u32,
    /// Array of `batch_count` batches.
    pub batches: *mut FFI_ArrowArray,
}

/// Result of `fb_result_set_execute_stream`.
#[repr(C)]
#[derive(Debug)]
pub struct FbStreamOpened {
    /// Schema of every batch the stream produces.
    pub schema: *mut FFI_ArrowSchema,
    /// Stream handle; ownership moves to the consumer, free with `fb_stream_destroy`.
    pub stream: *mut FbStream,
}

/// Export a schema as a struct-typed `ArrowSchema`.
///
/// # Errors
///
/// Returns `FB_ERR_DATA_FRAME` if a field type has no C data representation.
pub fn export_schema(schema: &Schema) -> Result<FFI_ArrowSchema, NativeError> {
    FFI_ArrowSchema::try_from(schema)
        .map_err(|e| NativeError::data_frame(format!("Arrow FFI schema export failed: {e}")))
}

/// Export a batch as a struct-typed `ArrowArray`.
#[must_use]
pub fn export_batch(batch: RecordBatch) -> FFI_ArrowArray {
    let data = StructArray::from(batch).into_data();
    FFI_ArrowArray::new(&data)
}

impl CallbackPayload for SchemaRef {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        let mut schema = export_schema(&self)?;
        // SAFETY: schema lives on this frame for the whole call
        unsafe {
            callback(
                ptr::addr_of_mut!(schema).cast::<c_void>(),
                ptr::null(),
                user_data,
            );
        };
        Ok(())
    }
}

/// Batches with their schema, delivered as an [`FbColumnarRecord`].
#[derive(Debug)]
pub struct ColumnSet {
    /// Schema of every batch.
    pub schema: SchemaRef,
    /// Batches in production order.
    pub batches: Vec<RecordBatch>,
}

impl CallbackPayload for ColumnSet {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        let batch_count = u32::try_from(self.batches.len())
            .map_err(|_| NativeError::data_frame("too many batches to export"))?;
        let mut schema = export_schema(&self.schema)?;
        let mut arrays: Vec<FFI_ArrowArray> = self.batches.into_iter().map(export_batch).collect();

        let mut record = FbColumnarRecord {
            schema: ptr::addr_of_mut!(schema),
            batch_count,
            batches: arrays.as_mut_ptr(),
        };
        // SAFETY: record, schema and arrays live on this frame for the whole call
        unsafe {
            callback(
                ptr::addr_of_mut!(record).cast::<c_void>(),
                ptr::null(),
                user_data,
            );
        };
        // Descriptors the consumer did not take are released here.
        drop(arrays);
        drop(schema);
        Ok(())
    }
}

impl CallbackPayload for Box<FbResultSet> {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        let handle: *mut FbResultSet = Box::into_raw(self);
        // SAFETY: handle lives on this frame; the pointee is owned by the consumer from now on
        unsafe {
            callback(ptr::addr_of!(handle).cast::<c_void>(), ptr::null(), user_data);
        };
        Ok(())
    }
}

/// A freshly opened stream with its schema.
pub struct OpenedStream {
    /// Schema of every batch.
    pub schema: SchemaRef,
    /// The stream itself.
    pub stream: Box<FbStream>,
}

impl CallbackPayload for OpenedStream {
    fn deliver(self, callback: FbCallback, user_data: u64) -> Result<(), NativeError> {
        let mut schema = export_schema(&self.schema)?;
        let mut opened = FbStreamOpened {
            schema: ptr::addr_of_mut!(schema),
            stream: Box::into_raw(self.stream),
        };
        // SAFETY: opened and schema live on this frame for the whole call
        unsafe {
            callback(
                ptr::addr_of_mut!(opened).cast::<c_void>(),
                ptr::null(),
                user_data,
            );
        };
        Ok(())
    }
}
