//! Zero-copy import of native Arrow C data exports.
//!
//! Every `ArrowSchema`/`ArrowArray` handed over by the engine carries a
//! release thunk that must run exactly once. Importing moves each descriptor
//! out of native memory (leaving an empty struct behind) into an owner on this
//! side: an imported batch keeps its buffers alive and runs the thunk when
//! dropped, an unimported descriptor runs it when dropped.

use std::ffi::c_char;
use std::ptr;
use std::sync::Arc;

use arrow::array::{RecordBatch, StructArray};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ffi::{from_ffi_and_data_type, FFI_ArrowArray, FFI_ArrowSchema};
use fusebridge_native::FbColumnarRecord;

use crate::column_set::ColumnSet;
use crate::error::Result;

/// Converts one array descriptor into a caller-owned batch.
///
/// On failure the implementation must drop `array`, which runs its release
/// thunk. The production implementation is [`RecordBatchImport`].
pub trait ArrayImport {
    /// Imported batch type.
    type Batch;

    /// Import one descriptor of the given schema.
    ///
    /// # Errors
    ///
    /// Returns the reason the descriptor could not be imported.
    fn import(&mut self, schema: &SchemaRef, array: FFI_ArrowArray) -> Result<Self::Batch, ArrowError>;
}

/// Imports struct-typed arrays as [`RecordBatch`]es sharing one schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordBatchImport;

impl ArrayImport for RecordBatchImport {
    type Batch = RecordBatch;

    fn import(&mut self, schema: &SchemaRef, array: FFI_ArrowArray) -> Result<RecordBatch, ArrowError> {
        let data_type = DataType::Struct(schema.fields().clone());
        // SAFETY: the engine exports every batch as a valid struct array of
        // this schema; from_ffi takes ownership and releases on error
        let data = unsafe { from_ffi_and_data_type(array, data_type) }?;
        RecordBatch::from(StructArray::from(data)).with_schema(Arc::clone(schema))
    }
}

/// Import a schema, taking ownership of the descriptor.
///
/// # Errors
///
/// Returns [`ArrowError::CDataInterface`] for a null pointer or a descriptor
/// that was already released or moved out, and an error if the schema cannot
/// be represented. A live descriptor is released either way.
///
/// # Safety
///
/// `schema` must be null or point to an `ArrowSchema` struct laid out as the
/// Arrow C data interface defines it.
pub unsafe fn import_schema(schema: *mut FFI_ArrowSchema) -> Result<SchemaRef> {
    if schema.is_null() {
        return Err(ArrowError::CDataInterface("null schema descriptor".into()).into());
    }
    // SAFETY: ArrowSchema is #[repr(C)] and starts with its format pointer
    let format = unsafe { *schema.cast::<*const c_char>() };
    if format.is_null() {
        return Err(
            ArrowError::CDataInterface("schema descriptor was already released".into()).into(),
        );
    }
    // SAFETY: guaranteed by the caller; an empty struct is left behind
    let ffi_schema = unsafe { ptr::replace(schema, FFI_ArrowSchema::empty()) };
    let schema = Schema::try_from(&ffi_schema)?;
    Ok(Arc::new(schema))
}

/// Import a column set, taking ownership of every descriptor.
///
/// All descriptors are moved out of native memory before anything is
/// imported, so none is left behind on any path.
///
/// # Errors
///
/// Returns the first schema or batch import failure after releasing every
/// descriptor exactly once.
///
/// # Safety
///
/// `record` must be non-null and describe `batch_count` valid descriptors.
pub unsafe fn import_column_set(record: *mut FbColumnarRecord) -> Result<ColumnSet> {
    // SAFETY: guaranteed by the caller
    let record = unsafe { &mut *record };
    let arrays: Vec<FFI_ArrowArray> = (0..record.batch_count as usize)
        // SAFETY: batches covers batch_count descriptors
        .map(|i| unsafe { ptr::replace(record.batches.add(i), FFI_ArrowArray::empty()) })
        .collect();

    // SAFETY: schema is valid per the caller contract
    let schema = match unsafe { import_schema(record.schema) } {
        Ok(schema) => schema,
        Err(e) => {
            tracing::warn!(batches = arrays.len(), "schema import failed: {e}");
            drop(arrays);
            return Err(e);
        }
    };
    let batches = import_batches(&schema, arrays, &mut RecordBatchImport)?;
    Ok(ColumnSet::from_batches(schema, batches))
}

/// Import descriptors in order, cleaning up on the first failure.
///
/// On failure at descriptor `k`: batches `0..k` are dropped (each runs its
/// release thunk through its owner), descriptor `k` was released by the
/// importer, descriptors after `k` are released directly, and the original
/// error is returned.
///
/// # Errors
///
/// Returns the first import failure.
pub fn import_batches<I: ArrayImport>(
    schema: &SchemaRef,
    arrays: Vec<FFI_ArrowArray>,
    importer: &mut I,
) -> Result<Vec<I::Batch>> {
    let total = arrays.len();
    let mut imported = Vec::with_capacity(total);
    let mut remaining = arrays.into_iter();
    while let Some(array) = remaining.next() {
        match importer.import(schema, array) {
            Ok(batch) => imported.push(batch),
            Err(e) => {
                let failed_at = imported.len();
                tracing::warn!(failed_at, total, "batch import failed: {e}");
                drop(imported);
                for unimported in remaining {
                    release_descriptor(unimported);
                }
                return Err(e.into());
            }
        }
    }
    Ok(imported)
}

/// Run the release thunk of a descriptor that never reached an owner.
fn release_descriptor(array: FFI_ArrowArray) {
    drop(array);
}
