//! Materialized results.

use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

/// Every batch of a collected result, with its schema.
///
/// Batches reference buffers allocated by the engine; dropping the set
/// releases them.
#[derive(Debug, Clone)]
pub struct ColumnSet {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl ColumnSet {
    /// Create from a schema and its batches.
    #[must_use]
    pub fn from_batches(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    /// Get the schema.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Get all batches by reference.
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Consume and return all batches.
    #[must_use]
    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    /// Total row count across all batches.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Number of batches.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// Get a batch by index.
    #[must_use]
    pub fn batch(&self, index: usize) -> Option<&RecordBatch> {
        self.batches.get(index)
    }

    /// Total column count.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Whether the result has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn test_accessors() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, false)]));
        let batch =
            RecordBatch::try_new(Arc::clone(&schema), vec![Arc::new(Int32Array::from(vec![1, 2]))])
                .unwrap();
        let set = ColumnSet::from_batches(Arc::clone(&schema), vec![batch.clone(), batch]);

        assert_eq!(set.num_rows(), 4);
        assert_eq!(set.num_batches(), 2);
        assert_eq!(set.num_columns(), 1);
        assert!(set.batch(2).is_none());
        assert!(!set.is_empty());
        assert_eq!(set.into_batches().len(), 2);
    }

    #[test]
    fn test_empty() {
        let set = ColumnSet::from_batches(Arc::new(Schema::empty()), Vec::new());
        assert!(set.is_empty());
        assert_eq!(set.num_columns(), 0);
    }
}
