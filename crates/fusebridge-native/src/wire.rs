//! Binary encoding of options blobs.
//!
//! A blob is a flat sequence of fields:
//!
//! ```text
//! +--------+--------------+----------------+
//! | tag u8 | len u32 (LE) | value [len]    |
//! +--------+--------------+----------------+
//! ```
//!
//! Only fields the caller set are present. A repeated field repeats its tag;
//! a nested message is itself a blob. Scalars are encoded as:
//!
//! - `bool`: one byte, 0 or 1
//! - `u64`: eight bytes, little-endian
//! - single-byte characters and enum values: one byte
//! - strings: raw UTF-8
//! - schemas: an Arrow IPC stream holding only the schema message
//! - data types: the Arrow `DataType` display string
//!
//! Unknown tags are skipped.

use bytes::Buf;

/// Size of a field header.
pub const HEADER_LEN: usize = 5;

/// Field tags for CSV read options.
#[allow(missing_docs)]
pub mod csv_read {
    pub const HAS_HEADER: u8 = 1;
    pub const DELIMITER: u8 = 2;
    pub const QUOTE: u8 = 3;
    pub const TERMINATOR: u8 = 4;
    pub const ESCAPE: u8 = 5;
    pub const COMMENT: u8 = 6;
    pub const NEWLINES_IN_VALUES: u8 = 7;
    pub const SCHEMA: u8 = 8;
    pub const SCHEMA_INFER_MAX_RECORDS: u8 = 9;
    pub const FILE_EXTENSION: u8 = 10;
    pub const FILE_COMPRESSION_TYPE: u8 = 11;
    pub const NULL_REGEX: u8 = 12;
    pub const TRUNCATED_ROWS: u8 = 13;
    pub const PARTITION_COLUMN: u8 = 14;
}

/// Field tags for newline-delimited JSON read options.
#[allow(missing_docs)]
pub mod json_read {
    pub const SCHEMA: u8 = 1;
    pub const SCHEMA_INFER_MAX_RECORDS: u8 = 2;
    pub const FILE_EXTENSION: u8 = 3;
    pub const FILE_COMPRESSION_TYPE: u8 = 4;
    pub const PARTITION_COLUMN: u8 = 5;
}

/// Field tags for Parquet read options.
#[allow(missing_docs)]
pub mod parquet_read {
    pub const FILE_EXTENSION: u8 = 1;
    pub const PARQUET_PRUNING: u8 = 2;
    pub const SKIP_METADATA: u8 = 3;
    pub const SCHEMA: u8 = 4;
    pub const PARTITION_COLUMN: u8 = 5;
}

/// Field tags of a nested partition column message.
#[allow(missing_docs)]
pub mod partition_column {
    pub const NAME: u8 = 1;
    pub const DATA_TYPE: u8 = 2;
}

/// Field tags for format-independent write options.
#[allow(missing_docs)]
pub mod write {
    pub const INSERT_OP: u8 = 1;
    pub const SINGLE_FILE_OUTPUT: u8 = 2;
    pub const PARTITION_BY: u8 = 3;
}

/// Field tags for CSV write options.
#[allow(missing_docs)]
pub mod csv_write {
    pub const HAS_HEADER: u8 = 1;
    pub const DELIMITER: u8 = 2;
    pub const QUOTE: u8 = 3;
    pub const ESCAPE: u8 = 4;
    pub const COMPRESSION: u8 = 5;
    pub const SCHEMA_INFER_MAX_REC: u8 = 6;
    pub const DATE_FORMAT: u8 = 7;
    pub const DATETIME_FORMAT: u8 = 8;
    pub const TIMESTAMP_FORMAT: u8 = 9;
    pub const TIMESTAMP_TZ_FORMAT: u8 = 10;
    pub const TIME_FORMAT: u8 = 11;
    pub const NULL_VALUE: u8 = 12;
    pub const NULL_REGEX: u8 = 13;
    pub const COMMENT: u8 = 14;
    pub const DOUBLE_QUOTE: u8 = 15;
    pub const NEWLINES_IN_VALUES: u8 = 16;
    pub const TERMINATOR: u8 = 17;
}

/// Field tags for JSON write options.
#[allow(missing_docs)]
pub mod json_write {
    pub const COMPRESSION: u8 = 1;
    pub const SCHEMA_INFER_MAX_REC: u8 = 2;
}

/// Field tags for Parquet write options.
#[allow(missing_docs)]
pub mod parquet_write {
    pub const COMPRESSION: u8 = 1;
    pub const MAX_ROW_GROUP_SIZE: u8 = 2;
}

/// Field tags for SQL parameters.
///
/// The top level repeats [`PARAMETER`](params::PARAMETER). Each nested
/// parameter carries [`NAME`](params::NAME) and exactly one value field.
#[allow(missing_docs)]
pub mod params {
    pub const PARAMETER: u8 = 1;
    pub const NAME: u8 = 1;
    pub const NULL: u8 = 10;
    pub const BOOL: u8 = 11;
    pub const INT8: u8 = 12;
    pub const UINT8: u8 = 13;
    pub const INT16: u8 = 14;
    pub const UINT16: u8 = 15;
    pub const INT32: u8 = 16;
    pub const UINT32: u8 = 17;
    pub const INT64: u8 = 18;
    pub const UINT64: u8 = 19;
    pub const FLOAT32: u8 = 20;
    pub const FLOAT64: u8 = 21;
    pub const UTF8: u8 = 22;
    pub const BINARY: u8 = 23;
}

/// Wire values of compression codecs.
#[allow(missing_docs)]
pub mod compression {
    pub const GZIP: u8 = 0;
    pub const BZIP2: u8 = 1;
    pub const XZ: u8 = 2;
    pub const ZSTD: u8 = 3;
    pub const UNCOMPRESSED: u8 = 4;
}

/// Wire values of insert operations.
#[allow(missing_docs)]
pub mod insert_op {
    pub const APPEND: u8 = 0;
    pub const OVERWRITE: u8 = 1;
    pub const REPLACE: u8 = 2;
}

/// Malformed blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The blob ends inside a field header or value.
    #[error("options blob truncated at offset {0}")]
    Truncated(usize),
    /// A value has the wrong size or content for its tag.
    #[error("invalid value for field {tag}: {reason}")]
    InvalidValue {
        /// Field tag.
        tag: u8,
        /// What was wrong.
        reason: &'static str,
    },
}

/// One decoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field tag.
    pub tag: u8,
    /// Raw value bytes.
    pub value: &'a [u8],
}

impl<'a> Field<'a> {
    /// Decode a one-byte boolean.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] unless the value is a single 0 or 1.
    pub fn as_bool(&self) -> Result<bool, WireError> {
        match self.value {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(self.invalid("expected a boolean byte")),
        }
    }

    /// Decode a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] unless the value is one byte long.
    pub fn as_u8(&self) -> Result<u8, WireError> {
        match self.value {
            [b] => Ok(*b),
            _ => Err(self.invalid("expected a single byte")),
        }
    }

    /// Decode a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] unless the value is eight bytes long.
    pub fn as_u64(&self) -> Result<u64, WireError> {
        let bytes: [u8; 8] = self
            .value
            .try_into()
            .map_err(|_| self.invalid("expected eight bytes"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Decode a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] if the value is not UTF-8.
    pub fn as_str(&self) -> Result<&'a str, WireError> {
        std::str::from_utf8(self.value).map_err(|_| self.invalid("expected UTF-8"))
    }

    /// Decode a fixed-width little-endian value of `N` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidValue`] on a size mismatch.
    pub fn as_array<const N: usize>(&self) -> Result<[u8; N], WireError> {
        self.value
            .try_into()
            .map_err(|_| self.invalid("unexpected value width"))
    }

    /// Iterate the fields of a nested message.
    #[must_use]
    pub fn nested(&self) -> FieldReader<'a> {
        FieldReader::new(self.value)
    }

    fn invalid(&self, reason: &'static str) -> WireError {
        WireError::InvalidValue {
            tag: self.tag,
            reason,
        }
    }
}

/// Iterator over the fields of a blob.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    /// Read fields from `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<Field<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.remaining() < HEADER_LEN {
            self.buf = &[];
            return Some(Err(WireError::Truncated(self.offset)));
        }
        let mut header = &self.buf[..HEADER_LEN];
        let tag = header.get_u8();
        let len = header.get_u32_le() as usize;
        let rest = &self.buf[HEADER_LEN..];
        if rest.len() < len {
            self.buf = &[];
            return Some(Err(WireError::Truncated(self.offset)));
        }
        let (value, tail) = rest.split_at(len);
        self.buf = tail;
        self.offset += HEADER_LEN + len;
        Some(Ok(Field { tag, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&u32::try_from(value.len()).unwrap().to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_reads_fields_in_order() {
        let mut blob = field(csv_read::HAS_HEADER, &[1]);
        blob.extend(field(csv_read::FILE_EXTENSION, b".tsv"));
        blob.extend(field(csv_read::SCHEMA_INFER_MAX_RECORDS, &500_u64.to_le_bytes()));

        let fields: Vec<_> = FieldReader::new(&blob).collect::<Result<_, _>>().unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields[0].as_bool().unwrap());
        assert_eq!(fields[1].as_str().unwrap(), ".tsv");
        assert_eq!(fields[2].as_u64().unwrap(), 500);
    }

    #[test]
    fn test_empty_blob_has_no_fields() {
        assert_eq!(FieldReader::new(&[]).count(), 0);
    }

    #[test]
    fn test_truncated_value() {
        let mut blob = field(csv_read::DELIMITER, b";");
        blob.extend_from_slice(&[csv_read::QUOTE, 4, 0, 0, 0, b'"']);
        let results: Vec<_> = FieldReader::new(&blob).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(WireError::Truncated(6)));
    }

    #[test]
    fn test_truncated_header() {
        let results: Vec<_> = FieldReader::new(&[1, 0]).collect();
        assert_eq!(results, vec![Err(WireError::Truncated(0))]);
    }

    #[test]
    fn test_value_width_checks() {
        let f = Field { tag: 9, value: &[1, 2] };
        assert!(f.as_bool().is_err());
        assert!(f.as_u8().is_err());
        assert!(f.as_u64().is_err());
        assert_eq!(f.as_array::<2>().unwrap(), [1, 2]);
    }

    #[test]
    fn test_nested_message() {
        let mut inner = field(partition_column::NAME, b"year");
        inner.extend(field(partition_column::DATA_TYPE, b"Int32"));
        let outer = field(csv_read::PARTITION_COLUMN, &inner);

        let parent = FieldReader::new(&outer).next().unwrap().unwrap();
        let children: Vec<_> = parent.nested().collect::<Result<_, _>>().unwrap();
        assert_eq!(children[0].as_str().unwrap(), "year");
        assert_eq!(children[1].as_str().unwrap(), "Int32");
    }
}
