//! Reader and writer options, and their encoding into options blobs.
//!
//! Every options struct has `Option` fields defaulting to `None`. Only the
//! fields that are set travel to the engine; everything else keeps the
//! engine's own default.

use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::ipc::writer::StreamWriter;
use bytes::{BufMut, Bytes, BytesMut};
use fusebridge_native::wire::{self, HEADER_LEN};
use fusebridge_native::FbBytes;

use crate::error::{Error, Result};

/// Writer for one TLV message.
#[derive(Debug, Default)]
pub(crate) struct TlvWriter {
    buf: BytesMut,
}

impl TlvWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn field(&mut self, tag: u8, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| Error::argument(format!("options field {tag} is too large")))?;
        self.buf.reserve(HEADER_LEN + value.len());
        self.buf.put_u8(tag);
        self.buf.put_u32_le(len);
        self.buf.put_slice(value);
        Ok(())
    }

    pub(crate) fn bool(&mut self, tag: u8, value: bool) -> Result<()> {
        self.field(tag, &[u8::from(value)])
    }

    pub(crate) fn byte(&mut self, tag: u8, value: u8) -> Result<()> {
        self.field(tag, &[value])
    }

    pub(crate) fn u64(&mut self, tag: u8, value: u64) -> Result<()> {
        self.field(tag, &value.to_le_bytes())
    }

    pub(crate) fn usize(&mut self, tag: u8, value: usize) -> Result<()> {
        let value = u64::try_from(value)
            .map_err(|_| Error::argument(format!("options field {tag} is out of range")))?;
        self.u64(tag, value)
    }

    /// Single-byte character. Non-ASCII characters are rejected.
    pub(crate) fn ascii(&mut self, tag: u8, value: char, name: &str) -> Result<()> {
        match u8::try_from(value) {
            Ok(byte) if byte.is_ascii() => self.byte(tag, byte),
            _ => Err(Error::argument(format!(
                "{name} must be a single ASCII character, got {value:?}"
            ))),
        }
    }

    pub(crate) fn str(&mut self, tag: u8, value: &str) -> Result<()> {
        self.field(tag, value.as_bytes())
    }

    pub(crate) fn nested(&mut self, tag: u8, message: TlvWriter) -> Result<()> {
        self.field(tag, &message.buf)
    }

    pub(crate) fn schema(&mut self, tag: u8, schema: &Schema) -> Result<()> {
        let writer = StreamWriter::try_new(Vec::new(), schema)?;
        let ipc = writer.into_inner()?;
        self.field(tag, &ipc)
    }

    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Options that can be encoded into a blob.
pub(crate) trait WireOptions {
    /// Append the fields that are set.
    fn encode(&self, out: &mut TlvWriter) -> Result<()>;
}

/// An encoded options blob.
///
/// Stays alive and unmoved for the synchronous part of the native call that
/// borrows it.
#[derive(Debug, Clone, Default)]
pub(crate) struct OptionsBlob {
    bytes: Bytes,
}

impl OptionsBlob {
    /// Borrow the blob for a native call.
    pub(crate) fn as_ffi(&self) -> FbBytes {
        // to_blob already bounded the length
        FbBytes::from_slice(&self.bytes).unwrap_or(FbBytes::empty())
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Encode `options`, or produce an empty blob when there are none.
pub(crate) fn to_blob<O: WireOptions>(options: Option<&O>) -> Result<OptionsBlob> {
    let Some(options) = options else {
        return Ok(OptionsBlob::default());
    };
    let mut out = TlvWriter::new();
    options.encode(&mut out)?;
    let bytes = out.finish();
    if u32::try_from(bytes.len()).is_err() {
        return Err(Error::argument("options blob is too large"));
    }
    Ok(OptionsBlob { bytes })
}

/// Compression codec of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// gzip
    Gzip,
    /// bzip2
    Bzip2,
    /// xz
    Xz,
    /// zstd
    Zstd,
    /// No compression.
    Uncompressed,
}

impl CompressionType {
    fn wire(self) -> u8 {
        match self {
            Self::Gzip => wire::compression::GZIP,
            Self::Bzip2 => wire::compression::BZIP2,
            Self::Xz => wire::compression::XZ,
            Self::Zstd => wire::compression::ZSTD,
            Self::Uncompressed => wire::compression::UNCOMPRESSED,
        }
    }
}

/// Encode a write-side compression.
///
/// `Gzip` shares its wire value with "unset" on the write path and is
/// therefore omitted; the engine then writes uncompressed output.
fn write_compression(out: &mut TlvWriter, tag: u8, compression: Option<CompressionType>) -> Result<()> {
    match compression {
        None | Some(CompressionType::Gzip) => Ok(()),
        Some(c) => out.byte(tag, c.wire()),
    }
}

/// How a write treats existing data at the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertOp {
    /// Add to existing data.
    Append,
    /// Replace existing data.
    Overwrite,
    /// Replace rows with matching keys.
    Replace,
}

impl InsertOp {
    fn wire(self) -> u8 {
        match self {
            Self::Append => wire::insert_op::APPEND,
            Self::Overwrite => wire::insert_op::OVERWRITE,
            Self::Replace => wire::insert_op::REPLACE,
        }
    }
}

/// A column derived from the directory layout (`year=2024/...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionColumn {
    /// Column name, as it appears in the directory names.
    pub name: String,
    /// Column type.
    pub data_type: DataType,
}

impl PartitionColumn {
    /// Create a partition column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

fn partition_columns(out: &mut TlvWriter, tag: u8, columns: &[PartitionColumn]) -> Result<()> {
    for column in columns {
        let mut nested = TlvWriter::new();
        nested.str(wire::partition_column::NAME, &column.name)?;
        nested.str(wire::partition_column::DATA_TYPE, &column.data_type.to_string())?;
        out.nested(tag, nested)?;
    }
    Ok(())
}

fn put<T>(value: Option<T>, f: impl FnOnce(T) -> Result<()>) -> Result<()> {
    value.map_or(Ok(()), f)
}

/// Options for reading CSV files.
#[derive(Debug, Clone, Default)]
pub struct CsvReadOptions {
    /// Whether the first line is a header.
    pub has_header: Option<bool>,
    /// Field delimiter.
    pub delimiter: Option<char>,
    /// Quote character.
    pub quote: Option<char>,
    /// Line terminator; CRLF when unset.
    pub terminator: Option<char>,
    /// Escape character.
    pub escape: Option<char>,
    /// Lines starting with this character are skipped.
    pub comment: Option<char>,
    /// Whether quoted values may contain newlines.
    pub newlines_in_values: Option<bool>,
    /// Schema to use instead of inference.
    pub schema: Option<SchemaRef>,
    /// Number of rows read for schema inference.
    pub schema_infer_max_records: Option<usize>,
    /// Extension of the files to read in a directory.
    pub file_extension: Option<String>,
    /// Compression of the input files.
    pub file_compression_type: Option<CompressionType>,
    /// Regex matching values to read as null.
    pub null_regex: Option<String>,
    /// Whether rows with fewer fields than the schema are accepted.
    pub truncated_rows: Option<bool>,
    /// Columns derived from the directory layout.
    pub table_partition_cols: Vec<PartitionColumn>,
}

impl WireOptions for CsvReadOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::csv_read as tag;
        put(self.has_header, |v| out.bool(tag::HAS_HEADER, v))?;
        put(self.delimiter, |v| out.ascii(tag::DELIMITER, v, "delimiter"))?;
        put(self.quote, |v| out.ascii(tag::QUOTE, v, "quote"))?;
        put(self.terminator, |v| out.ascii(tag::TERMINATOR, v, "terminator"))?;
        put(self.escape, |v| out.ascii(tag::ESCAPE, v, "escape"))?;
        put(self.comment, |v| out.ascii(tag::COMMENT, v, "comment"))?;
        put(self.newlines_in_values, |v| out.bool(tag::NEWLINES_IN_VALUES, v))?;
        put(self.schema.as_deref(), |v| out.schema(tag::SCHEMA, v))?;
        put(self.schema_infer_max_records, |v| {
            out.usize(tag::SCHEMA_INFER_MAX_RECORDS, v)
        })?;
        put(self.file_extension.as_deref(), |v| out.str(tag::FILE_EXTENSION, v))?;
        put(self.file_compression_type, |v| {
            out.byte(tag::FILE_COMPRESSION_TYPE, v.wire())
        })?;
        put(self.null_regex.as_deref(), |v| out.str(tag::NULL_REGEX, v))?;
        put(self.truncated_rows, |v| out.bool(tag::TRUNCATED_ROWS, v))?;
        partition_columns(out, tag::PARTITION_COLUMN, &self.table_partition_cols)
    }
}

/// Options for reading newline-delimited JSON files.
#[derive(Debug, Clone, Default)]
pub struct JsonReadOptions {
    /// Schema to use instead of inference.
    pub schema: Option<SchemaRef>,
    /// Number of rows read for schema inference.
    pub schema_infer_max_records: Option<usize>,
    /// Extension of the files to read in a directory.
    pub file_extension: Option<String>,
    /// Compression of the input files.
    pub file_compression_type: Option<CompressionType>,
    /// Columns derived from the directory layout.
    pub table_partition_cols: Vec<PartitionColumn>,
}

impl WireOptions for JsonReadOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::json_read as tag;
        put(self.schema.as_deref(), |v| out.schema(tag::SCHEMA, v))?;
        put(self.schema_infer_max_records, |v| {
            out.usize(tag::SCHEMA_INFER_MAX_RECORDS, v)
        })?;
        put(self.file_extension.as_deref(), |v| out.str(tag::FILE_EXTENSION, v))?;
        put(self.file_compression_type, |v| {
            out.byte(tag::FILE_COMPRESSION_TYPE, v.wire())
        })?;
        partition_columns(out, tag::PARTITION_COLUMN, &self.table_partition_cols)
    }
}

/// Options for reading Parquet files.
#[derive(Debug, Clone, Default)]
pub struct ParquetReadOptions {
    /// Extension of the files to read in a directory.
    pub file_extension: Option<String>,
    /// Whether row groups are pruned using statistics.
    pub parquet_pruning: Option<bool>,
    /// Whether embedded metadata is dropped from the schema.
    pub skip_metadata: Option<bool>,
    /// Schema to use instead of the file schema.
    pub schema: Option<SchemaRef>,
    /// Columns derived from the directory layout.
    pub table_partition_cols: Vec<PartitionColumn>,
}

impl WireOptions for ParquetReadOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::parquet_read as tag;
        put(self.file_extension.as_deref(), |v| out.str(tag::FILE_EXTENSION, v))?;
        put(self.parquet_pruning, |v| out.bool(tag::PARQUET_PRUNING, v))?;
        put(self.skip_metadata, |v| out.bool(tag::SKIP_METADATA, v))?;
        put(self.schema.as_deref(), |v| out.schema(tag::SCHEMA, v))?;
        partition_columns(out, tag::PARTITION_COLUMN, &self.table_partition_cols)
    }
}

/// Format-independent options for writing a result.
#[derive(Debug, Clone, Default)]
pub struct DataFrameWriteOptions {
    /// How existing data at the target is treated.
    pub insert_op: Option<InsertOp>,
    /// Write a single file instead of a directory of parts.
    pub single_file_output: Option<bool>,
    /// Columns to partition the output directory by.
    pub partition_by: Vec<String>,
}

impl WireOptions for DataFrameWriteOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::write as tag;
        put(self.insert_op, |v| out.byte(tag::INSERT_OP, v.wire()))?;
        put(self.single_file_output, |v| out.bool(tag::SINGLE_FILE_OUTPUT, v))?;
        for column in &self.partition_by {
            out.str(tag::PARTITION_BY, column)?;
        }
        Ok(())
    }
}

/// Options for writing CSV.
///
/// `Gzip` compression is not available on the write path and produces
/// uncompressed output.
#[derive(Debug, Clone, Default)]
pub struct CsvWriteOptions {
    /// Whether a header line is written.
    pub has_header: Option<bool>,
    /// Field delimiter.
    pub delimiter: Option<char>,
    /// Quote character.
    pub quote: Option<char>,
    /// Escape character.
    pub escape: Option<char>,
    /// Output compression.
    pub compression: Option<CompressionType>,
    /// Number of rows read for schema inference.
    pub schema_infer_max_rec: Option<usize>,
    /// Format of `Date32`/`Date64` values.
    pub date_format: Option<String>,
    /// Format of datetime values.
    pub datetime_format: Option<String>,
    /// Format of timestamps without a time zone.
    pub timestamp_format: Option<String>,
    /// Format of timestamps with a time zone.
    pub timestamp_tz_format: Option<String>,
    /// Format of time values.
    pub time_format: Option<String>,
    /// Text written for nulls.
    pub null_value: Option<String>,
    /// Regex matching values to read as null.
    pub null_regex: Option<String>,
    /// Comment character.
    pub comment: Option<char>,
    /// Whether quotes inside values are doubled.
    pub double_quote: Option<bool>,
    /// Whether values may contain newlines.
    pub newlines_in_values: Option<bool>,
    /// Line terminator.
    pub terminator: Option<char>,
}

impl WireOptions for CsvWriteOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::csv_write as tag;
        put(self.has_header, |v| out.bool(tag::HAS_HEADER, v))?;
        put(self.delimiter, |v| out.ascii(tag::DELIMITER, v, "delimiter"))?;
        put(self.quote, |v| out.ascii(tag::QUOTE, v, "quote"))?;
        put(self.escape, |v| out.ascii(tag::ESCAPE, v, "escape"))?;
        write_compression(out, tag::COMPRESSION, self.compression)?;
        put(self.schema_infer_max_rec, |v| out.usize(tag::SCHEMA_INFER_MAX_REC, v))?;
        put(self.date_format.as_deref(), |v| out.str(tag::DATE_FORMAT, v))?;
        put(self.datetime_format.as_deref(), |v| out.str(tag::DATETIME_FORMAT, v))?;
        put(self.timestamp_format.as_deref(), |v| out.str(tag::TIMESTAMP_FORMAT, v))?;
        put(self.timestamp_tz_format.as_deref(), |v| {
            out.str(tag::TIMESTAMP_TZ_FORMAT, v)
        })?;
        put(self.time_format.as_deref(), |v| out.str(tag::TIME_FORMAT, v))?;
        put(self.null_value.as_deref(), |v| out.str(tag::NULL_VALUE, v))?;
        put(self.null_regex.as_deref(), |v| out.str(tag::NULL_REGEX, v))?;
        put(self.comment, |v| out.ascii(tag::COMMENT, v, "comment"))?;
        put(self.double_quote, |v| out.bool(tag::DOUBLE_QUOTE, v))?;
        put(self.newlines_in_values, |v| out.bool(tag::NEWLINES_IN_VALUES, v))?;
        put(self.terminator, |v| out.ascii(tag::TERMINATOR, v, "terminator"))
    }
}

/// Options for writing newline-delimited JSON.
///
/// `Gzip` compression is not available on the write path and produces
/// uncompressed output.
#[derive(Debug, Clone, Default)]
pub struct JsonWriteOptions {
    /// Output compression.
    pub compression: Option<CompressionType>,
    /// Number of rows read for schema inference.
    pub schema_infer_max_rec: Option<usize>,
}

impl WireOptions for JsonWriteOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::json_write as tag;
        write_compression(out, tag::COMPRESSION, self.compression)?;
        put(self.schema_infer_max_rec, |v| out.usize(tag::SCHEMA_INFER_MAX_REC, v))
    }
}

/// Options for writing Parquet.
#[derive(Debug, Clone, Default)]
pub struct ParquetWriteOptions {
    /// Codec name as the Parquet writer spells it, e.g. `snappy` or `zstd(3)`.
    pub compression: Option<String>,
    /// Maximum number of rows per row group.
    pub max_row_group_size: Option<usize>,
}

impl WireOptions for ParquetWriteOptions {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::parquet_write as tag;
        put(self.compression.as_deref(), |v| out.str(tag::COMPRESSION, v))?;
        put(self.max_row_group_size, |v| out.usize(tag::MAX_ROW_GROUP_SIZE, v))
    }
}
