//! Decoding of options blobs into engine option types.
//!
//! Blobs are decoded synchronously into owned `*Settings` values before an entry
//! point returns, so the caller may drop the blob as soon as the call is
//! accepted. Engine option types borrow from the settings when the task runs.

use std::io::Cursor;
use std::str::FromStr;

use arrow::datatypes::{DataType, SchemaRef};
use arrow::ipc::reader::StreamReader;
use datafusion::common::config::{CsvOptions, JsonOptions, TableParquetOptions};
use datafusion::common::parsers::CompressionTypeVariant;
use datafusion::common::{ParamValues, ScalarValue};
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::datasource::file_format::file_compression_type::FileCompressionType;
use datafusion::logical_expr::dml::InsertOp;
use datafusion::prelude::{CsvReadOptions, NdJsonReadOptions, ParquetReadOptions};

use crate::error::NativeError;
use crate::wire::{self, Field, FieldReader, WireError};

impl From<WireError> for NativeError {
    fn from(e: WireError) -> Self {
        NativeError::invalid_argument(e.to_string())
    }
}

fn fields(blob: &[u8]) -> impl Iterator<Item = Result<Field<'_>, NativeError>> {
    FieldReader::new(blob).map(|f| f.map_err(NativeError::from))
}

fn decode_schema(field: &Field<'_>) -> Result<SchemaRef, NativeError> {
    let reader = StreamReader::try_new(Cursor::new(field.value), None)
        .map_err(|e| NativeError::invalid_argument(format!("invalid schema: {e}")))?;
    Ok(reader.schema())
}

fn decode_partition_column(field: &Field<'_>) -> Result<(String, DataType), NativeError> {
    let mut name = None;
    let mut data_type = None;
    for child in field.nested() {
        let child = child?;
        match child.tag {
            wire::partition_column::NAME => name = Some(child.as_str()?.to_owned()),
            wire::partition_column::DATA_TYPE => {
                let text = child.as_str()?;
                data_type = Some(DataType::from_str(text).map_err(|e| {
                    NativeError::invalid_argument(format!("invalid partition column type: {e}"))
                })?);
            }
            _ => {}
        }
    }
    match (name, data_type) {
        (Some(name), Some(data_type)) => Ok((name, data_type)),
        _ => Err(NativeError::invalid_argument(
            "partition column requires a name and a data type",
        )),
    }
}

fn decode_usize(field: &Field<'_>) -> Result<usize, NativeError> {
    usize::try_from(field.as_u64()?)
        .map_err(|_| NativeError::invalid_argument(format!("field {} out of range", field.tag)))
}

fn compression_variant(field: &Field<'_>) -> Result<CompressionTypeVariant, NativeError> {
    match field.as_u8()? {
        wire::compression::GZIP => Ok(CompressionTypeVariant::GZIP),
        wire::compression::BZIP2 => Ok(CompressionTypeVariant::BZIP2),
        wire::compression::XZ => Ok(CompressionTypeVariant::XZ),
        wire::compression::ZSTD => Ok(CompressionTypeVariant::ZSTD),
        wire::compression::UNCOMPRESSED => Ok(CompressionTypeVariant::UNCOMPRESSED),
        other => Err(NativeError::invalid_argument(format!(
            "unknown compression type {other}"
        ))),
    }
}

fn file_compression(field: &Field<'_>) -> Result<FileCompressionType, NativeError> {
    Ok(FileCompressionType::from(compression_variant(field)?))
}

fn skip(field: &Field<'_>) {
    tracing::debug!(tag = field.tag, "ignoring unknown options field");
}

// ============================================================================
// Read options
// ============================================================================

/// Owned form of CSV read options.
#[derive(Debug, Default)]
pub(crate) struct CsvReadSettings {
    has_header: Option<bool>,
    delimiter: Option<u8>,
    quote: Option<u8>,
    terminator: Option<u8>,
    escape: Option<u8>,
    comment: Option<u8>,
    newlines_in_values: Option<bool>,
    schema: Option<SchemaRef>,
    schema_infer_max_records: Option<usize>,
    file_extension: Option<String>,
    file_compression_type: Option<FileCompressionType>,
    null_regex: Option<String>,
    truncated_rows: Option<bool>,
    partition_cols: Vec<(String, DataType)>,
}

impl CsvReadSettings {
    pub(crate) fn decode(blob: &[u8]) -> Result<Self, NativeError> {
        use wire::csv_read as tag;
        let mut settings = Self::default();
        for field in fields(blob) {
            let field = field?;
            match field.tag {
                tag::HAS_HEADER => settings.has_header = Some(field.as_bool()?),
                tag::DELIMITER => settings.delimiter = Some(field.as_u8()?),
                tag::QUOTE => settings.quote = Some(field.as_u8()?),
                tag::TERMINATOR => settings.terminator = Some(field.as_u8()?),
                tag::ESCAPE => settings.escape = Some(field.as_u8()?),
                tag::COMMENT => settings.comment = Some(field.as_u8()?),
                tag::NEWLINES_IN_VALUES => settings.newlines_in_values = Some(field.as_bool()?),
                tag::SCHEMA => settings.schema = Some(decode_schema(&field)?),
                tag::SCHEMA_INFER_MAX_RECORDS => {
                    settings.schema_infer_max_records = Some(decode_usize(&field)?);
                }
                tag::FILE_EXTENSION => settings.file_extension = Some(field.as_str()?.to_owned()),
                tag::FILE_COMPRESSION_TYPE => {
                    settings.file_compression_type = Some(file_compression(&field)?);
                }
                tag::NULL_REGEX => settings.null_regex = Some(field.as_str()?.to_owned()),
                tag::TRUNCATED_ROWS => settings.truncated_rows = Some(field.as_bool()?),
                tag::PARTITION_COLUMN => settings.partition_cols.push(decode_partition_column(&field)?),
                _ => skip(&field),
            }
        }
        Ok(settings)
    }

    pub(crate) fn to_options(&self) -> CsvReadOptions<'_> {
        let mut opts = CsvReadOptions::new();
        if let Some(v) = self.has_header {
            opts.has_header = v;
        }
        if let Some(v) = self.delimiter {
            opts.delimiter = v;
        }
        if let Some(v) = self.quote {
            opts.quote = v;
        }
        opts.terminator = self.terminator;
        opts.escape = self.escape;
        opts.comment = self.comment;
        if let Some(v) = self.newlines_in_values {
            opts.newlines_in_values = v;
        }
        opts.schema = self.schema.as_deref();
        if let Some(v) = self.schema_infer_max_records {
            opts.schema_infer_max_records = v;
        }
        if let Some(ext) = &self.file_extension {
            opts.file_extension = ext;
        }
        if let Some(v) = self.file_compression_type {
            opts.file_compression_type = v;
        }
        opts.null_regex.clone_from(&self.null_regex);
        if let Some(v) = self.truncated_rows {
            opts.truncated_rows = v;
        }
        opts.table_partition_cols.clone_from(&self.partition_cols);
        opts
    }
}

/// Owned form of newline-delimited JSON read options.
#[derive(Debug, Default)]
pub(crate) struct JsonReadSettings {
    schema: Option<SchemaRef>,
    schema_infer_max_records: Option<usize>,
    file_extension: Option<String>,
    file_compression_type: Option<FileCompressionType>,
    partition_cols: Vec<(String, DataType)>,
}

impl JsonReadSettings {
    pub(crate) fn decode(blob: &[u8]) -> Result<Self, NativeError> {
        use wire::json_read as tag;
        let mut settings = Self::default();
        for field in fields(blob) {
            let field = field?;
            match field.tag {
                tag::SCHEMA => settings.schema = Some(decode_schema(&field)?),
                tag::SCHEMA_INFER_MAX_RECORDS => {
                    settings.schema_infer_max_records = Some(decode_usize(&field)?);
                }
                tag::FILE_EXTENSION => settings.file_extension = Some(field.as_str()?.to_owned()),
                tag::FILE_COMPRESSION_TYPE => {
                    settings.file_compression_type = Some(file_compression(&field)?);
                }
                tag::PARTITION_COLUMN => settings.partition_cols.push(decode_partition_column(&field)?),
                _ => skip(&field),
            }
        }
        Ok(settings)
    }

    pub(crate) fn to_options(&self) -> NdJsonReadOptions<'_> {
        let mut opts = NdJsonReadOptions::default();
        opts.schema = self.schema.as_deref();
        if let Some(v) = self.schema_infer_max_records {
            opts.schema_infer_max_records = v;
        }
        if let Some(ext) = &self.file_extension {
            opts.file_extension = ext;
        }
        if let Some(v) = self.file_compression_type {
            opts.file_compression_type = v;
        }
        opts.table_partition_cols.clone_from(&self.partition_cols);
        opts
    }
}

/// Owned form of Parquet read options.
#[derive(Debug, Default)]
pub(crate) struct ParquetReadSettings {
    file_extension: Option<String>,
    parquet_pruning: Option<bool>,
    skip_metadata: Option<bool>,
    schema: Option<SchemaRef>,
    partition_cols: Vec<(String, DataType)>,
}

impl ParquetReadSettings {
    pub(crate) fn decode(blob: &[u8]) -> Result<Self, NativeError> {
        use wire::parquet_read as tag;
        let mut settings = Self::default();
        for field in fields(blob) {
            let field = field?;
            match field.tag {
                tag::FILE_EXTENSION => settings.file_extension = Some(field.as_str()?.to_owned()),
                tag::PARQUET_PRUNING => settings.parquet_pruning = Some(field.as_bool()?),
                tag::SKIP_METADATA => settings.skip_metadata = Some(field.as_bool()?),
                tag::SCHEMA => settings.schema = Some(decode_schema(&field)?),
                tag::PARTITION_COLUMN => settings.partition_cols.push(decode_partition_column(&field)?),
                _ => skip(&field),
            }
        }
        Ok(settings)
    }

    pub(crate) fn to_options(&self) -> ParquetReadOptions<'_> {
        let mut opts = ParquetReadOptions::default();
        if let Some(ext) = &self.file_extension {
            opts.file_extension = ext;
        }
        if self.parquet_pruning.is_some() {
            opts.parquet_pruning = self.parquet_pruning;
        }
        if self.skip_metadata.is_some() {
            opts.skip_metadata = self.skip_metadata;
        }
        opts.schema = self.schema.as_deref();
        opts.table_partition_cols.clone_from(&self.partition_cols);
        opts
    }
}

// ============================================================================
// Write options
// ============================================================================

/// Owned form of format-independent write options.
#[derive(Debug, Default)]
pub(crate) struct WriteSettings {
    insert_op: Option<InsertOp>,
    single_file_output: Option<bool>,
    partition_by: Vec<String>,
}

impl WriteSettings {
    pub(crate) fn decode(blob: &[u8]) -> Result<Self, NativeError> {
        use wire::write as tag;
        let mut settings = Self::default();
        for field in fields(blob) {
            let field = field?;
            match field.tag {
                tag::INSERT_OP => {
                    settings.insert_op = Some(match field.as_u8()? {
                        wire::insert_op::APPEND => InsertOp::Append,
                        wire::insert_op::OVERWRITE => InsertOp::Overwrite,
                        wire::insert_op::REPLACE => InsertOp::Replace,
                        other => {
                            return Err(NativeError::invalid_argument(format!(
                                "unknown insert operation {other}"
                            )))
                        }
                    });
                }
                tag::SINGLE_FILE_OUTPUT => settings.single_file_output = Some(field.as_bool()?),
                tag::PARTITION_BY => settings.partition_by.push(field.as_str()?.to_owned()),
                _ => skip(&field),
            }
        }
        Ok(settings)
    }

    pub(crate) fn to_options(&self) -> DataFrameWriteOptions {
        let mut opts = DataFrameWriteOptions::new();
        if let Some(op) = self.insert_op {
            opts = opts.with_insert_operation(op);
        }
        if let Some(single) = self.single_file_output {
            opts = opts.with_single_file_output(single);
        }
        if !self.partition_by.is_empty() {
            opts = opts.with_partition_by(self.partition_by.clone());
        }
        opts
    }
}

/// Decode CSV writer options. An omitted compression writes uncompressed output.
pub(crate) fn decode_csv_write(blob: &[u8]) -> Result<CsvOptions, NativeError> {
    use wire::csv_write as tag;
    let mut opts = CsvOptions::default();
    opts.compression = CompressionTypeVariant::UNCOMPRESSED;
    for field in fields(blob) {
        let field = field?;
        match field.tag {
            tag::HAS_HEADER => opts.has_header = Some(field.as_bool()?),
            tag::DELIMITER => opts.delimiter = field.as_u8()?,
            tag::QUOTE => opts.quote = field.as_u8()?,
            tag::ESCAPE => opts.escape = Some(field.as_u8()?),
            tag::COMPRESSION => opts.compression = compression_variant(&field)?,
            tag::SCHEMA_INFER_MAX_REC => opts.schema_infer_max_rec = Some(decode_usize(&field)?),
            tag::DATE_FORMAT => opts.date_format = Some(field.as_str()?.to_owned()),
            tag::DATETIME_FORMAT => opts.datetime_format = Some(field.as_str()?.to_owned()),
            tag::TIMESTAMP_FORMAT => opts.timestamp_format = Some(field.as_str()?.to_owned()),
            tag::TIMESTAMP_TZ_FORMAT => {
                opts.timestamp_tz_format = Some(field.as_str()?.to_owned());
            }
            tag::TIME_FORMAT => opts.time_format = Some(field.as_str()?.to_owned()),
            tag::NULL_VALUE => opts.null_value = Some(field.as_str()?.to_owned()),
            tag::NULL_REGEX => opts.null_regex = Some(field.as_str()?.to_owned()),
            tag::COMMENT => opts.comment = Some(field.as_u8()?),
            tag::DOUBLE_QUOTE => opts.double_quote = Some(field.as_bool()?),
            tag::NEWLINES_IN_VALUES => opts.newlines_in_values = Some(field.as_bool()?),
            tag::TERMINATOR => opts.terminator = Some(field.as_u8()?),
            _ => skip(&field),
        }
    }
    Ok(opts)
}

/// Decode JSON writer options. An omitted compression writes uncompressed output.
pub(crate) fn decode_json_write(blob: &[u8]) -> Result<JsonOptions, NativeError> {
    use wire::json_write as tag;
    let mut opts = JsonOptions::default();
    opts.compression = CompressionTypeVariant::UNCOMPRESSED;
    for field in fields(blob) {
        let field = field?;
        match field.tag {
            tag::COMPRESSION => opts.compression = compression_variant(&field)?,
            tag::SCHEMA_INFER_MAX_REC => opts.schema_infer_max_rec = Some(decode_usize(&field)?),
            _ => skip(&field),
        }
    }
    Ok(opts)
}

/// Decode Parquet writer options.
pub(crate) fn decode_parquet_write(blob: &[u8]) -> Result<TableParquetOptions, NativeError> {
    use wire::parquet_write as tag;
    let mut opts = TableParquetOptions::default();
    for field in fields(blob) {
        let field = field?;
        match field.tag {
            tag::COMPRESSION => opts.global.compression = Some(field.as_str()?.to_owned()),
            tag::MAX_ROW_GROUP_SIZE => opts.global.max_row_group_size = decode_usize(&field)?,
            _ => skip(&field),
        }
    }
    Ok(opts)
}

// ============================================================================
// SQL parameters
// ============================================================================

fn decode_scalar(field: &Field<'_>) -> Result<Option<ScalarValue>, NativeError> {
    use wire::params as tag;
    let value = match field.tag {
        tag::NULL => ScalarValue::Null,
        tag::BOOL => ScalarValue::Boolean(Some(field.as_bool()?)),
        tag::INT8 => ScalarValue::Int8(Some(i8::from_le_bytes(field.as_array()?))),
        tag::UINT8 => ScalarValue::UInt8(Some(field.as_u8()?)),
        tag::INT16 => ScalarValue::Int16(Some(i16::from_le_bytes(field.as_array()?))),
        tag::UINT16 => ScalarValue::UInt16(Some(u16::from_le_bytes(field.as_array()?))),
        tag::INT32 => ScalarValue::Int32(Some(i32::from_le_bytes(field.as_array()?))),
        tag::UINT32 => ScalarValue::UInt32(Some(u32::from_le_bytes(field.as_array()?))),
        tag::INT64 => ScalarValue::Int64(Some(i64::from_le_bytes(field.as_array()?))),
        tag::UINT64 => ScalarValue::UInt64(Some(field.as_u64()?)),
        tag::FLOAT32 => ScalarValue::Float32(Some(f32::from_le_bytes(field.as_array()?))),
        tag::FLOAT64 => ScalarValue::Float64(Some(f64::from_le_bytes(field.as_array()?))),
        tag::UTF8 => ScalarValue::Utf8(Some(field.as_str()?.to_owned())),
        tag::BINARY => ScalarValue::Binary(Some(field.value.to_vec())),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Named SQL parameters decoded from a blob.
#[derive(Debug, Default)]
pub(crate) struct SqlParams {
    values: Vec<(String, ScalarValue)>,
}

impl SqlParams {
    fn value(&self, placeholder: &str) -> Option<&ScalarValue> {
        let name = placeholder.strip_prefix('$').unwrap_or(placeholder);
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether `placeholder` (`$name`) has a bound value.
    pub(crate) fn contains(&self, placeholder: &str) -> bool {
        self.value(placeholder).is_some()
    }

    /// SQL type of the value bound to `placeholder`; `None` for null or
    /// unbound placeholders.
    pub(crate) fn sql_type(&self, placeholder: &str) -> Option<&'static str> {
        Some(match self.value(placeholder)? {
            ScalarValue::Boolean(_) => "BOOLEAN",
            ScalarValue::Int8(_) => "TINYINT",
            ScalarValue::Int16(_) => "SMALLINT",
            ScalarValue::Int32(_) => "INT",
            ScalarValue::Int64(_) => "BIGINT",
            ScalarValue::UInt8(_) => "TINYINT UNSIGNED",
            ScalarValue::UInt16(_) => "SMALLINT UNSIGNED",
            ScalarValue::UInt32(_) => "INT UNSIGNED",
            ScalarValue::UInt64(_) => "BIGINT UNSIGNED",
            ScalarValue::Float32(_) => "REAL",
            ScalarValue::Float64(_) => "DOUBLE",
            ScalarValue::Utf8(_) => "VARCHAR",
            ScalarValue::Binary(_) => "BYTEA",
            _ => return None,
        })
    }

    pub(crate) fn into_param_values(self) -> ParamValues {
        ParamValues::from(self.values)
    }
}

/// Decode named SQL parameters. `None` when the blob carries no parameters.
pub(crate) fn decode_params(blob: &[u8]) -> Result<Option<SqlParams>, NativeError> {
    let mut values: Vec<(String, ScalarValue)> = Vec::new();
    for field in fields(blob) {
        let field = field?;
        if field.tag != wire::params::PARAMETER {
            skip(&field);
            continue;
        }
        let mut name = None;
        let mut value = None;
        for child in field.nested() {
            let child = child?;
            if child.tag == wire::params::NAME {
                name = Some(child.as_str()?.to_owned());
            } else if let Some(v) = decode_scalar(&child)? {
                value = Some(v);
            } else {
                skip(&child);
            }
        }
        match (name, value) {
            (Some(name), Some(value)) => values.push((name, value)),
            _ => {
                return Err(NativeError::invalid_argument(
                    "SQL parameter requires a name and a value",
                ))
            }
        }
    }
    Ok((!values.is_empty()).then_some(SqlParams { values }))
}
