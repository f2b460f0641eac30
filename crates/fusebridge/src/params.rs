//! Named SQL parameters.
//!
//! A query refers to a parameter as `$name`; the parameter itself is bound
//! by the bare name.

use std::any::Any;

use fusebridge_native::wire;

use crate::error::{Error, Result};
use crate::options::{to_blob, OptionsBlob, TlvWriter, WireOptions};

/// Value of a SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// 8-bit signed integer.
    Int8(i8),
    /// 8-bit unsigned integer.
    UInt8(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Byte array.
    Binary(Vec<u8>),
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Utf8,
    &str => Utf8,
    Vec<u8> => Binary,
    &[u8] => Binary,
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl ParamValue {
    /// Convert a dynamically typed value.
    ///
    /// Accepts `()` as null and the types with a `From` conversion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] for any other type.
    pub fn from_any(value: &dyn Any) -> Result<Self> {
        macro_rules! try_downcast {
            ($($ty:ty),*) => {
                $(
                    if let Some(v) = value.downcast_ref::<$ty>() {
                        return Ok(Self::from(v.clone()));
                    }
                )*
            };
        }
        if value.is::<()>() {
            return Ok(Self::Null);
        }
        try_downcast!(bool, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, String, Vec<u8>);
        if let Some(v) = value.downcast_ref::<&str>() {
            return Ok(Self::from(*v));
        }
        if let Some(v) = value.downcast_ref::<&[u8]>() {
            return Ok(Self::from(*v));
        }
        Err(Error::argument(format!(
            "unsupported parameter type {:?}",
            value.type_id()
        )))
    }

    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        use wire::params as tag;
        match self {
            Self::Null => out.field(tag::NULL, &[]),
            Self::Bool(v) => out.bool(tag::BOOL, *v),
            Self::Int8(v) => out.field(tag::INT8, &v.to_le_bytes()),
            Self::UInt8(v) => out.byte(tag::UINT8, *v),
            Self::Int16(v) => out.field(tag::INT16, &v.to_le_bytes()),
            Self::UInt16(v) => out.field(tag::UINT16, &v.to_le_bytes()),
            Self::Int32(v) => out.field(tag::INT32, &v.to_le_bytes()),
            Self::UInt32(v) => out.field(tag::UINT32, &v.to_le_bytes()),
            Self::Int64(v) => out.field(tag::INT64, &v.to_le_bytes()),
            Self::UInt64(v) => out.u64(tag::UINT64, *v),
            Self::Float32(v) => out.field(tag::FLOAT32, &v.to_le_bytes()),
            Self::Float64(v) => out.field(tag::FLOAT64, &v.to_le_bytes()),
            Self::Utf8(v) => out.str(tag::UTF8, v),
            Self::Binary(v) => out.field(tag::BINARY, v),
        }
    }
}

/// A parameter bound by name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParameter {
    name: String,
    value: ParamValue,
}

impl NamedParameter {
    /// Bind `value` to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if the name is empty, blank, or starts
    /// with a placeholder marker (`$`, `:`, `@`, `?`).
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::argument("parameter name must not be empty"));
        }
        if name.starts_with(['$', ':', '@', '?']) {
            return Err(Error::argument(format!(
                "parameter name {name:?} must not include the placeholder marker"
            )));
        }
        Ok(Self {
            name,
            value: value.into(),
        })
    }

    /// Parameter name, without marker.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound value.
    #[must_use]
    pub fn value(&self) -> &ParamValue {
        &self.value
    }
}

struct ParamList<'a>(&'a [NamedParameter]);

impl WireOptions for ParamList<'_> {
    fn encode(&self, out: &mut TlvWriter) -> Result<()> {
        for param in self.0 {
            let mut nested = TlvWriter::new();
            nested.str(wire::params::NAME, &param.name)?;
            param.value.encode(&mut nested)?;
            out.nested(wire::params::PARAMETER, nested)?;
        }
        Ok(())
    }
}

/// Encode a parameter list; an empty list gives an empty blob.
pub(crate) fn encode_params(params: &[NamedParameter]) -> Result<OptionsBlob> {
    to_blob(Some(&ParamList(params)))
}
