//! Native values exchanged with both backends.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;

use crate::error::{Error, Result};

// Re-export serde_json::Value for JSON support
pub use serde_json::Value as JsonValue;

/// A column value or query argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    /// Signed interval; MySQL TIME values above 24 hours decode to this.
    Duration(TimeDelta),
    Json(JsonValue),
    Bit(Bit),
    Set(BTreeSet<String>),
    /// SQL text substituted verbatim, bypassing escaping (e.g. `NOW()`).
    Raw(String),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, used in conversion error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Json(_) => "json",
            Value::Bit(_) => "bit",
            Value::Set(_) => "set",
            Value::Raw(_) => "raw",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Raw(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// Plain text form of the value, without any SQL quoting.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => f.write_str(&crate::convert::format_float(*v)),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Text(v) | Value::Raw(v) => f.write_str(v),
            Value::Bytes(v) => f.write_str(&crate::convert::latin1(v)),
            Value::Date(v) => f.write_str(&crate::convert::format_date(v)),
            Value::DateTime(v) => f.write_str(&crate::convert::format_datetime(v)),
            Value::Time(v) => f.write_str(&crate::convert::format_time(v)),
            Value::Duration(v) => f.write_str(&crate::convert::format_duration(v)),
            Value::Json(v) => write!(f, "{}", v),
            Value::Bit(v) => f.write_str(&v.as_binary()),
            Value::Set(v) => f.write_str(&v.iter().cloned().collect::<Vec<_>>().join(",")),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    u64 => UInt,
    f32 => Float,
    f64 => Float,
    Decimal => Decimal,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    NaiveTime => Time,
    TimeDelta => Duration,
    JsonValue => Json,
    Bit => Bit,
    BTreeSet<String> => Set,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Value of a MySQL BIT(n) column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bit {
    pub length: u32,
    pub value: u64,
}

impl Bit {
    pub fn new(length: u32, value: u64) -> Self {
        Self { length, value }
    }

    /// Parse a string of ones and zeros no longer than `length`.
    pub fn parse(length: u32, bits: &str) -> Result<Self> {
        if bits.is_empty() || !bits.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(Error::type_error(format!("'{}' contains invalid bits", bits)));
        }
        if bits.len() > length as usize {
            return Err(Error::type_error(format!(
                "'{}' is too long (length={})",
                bits, length
            )));
        }
        let value = u64::from_str_radix(bits, 2)
            .map_err(|e| Error::type_error(format!("'{}' is not a bit string: {}", bits, e)))?;
        Ok(Self { length, value })
    }

    /// Build from big-endian bytes, as BIT columns arrive on the wire.
    pub fn from_be_bytes(length: u32, bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            length,
            value: be_bytes_to_u64(bytes)?,
        })
    }

    /// String of ones and zeros, without leading zeros.
    pub fn as_binary(&self) -> String {
        format!("{:b}", self.value)
    }
}

/// Interpret up to eight big-endian bytes as an unsigned integer.
pub fn be_bytes_to_u64(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > 8 {
        return Err(Error::type_error(format!(
            "bit value of {} bytes does not fit in 64 bits",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_parse() {
        let bit = Bit::parse(5, "1010").unwrap();
        assert_eq!(bit.value, 10);
        assert_eq!(bit.as_binary(), "1010");
    }

    #[test]
    fn test_bit_rejects_bad_input() {
        assert!(Bit::parse(5, "10201").is_err());
        assert!(Bit::parse(3, "1010").is_err());
        assert!(Bit::parse(3, "").is_err());
    }

    #[test]
    fn test_bit_from_bytes() {
        assert_eq!(Bit::from_be_bytes(16, &[0x01, 0x02]).unwrap().value, 0x0102);
        assert!(Bit::from_be_bytes(64, &[0; 9]).is_err());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Int(3));
    }
}
