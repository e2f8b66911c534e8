//! MySQL column types and value conversion.
//!
//! Inbound, each column's [`FieldType`] selects a converter from the
//! dispatch table in [`FieldType::converter`]. Outbound, [`to_mysql`] renders
//! a [`Value`] as an SQL literal.

use crate::convert::{self, Converter, Decoded};
use crate::error::{Error, Result};
use crate::value::{be_bytes_to_u64, Value};

// ============================================================================
// Field Types
// ============================================================================

/// MySQL column type codes, as sent in column definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType(pub u8);

impl FieldType {
    pub const DECIMAL: FieldType = FieldType(0);
    pub const TINY: FieldType = FieldType(1);
    pub const SHORT: FieldType = FieldType(2);
    pub const LONG: FieldType = FieldType(3);
    pub const FLOAT: FieldType = FieldType(4);
    pub const DOUBLE: FieldType = FieldType(5);
    pub const NULL: FieldType = FieldType(6);
    pub const TIMESTAMP: FieldType = FieldType(7);
    pub const LONGLONG: FieldType = FieldType(8);
    pub const INT24: FieldType = FieldType(9);
    pub const DATE: FieldType = FieldType(10);
    pub const TIME: FieldType = FieldType(11);
    pub const DATETIME: FieldType = FieldType(12);
    pub const YEAR: FieldType = FieldType(13);
    pub const NEWDATE: FieldType = FieldType(14);
    pub const VARCHAR: FieldType = FieldType(15);
    pub const BIT: FieldType = FieldType(16);
    pub const JSON: FieldType = FieldType(245);
    pub const NEWDECIMAL: FieldType = FieldType(246);
    pub const ENUM: FieldType = FieldType(247);
    pub const SET: FieldType = FieldType(248);
    pub const TINY_BLOB: FieldType = FieldType(249);
    pub const MEDIUM_BLOB: FieldType = FieldType(250);
    pub const LONG_BLOB: FieldType = FieldType(251);
    pub const BLOB: FieldType = FieldType(252);
    pub const VAR_STRING: FieldType = FieldType(253);
    pub const STRING: FieldType = FieldType(254);
    pub const GEOMETRY: FieldType = FieldType(255);

    /// Types whose bytes are decoded with the connection character set,
    /// unless the column is binary collated.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            FieldType::BIT
                | FieldType::BLOB
                | FieldType::LONG_BLOB
                | FieldType::MEDIUM_BLOB
                | FieldType::STRING
                | FieldType::TINY_BLOB
                | FieldType::VAR_STRING
                | FieldType::VARCHAR
                | FieldType::GEOMETRY
        )
    }

    /// Converter for this type; `None` means the decoded text (or bytes)
    /// is returned as is.
    pub fn converter(self) -> Option<Converter> {
        let converter: Converter = match self {
            FieldType::BIT => to_bits,
            FieldType::TINY
            | FieldType::SHORT
            | FieldType::LONG
            | FieldType::LONGLONG
            | FieldType::INT24
            | FieldType::YEAR => convert::to_int,
            FieldType::FLOAT | FieldType::DOUBLE => convert::to_float,
            FieldType::DECIMAL | FieldType::NEWDECIMAL => convert::to_decimal,
            FieldType::TIMESTAMP | FieldType::DATETIME => convert::to_datetime,
            FieldType::DATE | FieldType::NEWDATE => convert::to_date,
            FieldType::TIME => convert::to_time,
            FieldType::JSON => convert::to_json,
            _ => return None,
        };
        Some(converter)
    }
}

/// How a column's raw bytes are turned into text before conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnEncoding {
    /// Connection character set (utf8mb4).
    Text,
    /// Numeric and temporal types; always ASCII.
    Ascii,
    /// Binary collation; handed over as bytes.
    Binary,
}

impl ColumnEncoding {
    pub fn for_column(field_type: FieldType, binary: bool) -> Self {
        if field_type == FieldType::JSON {
            ColumnEncoding::Text
        } else if field_type.is_text() {
            if binary {
                ColumnEncoding::Binary
            } else {
                ColumnEncoding::Text
            }
        } else {
            ColumnEncoding::Ascii
        }
    }

    pub fn decode<'a>(self, raw: &'a [u8]) -> Result<Decoded<'a>> {
        match self {
            ColumnEncoding::Binary => Ok(Decoded::Binary(raw)),
            ColumnEncoding::Ascii if !raw.is_ascii() => {
                Err(Error::type_error("non-ASCII bytes in a numeric or temporal column"))
            }
            ColumnEncoding::Text | ColumnEncoding::Ascii => std::str::from_utf8(raw)
                .map(Decoded::Text)
                .map_err(|e| Error::type_error(format!("column is not valid utf8mb4: {}", e))),
        }
    }
}

/// BIT columns arrive as big-endian bytes.
fn to_bits(d: Decoded<'_>) -> Result<Value> {
    let bytes = match d {
        Decoded::Binary(b) => b,
        Decoded::Text(s) => s.as_bytes(),
    };
    be_bytes_to_u64(bytes).map(Value::UInt)
}

/// Decode one column of a text-protocol row. NULL skips conversion.
pub fn from_mysql(
    raw: Option<&[u8]>,
    encoding: ColumnEncoding,
    converter: Option<Converter>,
) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let decoded = encoding.decode(raw)?;
    match converter {
        Some(convert) => convert(decoded),
        None => Ok(decoded.passthrough()),
    }
}

// ============================================================================
// Outbound Serialization
// ============================================================================

/// Backslash-escape a string for use inside single quotes.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\u{8}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{1a}' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out
}

fn quoted(s: &str) -> String {
    format!("'{}'", escape_string(s))
}

/// Render a value as a MySQL literal.
pub fn to_mysql(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => format!("'{}'", u8::from(*b)),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => format!("'{}'", convert::format_float(*v)),
        Value::Decimal(v) => format!("'{}'", v),
        Value::Text(s) => quoted(s),
        Value::Bytes(b) => quoted(&convert::latin1(b)),
        Value::Date(d) => format!("'{}'", convert::format_date(d)),
        Value::DateTime(dt) => format!("'{}'", convert::format_datetime(dt)),
        Value::Time(t) => format!("'{}'", convert::format_time(t)),
        Value::Duration(d) => format!("'{}'", convert::format_duration(d)),
        Value::Json(j) => quoted(&j.to_string()),
        Value::Bit(bit) => format!("b'{}'", bit.as_binary()),
        Value::Set(items) => quoted(&items.iter().cloned().collect::<Vec<_>>().join(",")),
        Value::Raw(sql) => sql.clone(),
    })
}
