//! PostgreSQL type decoding and literal rendering.
//!
//! Rows arrive in text format; [`Oid::converter`] picks the conversion for a
//! column from its type OID. [`to_postgres`] renders values as literals,
//! dollar-quoting anything textual.

use rand::Rng;

use crate::convert::{self, Converter, Decoded};
use crate::error::{Error, Result};
use crate::value::Value;

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
///
/// These are the built-in type OIDs from PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    // Boolean types
    pub const BOOL: Oid = Oid(16);

    // Binary data
    pub const BYTEA: Oid = Oid(17);

    // Character types
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);

    // Integer types
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);

    // Text types
    pub const TEXT: Oid = Oid(25);

    // OID type
    pub const OID_TYPE: Oid = Oid(26);

    // Floating point types
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);

    // String types
    pub const VARCHAR: Oid = Oid(1043);
    pub const BPCHAR: Oid = Oid(1042);

    // Date/time types
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const INTERVAL: Oid = Oid(1186);

    // JSON types
    pub const JSON: Oid = Oid(114);
    pub const JSONB: Oid = Oid(3802);

    // Numeric
    pub const NUMERIC: Oid = Oid(1700);

    /// Create from raw i32 value
    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    /// Get the raw i32 value
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Converter for this type; `None` returns the column text as is.
    pub fn converter(self) -> Option<Converter> {
        let converter: Converter = match self {
            Oid::BOOL => to_bool,
            Oid::INT2 | Oid::INT4 | Oid::INT8 | Oid::OID_TYPE => convert::to_int,
            Oid::NUMERIC => convert::to_decimal,
            Oid::FLOAT4 | Oid::FLOAT8 => convert::to_float,
            Oid::TIMESTAMP => convert::to_datetime,
            Oid::TIME => convert::to_time,
            Oid::DATE => convert::to_date,
            Oid::JSON | Oid::JSONB => convert::to_json,
            _ => return None,
        };
        Some(converter)
    }
}

/// Text-format booleans: `t` is true, anything else false.
fn to_bool(d: Decoded<'_>) -> Result<Value> {
    Ok(Value::Bool(d.text()? == "t"))
}

/// Decode one column of a DataRow. NULL skips conversion.
pub fn from_postgres(raw: Option<&[u8]>, converter: Option<Converter>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::type_error(format!("column is not valid UTF-8: {}", e)))?;
    match converter {
        Some(convert) => convert(Decoded::Text(text)),
        None => Ok(Value::Text(text.to_string())),
    }
}

// ============================================================================
// Outbound Serialization
// ============================================================================

const TOKEN_CHARS: &[u8] = b"0123456789abcdef";

/// Wrap `s` in `$token$` delimiters, growing a random hex token until the
/// delimiter no longer occurs in `s`.
pub fn dollar_quote_with<R: Rng + ?Sized>(s: &str, rng: &mut R) -> String {
    let mut token = String::new();
    loop {
        let delim = format!("${}$", token);
        if !s.contains(&delim) {
            return format!("{}{}{}", delim, s, delim);
        }
        token.push(char::from(TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())]));
    }
}

pub fn dollar_quote(s: &str) -> String {
    dollar_quote_with(s, &mut rand::thread_rng())
}

/// Render a value as a PostgreSQL literal.
pub fn to_postgres(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => dollar_quote(if *b { "1" } else { "0" }),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => dollar_quote(&convert::format_float(*v)),
        Value::Decimal(v) => dollar_quote(&v.to_string()),
        Value::Text(s) => dollar_quote(s),
        Value::Bytes(b) => dollar_quote(&convert::latin1(b)),
        Value::Date(d) => format!("'{}'", convert::format_date(d)),
        Value::DateTime(dt) => format!("'{}'", convert::format_datetime(dt)),
        Value::Time(t) => format!("'{}'", convert::format_time(t)),
        Value::Duration(d) => format!("'{}'", convert::format_duration(d)),
        Value::Json(j) => dollar_quote(&j.to_string()),
        Value::Set(items) => dollar_quote(&items.iter().cloned().collect::<Vec<_>>().join(",")),
        Value::Raw(sql) => sql.clone(),
        Value::Bit(_) => {
            return Err(Error::type_error("BIT values have no PostgreSQL literal"));
        }
    })
}
