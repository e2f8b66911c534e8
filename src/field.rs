//! Field-level value normalisation.
//!
//! A model layer declares each column with a [`FieldKind`] and runs values
//! through [`FieldKind::parse`] before building SQL, so bad input fails
//! before anything reaches the network.

use chrono::NaiveTime;

use crate::convert;
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    /// Fixed-length text, space padded to `length`. Longer input is
    /// truncated, or rejected when `strict`.
    Char { length: usize, strict: bool },
    Integer,
    Boolean,
    Date,
    Datetime,
    /// Time of day or interval.
    Time,
    Binary,
}

impl FieldKind {
    pub fn char(length: usize) -> Self {
        FieldKind::Char {
            length,
            strict: false,
        }
    }

    pub fn strict_char(length: usize) -> Self {
        FieldKind::Char {
            length,
            strict: true,
        }
    }

    /// Normalise `value` for this field. NULL is rejected by every kind
    /// except `Binary`; nullable columns skip parsing for NULL.
    pub fn parse(&self, value: Value) -> Result<Value> {
        if value.is_null() && *self != FieldKind::Binary {
            return Err(Error::type_error(format!("None is not a {} value", self.name())));
        }
        match self {
            FieldKind::String => Ok(Value::Text(value.to_string())),
            FieldKind::Char { length, strict } => parse_char(value, *length, *strict),
            FieldKind::Integer => parse_integer(value),
            FieldKind::Boolean => parse_boolean(value),
            FieldKind::Date => match value {
                Value::DateTime(dt) => Ok(Value::Date(dt.date())),
                Value::Date(d) => Ok(Value::Date(d)),
                Value::Text(s) => convert::parse_date(&s).map(Value::Date),
                other => Err(mismatch(&other, "date")),
            },
            FieldKind::Datetime => match value {
                Value::DateTime(dt) => Ok(Value::DateTime(dt)),
                Value::Date(d) => Ok(Value::DateTime(d.and_time(NaiveTime::default()))),
                Value::Text(s) => convert::parse_datetime(&s).map(Value::DateTime),
                other => Err(mismatch(&other, "datetime")),
            },
            FieldKind::Time => match value {
                Value::Time(_) | Value::Duration(_) => Ok(value),
                Value::Text(s) => convert::parse_time(&s),
                other => Err(mismatch(&other, "time")),
            },
            FieldKind::Binary => Ok(value),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String | FieldKind::Char { .. } => "string",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            FieldKind::Time => "time",
            FieldKind::Binary => "binary",
        }
    }
}

fn mismatch(value: &Value, expected: &str) -> Error {
    Error::type_error(format!("'{}' is not a {} value", value, expected))
}

fn parse_char(value: Value, length: usize, strict: bool) -> Result<Value> {
    let text = value.to_string();
    let count = text.chars().count();
    if strict && count > length {
        return Err(Error::type_error("value is too long for field"));
    }
    let padded: String = text
        .chars()
        .chain(std::iter::repeat(' '))
        .take(length)
        .collect();
    Ok(Value::Text(padded))
}

fn parse_integer(value: Value) -> Result<Value> {
    let not_integer = |v: &Value| Error::type_error(format!("'{}' is not an integer", v));
    match value {
        Value::Int(_) | Value::UInt(_) => Ok(value),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.2e18 {
                Ok(Value::Int(f as i64))
            } else {
                Err(not_integer(&value))
            }
        }
        Value::Decimal(d) => {
            if d.fract().is_zero() {
                i64::try_from(d)
                    .map(Value::Int)
                    .map_err(|_| not_integer(&value))
            } else {
                Err(not_integer(&value))
            }
        }
        Value::Text(ref s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| not_integer(&value)),
        other => Err(not_integer(&other)),
    }
}

fn parse_boolean(value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(1) | Value::UInt(1) => Ok(Value::Bool(true)),
        Value::Int(0) | Value::UInt(0) => Ok(Value::Bool(false)),
        Value::Float(f) if f == 1.0 => Ok(Value::Bool(true)),
        Value::Float(f) if f == 0.0 => Ok(Value::Bool(false)),
        ref other => match other.to_string().to_uppercase().as_str() {
            "TRUE" | "T" => Ok(Value::Bool(true)),
            "FALSE" | "F" => Ok(Value::Bool(false)),
            _ => Err(Error::type_error(format!("'{}' is not a boolean", other))),
        },
    }
}
