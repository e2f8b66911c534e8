//! Text conversions shared by both backends.
//!
//! The `format_*` functions produce bare text; each backend applies its own
//! quoting around them.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::value::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_FRACTION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Significant digits used for floating point literals (`%.15g`).
const FLOAT_PRECISION: i32 = 15;

/// Format a float the way C's `%.15g` does.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Round to the target precision first; the exponent after rounding picks
    // between fixed and scientific notation.
    let sci = format!("{:.*e}", (FLOAT_PRECISION - 1) as usize, v);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => match e.parse::<i32>() {
            Ok(e) => (m, e),
            Err(_) => return v.to_string(),
        },
        None => return v.to_string(),
    };

    if exp < -4 || exp >= FLOAT_PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (FLOAT_PRECISION - 1 - exp) as usize;
        trim_fraction(&format!("{:.*}", decimals, v)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Decode bytes one-to-one into code points U+0000..U+00FF.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

pub fn format_date(v: &NaiveDate) -> String {
    v.format(DATE_FORMAT).to_string()
}

/// Datetimes always carry microseconds.
pub fn format_datetime(v: &NaiveDateTime) -> String {
    v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Times carry microseconds only when they are nonzero.
pub fn format_time(v: &NaiveTime) -> String {
    let micros = (v.nanosecond() % 1_000_000_000) / 1_000;
    hms(
        false,
        u64::from(v.hour()),
        v.minute(),
        v.second(),
        micros,
    )
}

/// Durations are written as hours:minutes:seconds, with hours computed from
/// the total number of seconds (so they may exceed 24).
pub fn format_duration(v: &TimeDelta) -> String {
    let negative = *v < TimeDelta::zero();
    let abs = if negative { -*v } else { *v };
    let total = abs.num_seconds().unsigned_abs();
    let micros = (abs.subsec_nanos().unsigned_abs()) / 1_000;
    hms(
        negative,
        total / 3600,
        ((total % 3600) / 60) as u32,
        (total % 60) as u32,
        micros,
    )
}

fn hms(negative: bool, hour: u64, minute: u32, second: u32, micros: u32) -> String {
    let sign = if negative { "-" } else { "" };
    if micros != 0 {
        format!("{}{:02}:{:02}:{:02}.{:06}", sign, hour, minute, second, micros)
    } else {
        format!("{}{:02}:{:02}:{:02}", sign, hour, minute, second)
    }
}

pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| Error::type_error(format!("'{}' is not a date: {}", text, e)))
}

/// Parse `YYYY-MM-DD HH:MM:SS[.ffffff]`, trying the fractional form first.
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATETIME_FRACTION_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, DATETIME_FORMAT))
        .map_err(|e| Error::type_error(format!("'{}' is not a datetime: {}", text, e)))
}

/// Parse `[-]HH:MM:SS[.ffffff]`.
///
/// Values of 24 hours or more, and negative values, can't be a time of day;
/// MySQL uses TIME for signed intervals, so those become [`Value::Duration`].
pub fn parse_time(text: &str) -> Result<Value> {
    let invalid = || Error::type_error(format!("'{}' is not a time", text));

    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, micros) = match body.split_once('.') {
        Some((clock, fraction)) => {
            if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            // Right-pad to six digits and ignore anything past microseconds.
            let padded: String = fraction.chars().chain("000000".chars()).take(6).collect();
            (clock, padded.parse::<u32>().map_err(|_| invalid())?)
        }
        None => (body, 0),
    };

    let mut parts = clock.split(':');
    let (hours, minutes, seconds) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(s), None) => (
            h.parse::<u64>().map_err(|_| invalid())?,
            m.parse::<u32>().map_err(|_| invalid())?,
            s.parse::<u32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    if minutes > 59 || seconds > 59 {
        return Err(invalid());
    }

    if !negative && hours < 24 {
        return NaiveTime::from_hms_micro_opt(hours as u32, minutes, seconds, micros)
            .map(Value::Time)
            .ok_or_else(invalid);
    }

    let hours = i64::try_from(hours).map_err(|_| invalid())?;
    let delta = TimeDelta::try_hours(hours)
        .and_then(|h| h.checked_add(&TimeDelta::minutes(i64::from(minutes))))
        .and_then(|d| d.checked_add(&TimeDelta::seconds(i64::from(seconds))))
        .and_then(|d| d.checked_add(&TimeDelta::microseconds(i64::from(micros))))
        .ok_or_else(invalid)?;
    Ok(Value::Duration(if negative { -delta } else { delta }))
}

// ============================================================================
// Inbound Converters
// ============================================================================

/// Column bytes after character decoding.
#[derive(Debug, Clone, Copy)]
pub enum Decoded<'a> {
    Text(&'a str),
    /// Binary-collated columns; never character decoded.
    Binary(&'a [u8]),
}

impl<'a> Decoded<'a> {
    pub fn text(&self) -> Result<&'a str> {
        match *self {
            Decoded::Text(s) => Ok(s),
            Decoded::Binary(b) => std::str::from_utf8(b)
                .map_err(|e| Error::type_error(format!("column is not valid text: {}", e))),
        }
    }

    /// Value when no converter applies.
    pub fn passthrough(self) -> Value {
        match self {
            Decoded::Text(s) => Value::Text(s.to_string()),
            Decoded::Binary(b) => Value::Bytes(b.to_vec()),
        }
    }
}

/// Text (or bytes) to native value for one column type.
pub type Converter = fn(Decoded<'_>) -> Result<Value>;

/// Signed integers, falling back to unsigned for BIGINT UNSIGNED.
pub fn to_int(d: Decoded<'_>) -> Result<Value> {
    let s = d.text()?;
    s.parse::<i64>()
        .map(Value::Int)
        .or_else(|_| s.parse::<u64>().map(Value::UInt))
        .map_err(|_| Error::type_error(format!("'{}' is not an integer", s)))
}

pub fn to_float(d: Decoded<'_>) -> Result<Value> {
    let s = d.text()?;
    s.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| Error::type_error(format!("'{}' is not a float", s)))
}

pub fn to_decimal(d: Decoded<'_>) -> Result<Value> {
    let s = d.text()?;
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map(Value::Decimal)
        .map_err(|e| Error::type_error(format!("'{}' is not a decimal: {}", s, e)))
}

pub fn to_json(d: Decoded<'_>) -> Result<Value> {
    let s = d.text()?;
    serde_json::from_str(s)
        .map(Value::Json)
        .map_err(|e| Error::type_error(format!("invalid JSON column: {}", e)))
}

pub fn to_date(d: Decoded<'_>) -> Result<Value> {
    parse_date(d.text()?).map(Value::Date)
}

pub fn to_datetime(d: Decoded<'_>) -> Result<Value> {
    parse_datetime(d.text()?).map(Value::DateTime)
}

pub fn to_time(d: Decoded<'_>) -> Result<Value> {
    parse_time(d.text()?)
}
