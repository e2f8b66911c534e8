//! Error details reported by a PostgreSQL server.

use std::collections::HashMap;
use std::fmt;

/// Contents of an ErrorResponse message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgServerError {
    pub severity: String,
    /// SQLSTATE code, e.g. `42P01`.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl PgServerError {
    /// Build from ErrorResponse fields keyed by their type byte.
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        let field = |key: u8| fields.get(&key).cloned();
        Self {
            severity: field(b'S').unwrap_or_else(|| "ERROR".to_string()),
            code: field(b'C').unwrap_or_default(),
            message: field(b'M').unwrap_or_else(|| "Unknown error".to_string()),
            detail: field(b'D'),
            hint: field(b'H'),
        }
    }
}

impl fmt::Display for PgServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for PgServerError {}

impl From<PgServerError> for crate::error::Error {
    fn from(e: PgServerError) -> Self {
        crate::error::Error::Postgres(e)
    }
}
