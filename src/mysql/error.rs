//! Error details reported by a MySQL server.

use std::fmt;

/// Contents of an ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlServerError {
    pub code: u16,
    /// Five-character SQLSTATE; empty for pre-4.1 style errors.
    pub sql_state: String,
    pub message: String,
}

impl fmt::Display for MysqlServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sql_state.is_empty() {
            write!(f, "{}: {}", self.code, self.message)
        } else {
            write!(f, "{} ({}): {}", self.code, self.sql_state, self.message)
        }
    }
}

impl std::error::Error for MysqlServerError {}

impl From<MysqlServerError> for crate::error::Error {
    fn from(e: MysqlServerError) -> Self {
        crate::error::Error::Mysql(e)
    }
}
