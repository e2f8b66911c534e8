//! Error types shared by both protocol backends and the pool.

use thiserror::Error;

use crate::mysql::error::MysqlServerError;
use crate::pg::error::PgServerError;

#[derive(Error, Debug)]
pub enum Error {
    /// Sequence mismatch, malformed frame, unknown message tag.
    /// The connection that produced it must not be reused.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("MySQL error {0}")]
    Mysql(MysqlServerError),

    #[error("{0}")]
    Postgres(PgServerError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Raised while converting a value, before anything is sent.
    #[error("Type conversion error: {0}")]
    Type(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("A query is already running on this connection")]
    Busy,

    /// A pooled connection failed its health check and could not be replaced.
    #[error("Unable to reconnect to database: {0}")]
    DatabaseReconnect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error came from the server rejecting a command.
    /// The connection stays usable after these.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Mysql(_) | Error::Postgres(_))
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        Error::Type(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
