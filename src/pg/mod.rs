//! PostgreSQL wire protocol client.
//!
//! Speaks the simple query protocol with text-format results.
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `types`: OID dispatch for row values and literal rendering
//! - `machine`: Connection state machine (no I/O)
//! - `connection`: Configuration and the tokio-driven connection
//! - `error`: Server error responses

pub mod connection;
pub mod error;
pub mod machine;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{PgConfig, PgConnection};
pub use error::PgServerError;
pub use types::Oid;
