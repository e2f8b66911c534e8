//! MySQL client/server protocol client.
//!
//! Speaks protocol 4.1 with the text result-set format (COM_QUERY).
//!
//! Architecture:
//! - `protocol`: Packet layout, handshake and response packets
//! - `auth`: Password scrambles for the supported auth plugins
//! - `types`: Column type dispatch, string escaping and literal rendering
//! - `machine`: Connection state machine (no I/O)
//! - `connection`: Configuration and the tokio-driven connection
//! - `error`: Server ERR packets

pub mod auth;
pub mod connection;
pub mod error;
pub mod machine;
pub mod protocol;
pub mod types;


pub use connection::{MysqlConfig, MysqlConnection};
pub use error::MysqlServerError;
pub use types::FieldType;
