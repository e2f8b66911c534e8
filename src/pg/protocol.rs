//! PostgreSQL wire protocol message encoding and decoding.
//!
//! This module implements the simple-query subset of the v3 protocol.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::types::Oid;
use crate::codec::WireReader;
use crate::error::{Error, Result};
use crate::framer::FrameLayout;

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Tag byte plus 4-byte big-endian length (the length counts itself).
pub const HEADER_LEN: usize = 5;

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => TransactionStatus::Idle,
        }
    }
}

/// Frame layout for the message framer.
pub struct PgLayout;

impl FrameLayout for PgLayout {
    const HEADER_LEN: usize = HEADER_LEN;

    fn parse_header(header: &[u8]) -> Result<(u8, usize)> {
        let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if len < 4 {
            return Err(Error::protocol(format!(
                "invalid length {} for message '{}'",
                len, header[0] as char
            )));
        }
        Ok((header[0], len as usize - 4))
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Startup message sent at connection start
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: Option<String>,
    pub options: Vec<(String, String)>,
}

impl FrontendMessage for StartupMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        // Placeholder for length (will be filled in at the end)
        buf.put_i32(0);

        buf.put_i32(PROTOCOL_VERSION);

        buf.put_slice(b"user\0");
        buf.put_slice(self.user.as_bytes());
        buf.put_u8(0);

        if let Some(ref db) = self.database {
            buf.put_slice(b"database\0");
            buf.put_slice(db.as_bytes());
            buf.put_u8(0);
        }

        for (key, value) in &self.options {
            buf.put_slice(key.as_bytes());
            buf.put_u8(0);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }

        // Terminator
        buf.put_u8(0);

        // Fill in length (includes length field itself)
        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        buf
    }
}

/// Password message (cleartext or MD5 digest)
#[derive(Debug, Clone)]
pub struct PasswordMessage {
    pub password: String,
}

impl FrontendMessage for PasswordMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'p');

        // Length (4 bytes) + password + null terminator
        let len = 4 + self.password.len() as i32 + 1;
        buf.put_i32(len);

        buf.put_slice(self.password.as_bytes());
        buf.put_u8(0);

        buf
    }
}

/// Simple query message ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub query: String,
}

impl FrontendMessage for QueryMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');

        // Length (4 bytes) + query + null terminator
        let len = 4 + self.query.len() as i32 + 1;
        buf.put_i32(len);

        buf.put_slice(self.query.as_bytes());
        buf.put_u8(0);

        buf
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'X');
        buf.put_i32(4);
        buf
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSASL { mechanisms: Vec<String> },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },

    // Other
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
}

impl BackendMessage {
    /// Decode the body of a message whose type byte is `tag`.
    pub fn decode(tag: u8, body: Bytes) -> Result<Self> {
        match tag {
            b'R' => Self::decode_auth(&body),
            b'T' => Self::decode_row_description(&body),
            b'D' => Self::decode_data_row(body),
            b'C' => Self::decode_command_complete(&body),
            b'Z' => Self::decode_ready_for_query(&body),
            b'E' => Self::decode_error_response(&body),
            b'N' => Self::decode_notice_response(&body),
            b'S' => Self::decode_parameter_status(&body),
            b'K' => Self::decode_backend_key_data(&body),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'A' => Self::decode_notification_response(&body),
            _ => Err(Error::protocol(format!(
                "Unknown message type: {}",
                tag as char
            ))),
        }
    }

    fn decode_auth(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::big_endian(body);
        let auth_type = r.read_i32()?;

        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(r.read(4)?);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while !r.is_empty() {
                    let mech = read_cstring(&mut r)?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            _ => Err(Error::Auth(format!(
                "Unsupported authentication type: {}",
                auth_type
            ))),
        }
    }

    fn decode_row_description(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::big_endian(body);
        let num_fields = r.read_i16()?.max(0) as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = read_cstring(&mut r)?;
            let table_oid = r.read_i32()?;
            let column_attr = r.read_i16()?;
            let type_oid = Oid::from_i32(r.read_i32()?);
            let type_size = r.read_i16()?;
            let type_modifier = r.read_i32()?;
            let format = if r.read_i16()? == 0 {
                Format::Text
            } else {
                Format::Binary
            };

            fields.push(FieldDescription {
                name,
                table_oid,
                column_attr,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    /// Column values are sliced out of `body` without copying.
    fn decode_data_row(body: Bytes) -> Result<Self> {
        let mut r = WireReader::big_endian(&body);
        let num_cols = r.read_i16()?.max(0) as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            let len = r.read_i32()?;
            if len < 0 {
                values.push(None);
            } else {
                let start = r.position();
                r.skip(len as usize)?;
                values.push(Some(body.slice(start..start + len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn decode_command_complete(body: &[u8]) -> Result<Self> {
        let tag = read_cstring(&mut WireReader::big_endian(body))?;
        Ok(BackendMessage::CommandComplete { tag })
    }

    fn decode_ready_for_query(body: &[u8]) -> Result<Self> {
        let status = TransactionStatus::from(WireReader::big_endian(body).read_u8()?);
        Ok(BackendMessage::ReadyForQuery { status })
    }

    fn decode_error_response(body: &[u8]) -> Result<Self> {
        let fields = read_error_fields(body)?;
        Ok(BackendMessage::ErrorResponse { fields })
    }

    fn decode_notice_response(body: &[u8]) -> Result<Self> {
        let fields = read_error_fields(body)?;
        Ok(BackendMessage::NoticeResponse { fields })
    }

    fn decode_parameter_status(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::big_endian(body);
        let name = read_cstring(&mut r)?;
        let value = read_cstring(&mut r)?;
        Ok(BackendMessage::ParameterStatus { name, value })
    }

    fn decode_backend_key_data(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::big_endian(body);
        let process_id = r.read_i32()?;
        let secret_key = r.read_i32()?;
        Ok(BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        })
    }

    fn decode_notification_response(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::big_endian(body);
        let process_id = r.read_i32()?;
        let channel = read_cstring(&mut r)?;
        let payload = read_cstring(&mut r)?;

        Ok(BackendMessage::NotificationResponse {
            process_id,
            channel,
            payload,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read a null-terminated string.
/// Tries direct UTF-8 first, falls back to lossy only if invalid.
fn read_cstring(r: &mut WireReader<'_>) -> Result<String> {
    let bytes = r.read_cstr_required()?;
    Ok(std::str::from_utf8(bytes)
        .map(|s| s.to_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned()))
}

/// Read error/notice response fields
fn read_error_fields(body: &[u8]) -> Result<HashMap<u8, String>> {
    let mut r = WireReader::big_endian(body);
    let mut fields = HashMap::new();

    while !r.is_empty() {
        let field_type = r.read_u8()?;
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut r)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    // First hash: md5(password + username)
    let inner = format!("{}{}", password, user);
    let inner_hash = format!("{:x}", md5::compute(inner.as_bytes()));

    // Second hash: md5(inner_hash + salt)
    let mut outer_input = inner_hash.into_bytes();
    outer_input.extend_from_slice(salt);
    let outer_hash = format!("{:x}", md5::compute(&outer_input));

    format!("md5{}", outer_hash)
}

/// Rows reported by a CommandComplete tag.
pub fn rows_affected(tag: &str) -> u64 {
    let parts: Vec<&str> = tag.split_whitespace().collect();
    match parts.as_slice() {
        ["INSERT", _, n]
        | ["UPDATE", n]
        | ["DELETE", n]
        | ["SELECT", n]
        | ["MERGE", n]
        | ["FETCH", n]
        | ["MOVE", n]
        | ["COPY", n] => n.parse().unwrap_or(0),
        _ => 0,
    }
}
