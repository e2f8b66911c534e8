//! MySQL client/server packet encoding and decoding.
//!
//! Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/PAGE_PROTOCOL.html

use bytes::{BufMut, BytesMut};

use super::error::MysqlServerError;
use super::types::FieldType;
use crate::codec::{put_cstr, WireReader};
use crate::error::{Error, Result};
use crate::framer::FrameLayout;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Largest payload carried by one packet; longer commands are split.
pub const MAX_PACKET_LEN: usize = (1 << 24) - 1;

/// Packet header: 3-byte little-endian length + 1-byte sequence number.
pub const HEADER_LEN: usize = 4;

/// Capability flags.
pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 0x0000_0001;
    pub const LONG_FLAG: u32 = 0x0000_0004;
    pub const CONNECT_WITH_DB: u32 = 0x0000_0008;
    pub const PROTOCOL_41: u32 = 0x0000_0200;
    pub const TRANSACTIONS: u32 = 0x0000_2000;
    pub const SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const PLUGIN_AUTH: u32 = 0x0008_0000;

    /// Flags this client always asks for.
    pub const CLIENT: u32 = LONG_PASSWORD
        | LONG_FLAG
        | PROTOCOL_41
        | TRANSACTIONS
        | SECURE_CONNECTION
        | PLUGIN_AUTH;
}

/// Server status flags.
pub mod status {
    pub const AUTOCOMMIT: u16 = 0x0002;
}

/// Command bytes.
pub mod command {
    pub const QUIT: u8 = 0x01;
    pub const QUERY: u8 = 0x03;
    pub const PING: u8 = 0x0E;
}

/// Character set ids.
pub mod charset {
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    /// Columns declared with this character set carry raw bytes.
    pub const BINARY: u16 = 63;
}

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xFE;
const ERR_HEADER: u8 = 0xFF;
const AUTH_MORE_DATA_HEADER: u8 = 0x01;

/// Frame layout for the packet framer.
pub struct MysqlLayout;

impl FrameLayout for MysqlLayout {
    const HEADER_LEN: usize = HEADER_LEN;

    fn parse_header(header: &[u8]) -> Result<(u8, usize)> {
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        Ok((header[3], len))
    }
}

/// Prefix `payload` with a packet header.
pub fn serialize(payload: &[u8], sequence: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    buf.put_u8(sequence);
    buf.put_slice(payload);
    buf
}

pub fn is_ok(payload: &[u8]) -> bool {
    payload.first() == Some(&OK_HEADER)
}

/// EOF packets are short; a 0xFE-led packet of 9+ bytes is an OK packet
/// (or a row whose first value has an 8-byte length prefix).
pub fn is_eof(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

pub fn is_error(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// Connection Phase
// ============================================================================

/// Initial handshake sent by the server (protocol version 10).
#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Auth plugin data: 8 bytes plus the extended part, without filler.
    pub salt: Vec<u8>,
    pub capabilities: u32,
    pub server_language: u8,
    pub status_flags: u16,
    pub auth_plugin_name: Option<String>,
}

impl Handshake {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if is_error(payload) {
            return Err(Error::Auth(ErrPacket::parse(payload)?.into_server_error().to_string()));
        }

        let mut r = WireReader::little_endian(payload);

        let protocol_version = r.read_u8()?;
        let server_version = lossy(r.read_cstr_required()?);
        let connection_id = r.read_u32()?;
        let mut salt = r.read(8)?.to_vec();
        r.skip(1)?; // filler
        let mut capabilities = u32::from(r.read_u16()?);

        let mut server_language = 0;
        let mut status_flags = 0;
        let mut salt_len = 0;
        if r.remaining() >= 6 {
            server_language = r.read_u8()?;
            status_flags = r.read_u16()?;
            capabilities |= u32::from(r.read_u16()?) << 16;
            // Length covers both salt parts plus the trailing NUL.
            salt_len = usize::from(r.read_u8()?).saturating_sub(9).max(12);
        }

        if r.remaining() >= 10 {
            r.skip(10)?; // reserved
        }

        if salt_len > 0 && r.remaining() >= salt_len {
            salt.extend_from_slice(r.read(salt_len)?);
            if r.peek() == Some(0) {
                r.skip(1)?;
            }
        }

        let auth_plugin_name = if capabilities & capabilities::PLUGIN_AUTH != 0 && !r.is_empty() {
            // Some servers omit the terminating NUL.
            let name = match r.read_cstr() {
                Some(name) => name,
                None => r.read_all(),
            };
            Some(lossy(name))
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            salt,
            capabilities,
            server_language,
            status_flags,
            auth_plugin_name,
        })
    }

    /// Whether the server session starts in autocommit mode.
    pub fn autocommit(&self) -> bool {
        self.status_flags & status::AUTOCOMMIT != 0
    }
}

/// Client reply to [`Handshake`].
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: u32,
    pub user: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: &'a str,
}

impl HandshakeResponse<'_> {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.capabilities);
        buf.put_u32_le(MAX_PACKET_LEN as u32);
        buf.put_u8(charset::UTF8MB4_GENERAL_CI);
        buf.put_slice(&[0u8; 23]);

        put_cstr(&mut buf, self.user.as_bytes());

        buf.put_u8(self.auth_response.len() as u8);
        buf.put_slice(self.auth_response);

        if self.capabilities & capabilities::CONNECT_WITH_DB != 0 {
            put_cstr(&mut buf, self.database.unwrap_or("").as_bytes());
        }

        if self.capabilities & capabilities::PLUGIN_AUTH != 0 {
            put_cstr(&mut buf, self.auth_plugin_name.as_bytes());
        }

        buf
    }
}

/// Server request to restart authentication with another plugin.
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub salt: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::little_endian(payload);
        r.skip(1)?;
        let plugin_name = lossy(r.read_cstr_required()?);
        let mut salt = r.read_all().to_vec();
        if salt.last() == Some(&0) {
            salt.pop();
        }
        Ok(Self { plugin_name, salt })
    }
}

/// Extra authentication data (`0x01` + bytes), used by caching_sha2_password.
pub fn auth_more_data(payload: &[u8]) -> Option<&[u8]> {
    match payload.split_first() {
        Some((&AUTH_MORE_DATA_HEADER, rest)) => Some(rest),
        _ => None,
    }
}

// ============================================================================
// Response Packets
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub message: String,
}

impl OkPacket {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::little_endian(payload);
        r.skip(1)?;
        let affected_rows = r.read_lenenc_int()?.unwrap_or(0);
        let last_insert_id = r.read_lenenc_int()?.unwrap_or(0);
        let status_flags = if r.remaining() >= 2 { r.read_u16()? } else { 0 };
        let warnings = if r.remaining() >= 2 { r.read_u16()? } else { 0 };
        let message = lossy(r.read_all());
        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            message,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::little_endian(payload);
        r.skip(1)?;
        let warnings = if r.remaining() >= 2 { r.read_u16()? } else { 0 };
        let status_flags = if r.remaining() >= 2 { r.read_u16()? } else { 0 };
        Ok(Self {
            warnings,
            status_flags,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::little_endian(payload);
        r.skip(1)?;
        let error_code = r.read_u16()?;
        let sql_state = if r.peek() == Some(b'#') {
            r.skip(1)?;
            lossy(r.read(5)?)
        } else {
            String::new()
        };
        let error_message = lossy(r.read_all());
        Ok(Self {
            error_code,
            sql_state,
            error_message,
        })
    }

    pub fn into_server_error(self) -> MysqlServerError {
        MysqlServerError {
            code: self.error_code,
            sql_state: self.sql_state,
            message: self.error_message,
        }
    }
}

/// A terminal packet: OK, EOF or ERR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generic {
    Ok(OkPacket),
    Eof(EofPacket),
    Err(ErrPacket),
}

impl Generic {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if is_ok(payload) {
            return OkPacket::parse(payload).map(Generic::Ok);
        }
        if payload.first() == Some(&EOF_HEADER) {
            return if is_eof(payload) {
                EofPacket::parse(payload).map(Generic::Eof)
            } else {
                OkPacket::parse(payload).map(Generic::Ok)
            };
        }
        if is_error(payload) {
            return ErrPacket::parse(payload).map(Generic::Err);
        }
        Err(Error::protocol(format!(
            "unexpected packet header 0x{:02x}",
            payload.first().copied().unwrap_or(0)
        )))
    }
}

/// First packet of a COM_QUERY response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    Ok(OkPacket),
    Err(ErrPacket),
    /// A result set with this many columns follows.
    FieldCount(u64),
}

impl QueryResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if is_ok(payload) {
            return OkPacket::parse(payload).map(QueryResponse::Ok);
        }
        if is_error(payload) {
            return ErrPacket::parse(payload).map(QueryResponse::Err);
        }
        let count = WireReader::little_endian(payload)
            .read_lenenc_int()?
            .ok_or_else(|| Error::protocol("NULL field count"))?;
        Ok(QueryResponse::FieldCount(count))
    }
}

/// Column definition packet (protocol 41).
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub catalog: Vec<u8>,
    pub schema: Vec<u8>,
    pub table: Vec<u8>,
    pub org_table: Vec<u8>,
    pub name: String,
    pub org_name: Vec<u8>,
    pub character_set: u16,
    pub column_length: u32,
    pub field_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::little_endian(payload);
        let mut lenenc = || -> Result<Vec<u8>> {
            Ok(r.read_lenenc_bytes()?.unwrap_or_default().to_vec())
        };
        let catalog = lenenc()?;
        let schema = lenenc()?;
        let table = lenenc()?;
        let org_table = lenenc()?;
        let name = lossy(&lenenc()?);
        let org_name = lenenc()?;

        r.skip(1)?; // length of the fixed-length fields (0x0c)
        let character_set = r.read_u16()?;
        let column_length = r.read_u32()?;
        let field_type = FieldType(r.read_u8()?);
        let flags = r.read_u16()?;
        let decimals = r.read_u8()?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            character_set,
            column_length,
            field_type,
            flags,
            decimals,
        })
    }

    pub fn is_binary(&self) -> bool {
        self.character_set == charset::BINARY
    }
}

/// Encode a command: the command byte followed by its argument bytes.
pub fn encode_command(command: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(command);
    buf.extend_from_slice(body);
    buf
}
