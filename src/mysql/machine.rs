//! MySQL connection state machine.
//!
//! The machine performs no I/O. Inbound packets and caller commands arrive as
//! [`Event`]s; encoded packets to send accumulate in an outbox that the
//! transport drains after every call to [`MysqlMachine::handle`].
//!
//! ```text
//! Init --handshake--> Authenticating --OK--> [Autocommit] --> [Isolation] --> Ready
//!                                                                             |  ^
//!                     Ready --query/ping--> QueryResponse --OK/ERR------------+  |
//!                                               | field count                    |
//!                                               v                                |
//!                                      ColumnDefinitions --EOF--> Rows --EOF/ERR-+
//! ```

use bytes::BytesMut;
use tracing::{debug, trace};

use super::auth;
use super::connection::MysqlConfig;
use super::error::MysqlServerError;
use super::protocol::{
    self, capabilities, command, AuthSwitchRequest, ColumnDefinition, ErrPacket, Generic,
    Handshake, HandshakeResponse, OkPacket, QueryResponse, MAX_PACKET_LEN,
};
use super::types::{from_mysql, ColumnEncoding};
use crate::codec::WireReader;
use crate::convert::Converter;
use crate::cursor::ResultSet;
use crate::error::{Error, Result};
use crate::framer::Frame;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the server greeting.
    Init,
    Authenticating,
    /// Waiting for the reply to `SET AUTOCOMMIT`.
    Autocommit,
    /// Waiting for the reply to `SET SESSION TRANSACTION ISOLATION LEVEL`.
    Isolation,
    Ready,
    QueryResponse,
    ColumnDefinitions,
    Rows,
    Closed,
}

#[derive(Debug)]
pub enum Event {
    /// A complete packet; the frame tag is its sequence number.
    Packet(Frame),
    Query(String),
    Ping,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Packet,
    Query,
    Ping,
    Quit,
}

impl Event {
    fn kind(&self) -> EventKind {
        match self {
            Event::Packet(_) => EventKind::Packet,
            Event::Query(_) => EventKind::Query,
            Event::Ping => EventKind::Ping,
            Event::Quit => EventKind::Quit,
        }
    }
}

/// An action may return a state that overrides the table's next state.
type Action = fn(&mut Context, &Event) -> Result<Option<State>>;

fn to(action: Action, next: State) -> Option<(Action, State)> {
    Some((action, next))
}

/// The transition table. Pairs not listed are ignored.
fn transition(state: State, event: EventKind) -> Option<(Action, State)> {
    use EventKind as E;
    use State as S;

    match (state, event) {
        (S::Init, E::Packet) => to(act_handshake, S::Authenticating),
        (S::Authenticating, E::Packet) => to(act_auth_result, S::Authenticating),
        (S::Autocommit, E::Packet) => to(act_autocommit_result, S::Ready),
        (S::Isolation, E::Packet) => to(act_isolation_result, S::Ready),
        (S::Ready, E::Query) => to(act_query, S::QueryResponse),
        (S::Ready, E::Ping) => to(act_ping, S::QueryResponse),
        (S::QueryResponse, E::Packet) => to(act_query_response, S::Ready),
        (S::ColumnDefinitions, E::Packet) => to(act_column_definition, S::ColumnDefinitions),
        (S::Rows, E::Packet) => to(act_row, S::Rows),
        (S::Closed, _) => None,
        (_, E::Quit) => to(act_quit, S::Closed),
        _ => None,
    }
}

/// A column definition with its decoding resolved.
#[derive(Debug, Clone)]
pub struct Column {
    pub definition: ColumnDefinition,
    pub encoding: ColumnEncoding,
    pub converter: Option<Converter>,
}

impl Column {
    fn new(definition: ColumnDefinition) -> Self {
        let encoding = ColumnEncoding::for_column(definition.field_type, definition.is_binary());
        let converter = definition.field_type.converter();
        Self {
            definition,
            encoding,
            converter,
        }
    }
}

/// Everything the actions read and write.
#[derive(Debug)]
struct Context {
    user: String,
    password: String,
    database: Option<String>,
    autocommit: Option<bool>,
    isolation: Option<String>,

    sequence: u8,
    handshake: Option<Handshake>,
    outbox: Vec<BytesMut>,

    field_count: u64,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    ok: Option<OkPacket>,
    error: Option<MysqlServerError>,

    is_connected: bool,
    is_running: bool,
}

impl Context {
    fn check_sequence(&mut self, sequence: u8) -> Result<()> {
        if sequence != self.sequence {
            return Err(Error::protocol(format!(
                "packet sequence mismatch: expected {}, got {}",
                self.sequence, sequence
            )));
        }
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) {
        self.outbox.push(protocol::serialize(payload, self.sequence));
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// Start a new command: reset the sequence and split the payload into
    /// packets. A payload ending exactly on a packet boundary is followed by
    /// an empty packet.
    fn send_command(&mut self, command: u8, body: &[u8]) {
        self.sequence = 0;
        let payload = protocol::encode_command(command, body);
        for chunk in payload.chunks(MAX_PACKET_LEN) {
            self.send(chunk);
        }
        if payload.len() % MAX_PACKET_LEN == 0 {
            self.send(&[]);
        }
    }

    fn begin_command(&mut self) {
        self.field_count = 0;
        self.columns.clear();
        self.rows.clear();
        self.ok = None;
        self.error = None;
        self.is_running = true;
    }

    fn finish_command(&mut self) {
        self.is_running = false;
    }

    /// Session setup after authentication, skipping any step that matches
    /// the server's defaults.
    fn start_session(&mut self) -> State {
        let server_autocommit = self.handshake.as_ref().map(Handshake::autocommit);
        if let Some(autocommit) = self.autocommit {
            if Some(autocommit) != server_autocommit {
                let sql = format!("SET AUTOCOMMIT = {}", u8::from(autocommit));
                debug!(%sql, "configuring session");
                self.send_command(command::QUERY, sql.as_bytes());
                return State::Autocommit;
            }
        }
        self.set_isolation()
    }

    fn set_isolation(&mut self) -> State {
        if let Some(level) = self.isolation.clone() {
            let sql = format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level);
            debug!(%sql, "configuring session");
            self.send_command(command::QUERY, sql.as_bytes());
            return State::Isolation;
        }
        self.is_connected = true;
        debug!("connection ready");
        State::Ready
    }
}

fn payload(event: &Event) -> Result<&[u8]> {
    match event {
        Event::Packet(frame) => Ok(&frame.payload),
        _ => Err(Error::protocol("expected a packet")),
    }
}

// ============================================================================
// Actions
// ============================================================================

fn act_handshake(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    let handshake = Handshake::parse(payload(event)?)?;
    debug!(
        server_version = %handshake.server_version,
        connection_id = handshake.connection_id,
        auth_plugin = ?handshake.auth_plugin_name,
        "received handshake"
    );

    if handshake.capabilities & capabilities::PROTOCOL_41 == 0 {
        return Err(Error::protocol("server does not support protocol 4.1"));
    }

    let mut caps = capabilities::CLIENT & handshake.capabilities;
    if ctx.database.is_some() && handshake.capabilities & capabilities::CONNECT_WITH_DB != 0 {
        caps |= capabilities::CONNECT_WITH_DB;
    }

    let plugin = auth::response_plugin(handshake.auth_plugin_name.as_deref());
    let auth_response = auth::scramble(plugin, ctx.password.as_bytes(), &handshake.salt);

    let response = HandshakeResponse {
        capabilities: caps,
        user: &ctx.user,
        auth_response: &auth_response,
        database: ctx.database.as_deref(),
        auth_plugin_name: plugin,
    }
    .encode();

    ctx.send(&response);
    ctx.handshake = Some(handshake);
    Ok(None)
}

fn act_auth_result(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    let payload = payload(event)?;

    if protocol::is_ok(payload) {
        ctx.ok = Some(OkPacket::parse(payload)?);
        debug!("authenticated");
        return Ok(Some(ctx.start_session()));
    }

    if protocol::is_error(payload) {
        let err = ErrPacket::parse(payload)?.into_server_error();
        return Err(Error::Auth(err.to_string()));
    }

    if payload.first() == Some(&0xFE) {
        let switch = AuthSwitchRequest::parse(payload)?;
        debug!(plugin = %switch.plugin_name, "auth switch requested");
        let response = match switch.plugin_name.as_str() {
            auth::MYSQL_NATIVE_PASSWORD | auth::CACHING_SHA2_PASSWORD => {
                auth::scramble(&switch.plugin_name, ctx.password.as_bytes(), &switch.salt)
            }
            other => {
                return Err(Error::Auth(format!(
                    "unsupported authentication plugin '{}'",
                    other
                )))
            }
        };
        ctx.send(&response);
        return Ok(None);
    }

    match protocol::auth_more_data(payload) {
        Some([auth::FAST_AUTH_SUCCESS]) => {
            trace!("fast auth accepted");
            Ok(None)
        }
        Some([auth::PERFORM_FULL_AUTHENTICATION]) => Err(Error::Auth(
            "caching_sha2_password full authentication is not supported".to_string(),
        )),
        _ => Err(Error::protocol(format!(
            "unexpected packet during authentication: 0x{:02x}",
            payload.first().copied().unwrap_or(0)
        ))),
    }
}

fn act_autocommit_result(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    match Generic::parse(payload(event)?)? {
        Generic::Ok(_) => Ok(Some(ctx.set_isolation())),
        Generic::Err(err) => Err(err.into_server_error().into()),
        Generic::Eof(_) => Err(Error::protocol("unexpected EOF packet")),
    }
}

fn act_isolation_result(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    match Generic::parse(payload(event)?)? {
        Generic::Ok(_) => {
            ctx.is_connected = true;
            debug!("connection ready");
            Ok(None)
        }
        Generic::Err(err) => Err(err.into_server_error().into()),
        Generic::Eof(_) => Err(Error::protocol("unexpected EOF packet")),
    }
}

fn act_query(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    let Event::Query(sql) = event else {
        return Err(Error::protocol("expected a query"));
    };
    ctx.begin_command();
    ctx.send_command(command::QUERY, sql.as_bytes());
    Ok(None)
}

fn act_ping(ctx: &mut Context, _event: &Event) -> Result<Option<State>> {
    ctx.begin_command();
    ctx.send_command(command::PING, &[]);
    Ok(None)
}

fn act_query_response(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    match QueryResponse::parse(payload(event)?)? {
        QueryResponse::Ok(ok) => {
            ctx.ok = Some(ok);
            ctx.finish_command();
            Ok(None)
        }
        QueryResponse::Err(err) => {
            ctx.error = Some(err.into_server_error());
            ctx.finish_command();
            Ok(None)
        }
        QueryResponse::FieldCount(count) => {
            ctx.field_count = count;
            Ok(Some(State::ColumnDefinitions))
        }
    }
}

fn act_column_definition(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    let payload = payload(event)?;

    if ctx.columns.len() as u64 == ctx.field_count {
        if protocol::is_eof(payload) {
            return Ok(Some(State::Rows));
        }
        return Err(Error::protocol("expected EOF after column definitions"));
    }

    let column = Column::new(ColumnDefinition::parse(payload)?);
    trace!(name = %column.definition.name, field_type = column.definition.field_type.0, "column");
    ctx.columns.push(column);
    Ok(None)
}

fn act_row(ctx: &mut Context, event: &Event) -> Result<Option<State>> {
    let payload = payload(event)?;

    if protocol::is_eof(payload) {
        ctx.finish_command();
        return Ok(Some(State::Ready));
    }
    if protocol::is_error(payload) {
        ctx.error = Some(ErrPacket::parse(payload)?.into_server_error());
        ctx.finish_command();
        return Ok(Some(State::Ready));
    }

    let mut r = WireReader::little_endian(payload);
    let row = ctx
        .columns
        .iter()
        .map(|column| from_mysql(r.read_lenenc_bytes()?, column.encoding, column.converter))
        .collect::<Result<Vec<_>>>()?;
    ctx.rows.push(row);
    Ok(None)
}

fn act_quit(ctx: &mut Context, _event: &Event) -> Result<Option<State>> {
    ctx.send_command(command::QUIT, &[]);
    ctx.is_connected = false;
    ctx.is_running = false;
    Ok(None)
}

// ============================================================================
// Machine
// ============================================================================

/// Protocol state for one MySQL connection.
#[derive(Debug)]
pub struct MysqlMachine {
    state: State,
    ctx: Context,
}

impl MysqlMachine {
    pub fn new(config: &MysqlConfig) -> Self {
        Self {
            state: State::Init,
            ctx: Context {
                user: config.user.clone(),
                password: config.password.clone().unwrap_or_default(),
                database: config.database.clone(),
                autocommit: config.effective_autocommit(),
                isolation: config.isolation.clone(),
                sequence: 0,
                handshake: None,
                outbox: Vec::new(),
                field_count: 0,
                columns: Vec::new(),
                rows: Vec::new(),
                ok: None,
                error: None,
                is_connected: false,
                is_running: false,
            },
        }
    }

    /// Dispatch one event. Undefined (state, event) pairs are logged and
    /// ignored. An error leaves the machine closed.
    pub fn handle(&mut self, event: Event) -> Result<()> {
        let kind = event.kind();
        let Some((action, next)) = transition(self.state, kind) else {
            debug!(state = ?self.state, event = ?kind, "ignoring undefined event");
            return Ok(());
        };

        let result = match &event {
            Event::Packet(frame) => self.ctx.check_sequence(frame.tag),
            _ => Ok(()),
        }
        .and_then(|()| action(&mut self.ctx, &event));

        match result {
            Ok(over) => {
                let next = over.unwrap_or(next);
                if next != self.state {
                    trace!(from = ?self.state, to = ?next, "state transition");
                }
                self.state = next;
                Ok(())
            }
            Err(e) => {
                debug!(state = ?self.state, error = %e, "connection failed");
                self.state = State::Closed;
                self.ctx.is_connected = false;
                self.ctx.is_running = false;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.ctx.handshake.as_ref()
    }

    /// Latest OK packet.
    pub fn ok_packet(&self) -> Option<&OkPacket> {
        self.ctx.ok.as_ref()
    }

    /// Encoded packets waiting to be written.
    pub fn drain_outgoing(&mut self) -> std::vec::Drain<'_, BytesMut> {
        self.ctx.outbox.drain(..)
    }

    /// Result of the command that just finished, or the server's error.
    pub fn take_result(&mut self) -> Result<ResultSet> {
        if let Some(err) = self.ctx.error.take() {
            return Err(err.into());
        }
        Ok(ResultSet {
            columns: self
                .ctx
                .columns
                .iter()
                .map(|c| c.definition.name.clone())
                .collect(),
            rows: std::mem::take(&mut self.ctx.rows),
            affected_rows: self.ctx.ok.as_ref().map_or(0, |ok| ok.affected_rows),
        })
    }
}
