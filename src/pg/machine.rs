//! PostgreSQL connection state machine.
//!
//! Like the MySQL machine this performs no I/O: backend messages and caller
//! commands arrive as [`Event`]s, encoded frontend messages collect in an
//! outbox.
//!
//! ```text
//! Init --startup--> Authenticating --ReadyForQuery--> Ready
//!                                                     |  ^
//!                 Ready --query--> QueryRunning ------+  |
//!                                  RowDescription        |
//!                                  DataRow*              |
//!                                  CommandComplete ------+ (ReadyForQuery)
//! ```
//!
//! `is_running` clears at CommandComplete, EmptyQueryResponse or
//! ErrorResponse. The state returns to `Ready` on the trailing
//! ReadyForQuery.

use std::collections::HashMap;

use bytes::BytesMut;
use tracing::{debug, info, trace, warn};

use super::connection::PgConfig;
use super::error::PgServerError;
use super::protocol::{
    md5_password, rows_affected, BackendMessage, FieldDescription, FrontendMessage,
    PasswordMessage, QueryMessage, StartupMessage, TerminateMessage, TransactionStatus,
};
use super::types::from_postgres;
use crate::convert::Converter;
use crate::cursor::ResultSet;
use crate::error::{Error, Result};
use crate::framer::Frame;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connected, startup message not yet sent.
    Init,
    Authenticating,
    Ready,
    QueryRunning,
    Closed,
}

#[derive(Debug)]
pub enum Event {
    Message(BackendMessage),
    Startup,
    Query(String),
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Auth,
    ParameterStatus,
    BackendKeyData,
    ReadyForQuery,
    RowDescription,
    DataRow,
    CommandComplete,
    EmptyQuery,
    Error,
    Notice,
    Notification,
    Startup,
    Query,
    Terminate,
}

impl Event {
    fn kind(&self) -> EventKind {
        match self {
            Event::Message(msg) => match msg {
                BackendMessage::AuthenticationOk
                | BackendMessage::AuthenticationCleartextPassword
                | BackendMessage::AuthenticationMD5Password { .. }
                | BackendMessage::AuthenticationSASL { .. } => EventKind::Auth,
                BackendMessage::ParameterStatus { .. } => EventKind::ParameterStatus,
                BackendMessage::BackendKeyData { .. } => EventKind::BackendKeyData,
                BackendMessage::ReadyForQuery { .. } => EventKind::ReadyForQuery,
                BackendMessage::RowDescription { .. } => EventKind::RowDescription,
                BackendMessage::DataRow { .. } => EventKind::DataRow,
                BackendMessage::CommandComplete { .. } => EventKind::CommandComplete,
                BackendMessage::EmptyQueryResponse => EventKind::EmptyQuery,
                BackendMessage::ErrorResponse { .. } => EventKind::Error,
                BackendMessage::NoticeResponse { .. } => EventKind::Notice,
                BackendMessage::NotificationResponse { .. } => EventKind::Notification,
            },
            Event::Startup => EventKind::Startup,
            Event::Query(_) => EventKind::Query,
            Event::Terminate => EventKind::Terminate,
        }
    }
}

type Action = fn(&mut Context, &Event) -> Result<()>;

fn to(action: Action, next: State) -> Option<(Action, State)> {
    Some((action, next))
}

/// The transition table. Pairs not listed are ignored.
fn transition(state: State, event: EventKind) -> Option<(Action, State)> {
    use EventKind as E;
    use State as S;

    match (state, event) {
        (S::Closed, _) => None,
        (S::Init, E::Startup) => to(act_startup, S::Authenticating),
        (S::Authenticating, E::Auth) => to(act_auth, S::Authenticating),
        (S::Authenticating, E::BackendKeyData) => to(act_backend_key_data, S::Authenticating),
        (S::Authenticating, E::Error) => to(act_startup_error, S::Closed),
        (S::Authenticating, E::ReadyForQuery) => to(act_connected, S::Ready),
        (S::Ready, E::Query) => to(act_query, S::QueryRunning),
        (S::Ready, E::ReadyForQuery) => to(act_ready, S::Ready),
        (S::Ready, E::Error) => to(act_fatal, S::Closed),
        (S::QueryRunning, E::RowDescription) => to(act_description, S::QueryRunning),
        (S::QueryRunning, E::DataRow) => to(act_row, S::QueryRunning),
        (S::QueryRunning, E::CommandComplete) => to(act_complete, S::QueryRunning),
        (S::QueryRunning, E::EmptyQuery) => to(act_empty, S::QueryRunning),
        (S::QueryRunning, E::Error) => to(act_error, S::QueryRunning),
        (S::QueryRunning, E::ReadyForQuery) => to(act_ready, S::Ready),
        (s, E::ParameterStatus) if s != S::Init => to(act_parameter, s),
        (s, E::Notice) if s != S::Init => to(act_notice, s),
        (s, E::Notification) if s != S::Init => to(act_notification, s),
        (s, E::Terminate) if s != S::Init => to(act_terminate, S::Closed),
        _ => None,
    }
}

/// A column description with its converter resolved.
#[derive(Debug, Clone)]
pub struct Column {
    pub description: FieldDescription,
    pub converter: Option<Converter>,
}

#[derive(Debug)]
struct Context {
    user: String,
    password: Option<String>,
    database: Option<String>,
    options: Vec<(String, String)>,

    parameters: HashMap<String, String>,
    backend_pid: Option<i32>,
    secret_key: Option<i32>,
    transaction_status: TransactionStatus,
    outbox: Vec<BytesMut>,

    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
    tag: Option<String>,
    error: Option<PgServerError>,

    is_connected: bool,
    is_running: bool,
}

impl Context {
    fn send(&mut self, message: impl FrontendMessage) {
        self.outbox.push(message.encode());
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Auth("server requested a password but none is configured".into()))
    }
}

fn message(event: &Event) -> Result<&BackendMessage> {
    match event {
        Event::Message(msg) => Ok(msg),
        _ => Err(Error::protocol("expected a backend message")),
    }
}

// ============================================================================
// Actions
// ============================================================================

fn act_startup(ctx: &mut Context, _event: &Event) -> Result<()> {
    let startup = StartupMessage {
        user: ctx.user.clone(),
        database: ctx.database.clone(),
        options: ctx.options.clone(),
    };
    ctx.send(startup);
    Ok(())
}

fn act_auth(ctx: &mut Context, event: &Event) -> Result<()> {
    match message(event)? {
        BackendMessage::AuthenticationOk => {
            debug!("authenticated");
            Ok(())
        }
        BackendMessage::AuthenticationCleartextPassword => {
            let password = ctx.password()?.to_string();
            ctx.send(PasswordMessage { password });
            Ok(())
        }
        BackendMessage::AuthenticationMD5Password { salt } => {
            let password = md5_password(&ctx.user, ctx.password()?, salt);
            ctx.send(PasswordMessage { password });
            Ok(())
        }
        BackendMessage::AuthenticationSASL { mechanisms } => Err(Error::Auth(format!(
            "SASL authentication is not supported (server offered {})",
            mechanisms.join(", ")
        ))),
        _ => Err(Error::protocol("expected an authentication request")),
    }
}

fn act_parameter(ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::ParameterStatus { name, value } = message(event)? {
        trace!(%name, %value, "server parameter");
        ctx.parameters.insert(name.clone(), value.clone());
    }
    Ok(())
}

fn act_backend_key_data(ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::BackendKeyData {
        process_id,
        secret_key,
    } = message(event)?
    {
        ctx.backend_pid = Some(*process_id);
        ctx.secret_key = Some(*secret_key);
    }
    Ok(())
}

fn act_connected(ctx: &mut Context, event: &Event) -> Result<()> {
    act_ready(ctx, event)?;
    ctx.is_connected = true;
    debug!(backend_pid = ?ctx.backend_pid, "connection ready");
    Ok(())
}

fn act_ready(ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::ReadyForQuery { status } = message(event)? {
        ctx.transaction_status = *status;
    }
    ctx.is_running = false;
    Ok(())
}

fn act_startup_error(_ctx: &mut Context, event: &Event) -> Result<()> {
    let BackendMessage::ErrorResponse { fields } = message(event)? else {
        return Err(Error::protocol("expected an error response"));
    };
    let err = PgServerError::from_fields(fields);
    // Class 28: invalid authorization specification.
    if err.code.starts_with("28") {
        return Err(Error::Auth(err.to_string()));
    }
    Err(err.into())
}

/// An error outside a query means the backend is going away.
fn act_fatal(_ctx: &mut Context, event: &Event) -> Result<()> {
    let BackendMessage::ErrorResponse { fields } = message(event)? else {
        return Err(Error::protocol("expected an error response"));
    };
    Err(PgServerError::from_fields(fields).into())
}

fn act_query(ctx: &mut Context, event: &Event) -> Result<()> {
    let Event::Query(query) = event else {
        return Err(Error::protocol("expected a query"));
    };
    ctx.columns.clear();
    ctx.rows.clear();
    ctx.tag = None;
    ctx.error = None;
    ctx.is_running = true;
    ctx.send(QueryMessage {
        query: query.clone(),
    });
    Ok(())
}

/// A new row description starts a new result set; earlier ones in the same
/// query string are dropped.
fn act_description(ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::RowDescription { fields } = message(event)? {
        ctx.rows.clear();
        ctx.columns = fields
            .iter()
            .map(|f| {
                trace!(name = %f.name, type_oid = f.type_oid.as_i32(), "column");
                Column {
                    description: f.clone(),
                    converter: f.type_oid.converter(),
                }
            })
            .collect();
    }
    Ok(())
}

fn act_row(ctx: &mut Context, event: &Event) -> Result<()> {
    let BackendMessage::DataRow { values } = message(event)? else {
        return Err(Error::protocol("expected a data row"));
    };
    if values.len() != ctx.columns.len() {
        return Err(Error::protocol(format!(
            "data row has {} columns, row description has {}",
            values.len(),
            ctx.columns.len()
        )));
    }
    let row = ctx
        .columns
        .iter()
        .zip(values)
        .map(|(column, raw)| from_postgres(raw.as_deref(), column.converter))
        .collect::<Result<Vec<_>>>()?;
    ctx.rows.push(row);
    Ok(())
}

fn act_complete(ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::CommandComplete { tag } = message(event)? {
        trace!(%tag, "command complete");
        ctx.tag = Some(tag.clone());
    }
    ctx.is_running = false;
    Ok(())
}

fn act_empty(ctx: &mut Context, _event: &Event) -> Result<()> {
    ctx.is_running = false;
    Ok(())
}

fn act_error(ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::ErrorResponse { fields } = message(event)? {
        let err = PgServerError::from_fields(fields);
        debug!(code = %err.code, message = %err.message, "query failed");
        ctx.error = Some(err);
    }
    ctx.is_running = false;
    Ok(())
}

fn act_notice(_ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::NoticeResponse { fields } = message(event)? {
        let notice = PgServerError::from_fields(fields);
        if notice.severity == "WARNING" {
            warn!(code = %notice.code, "{}", notice.message);
        } else {
            info!(code = %notice.code, "{}", notice.message);
        }
    }
    Ok(())
}

fn act_notification(_ctx: &mut Context, event: &Event) -> Result<()> {
    if let BackendMessage::NotificationResponse {
        process_id,
        channel,
        payload,
    } = message(event)?
    {
        debug!(process_id, %channel, %payload, "notification");
    }
    Ok(())
}

fn act_terminate(ctx: &mut Context, _event: &Event) -> Result<()> {
    ctx.send(TerminateMessage);
    ctx.is_connected = false;
    ctx.is_running = false;
    Ok(())
}

// ============================================================================
// Machine
// ============================================================================

/// Protocol state for one PostgreSQL connection.
#[derive(Debug)]
pub struct PgMachine {
    state: State,
    ctx: Context,
}

impl PgMachine {
    pub fn new(config: &PgConfig) -> Self {
        Self {
            state: State::Init,
            ctx: Context {
                user: config.user.clone(),
                password: config.password.clone(),
                database: config.database.clone(),
                options: config.startup_options(),
                parameters: HashMap::new(),
                backend_pid: None,
                secret_key: None,
                transaction_status: TransactionStatus::Idle,
                outbox: Vec::new(),
                columns: Vec::new(),
                rows: Vec::new(),
                tag: None,
                error: None,
                is_connected: false,
                is_running: false,
            },
        }
    }

    /// Decode a frame and dispatch it. A malformed message closes the
    /// machine like any other failure.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match BackendMessage::decode(frame.tag, frame.payload) {
            Ok(msg) => self.handle(Event::Message(msg)),
            Err(e) => Err(self.fail(e)),
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

        match action(&mut self.ctx, &event) {
            Ok(()) => {
                if next != self.state {
                    trace!(from = ?self.state, to = ?next, "state transition");
                }
                self.state = next;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, e: Error) -> Error {
        debug!(state = ?self.state, error = %e, "connection failed");
        self.state = State::Closed;
        self.ctx.is_connected = false;
        self.ctx.is_running = false;
        e
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

    /// True once the backend has sent ReadyForQuery for the last query.
    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.ctx.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.ctx.parameters
    }

    pub fn backend_pid(&self) -> Option<i32> {
        self.ctx.backend_pid
    }

    pub fn secret_key(&self) -> Option<i32> {
        self.ctx.secret_key
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.ctx.transaction_status
    }

    /// CommandComplete tag of the latest query, e.g. `INSERT 0 1`.
    pub fn command_tag(&self) -> Option<&str> {
        self.ctx.tag.as_deref()
    }

    /// Encoded messages waiting to be written.
    pub fn drain_outgoing(&mut self) -> std::vec::Drain<'_, BytesMut> {
        self.ctx.outbox.drain(..)
    }

    /// Result of the query that just finished, or the server's error.
    pub fn take_result(&mut self) -> Result<ResultSet> {
        if let Some(err) = self.ctx.error.take() {
            return Err(err.into());
        }
        Ok(ResultSet {
            columns: self
                .ctx
                .columns
                .iter()
                .map(|c| c.description.name.clone())
                .collect(),
            rows: std::mem::take(&mut self.ctx.rows),
            affected_rows: self.ctx.tag.as_deref().map_or(0, rows_affected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::protocol::Format;
    use crate::pg::types::Oid;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn config() -> PgConfig {
        PgConfig::new("localhost", "app").password("secret").database("shop")
    }

    fn msg(m: BackendMessage) -> Event {
        Event::Message(m)
    }

    fn ready() -> Event {
        msg(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        })
    }

    fn field(name: &str, oid: Oid) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid: oid,
            type_size: -1,
            type_modifier: -1,
            format: Format::Text,
        }
    }

    fn error_fields(code: &str, message: &str) -> HashMap<u8, String> {
        HashMap::from([
            (b'S', "ERROR".to_string()),
            (b'C', code.to_string()),
            (b'M', message.to_string()),
        ])
    }

    fn sent(machine: &mut PgMachine) -> Vec<BytesMut> {
        machine.drain_outgoing().collect()
    }

    fn connected() -> PgMachine {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        machine.handle(msg(BackendMessage::AuthenticationOk)).unwrap();
        machine.handle(ready()).unwrap();
        sent(&mut machine);
        machine
    }

    #[test]
    fn test_startup_sends_user_and_database() {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        assert_eq!(machine.state(), State::Authenticating);

        let out = sent(&mut machine);
        assert_eq!(out.len(), 1);
        let body = &out[0][8..];
        let text = String::from_utf8_lossy(body);
        assert!(text.contains("user\0app\0"));
        assert!(text.contains("database\0shop\0"));
        assert!(text.contains("client_encoding\0UTF8\0"));
    }

    #[test]
    fn test_md5_authentication() {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        sent(&mut machine);

        let salt = [1, 2, 3, 4];
        machine
            .handle(msg(BackendMessage::AuthenticationMD5Password { salt }))
            .unwrap();
        let out = sent(&mut machine);
        assert_eq!(out[0][0], b'p');
        let expected = md5_password("app", "secret", &salt);
        assert_eq!(&out[0][5..out[0].len() - 1], expected.as_bytes());
    }

    #[test]
    fn test_cleartext_without_password_fails() {
        let mut machine = PgMachine::new(&PgConfig::new("localhost", "app"));
        machine.handle(Event::Startup).unwrap();
        let err = machine
            .handle(msg(BackendMessage::AuthenticationCleartextPassword))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(machine.state(), State::Closed);
    }

    #[test]
    fn test_sasl_is_rejected() {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        let err = machine
            .handle(msg(BackendMessage::AuthenticationSASL {
                mechanisms: vec!["SCRAM-SHA-256".into()],
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_startup_collects_parameters() {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        machine.handle(msg(BackendMessage::AuthenticationOk)).unwrap();
        machine
            .handle(msg(BackendMessage::ParameterStatus {
                name: "server_version".into(),
                value: "16.2".into(),
            }))
            .unwrap();
        machine
            .handle(msg(BackendMessage::BackendKeyData {
                process_id: 42,
                secret_key: 7,
            }))
            .unwrap();
        assert!(!machine.is_connected());
        machine.handle(ready()).unwrap();

        assert!(machine.is_connected());
        assert_eq!(machine.parameter("server_version"), Some("16.2"));
        assert_eq!(machine.backend_pid(), Some(42));
        assert_eq!(machine.secret_key(), Some(7));
    }

    #[test]
    fn test_startup_error_class_28_is_auth() {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        let err = machine
            .handle(msg(BackendMessage::ErrorResponse {
                fields: error_fields("28P01", "password authentication failed"),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));

        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Startup).unwrap();
        let err = machine
            .handle(msg(BackendMessage::ErrorResponse {
                fields: error_fields("3D000", "database \"shop\" does not exist"),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Postgres(_)));
    }

    #[test]
    fn test_query_with_rows() {
        let mut machine = connected();
        machine.handle(Event::Query("SELECT id, ok".into())).unwrap();
        assert!(machine.is_running());
        let out = sent(&mut machine);
        assert_eq!(&out[0][..], b"Q\x00\x00\x00\x12SELECT id, ok\x00");

        machine
            .handle(msg(BackendMessage::RowDescription {
                fields: vec![field("id", Oid::INT4), field("ok", Oid::BOOL)],
            }))
            .unwrap();
        machine
            .handle(msg(BackendMessage::DataRow {
                values: vec![Some(Bytes::from_static(b"1")), Some(Bytes::from_static(b"t"))],
            }))
            .unwrap();
        machine
            .handle(msg(BackendMessage::DataRow {
                values: vec![Some(Bytes::from_static(b"2")), None],
            }))
            .unwrap();
        machine
            .handle(msg(BackendMessage::CommandComplete {
                tag: "SELECT 2".into(),
            }))
            .unwrap();
        assert!(!machine.is_running());
        assert!(!machine.is_ready());

        machine.handle(ready()).unwrap();
        assert!(machine.is_ready());

        let result = machine.take_result().unwrap();
        assert_eq!(result.columns, vec!["id", "ok"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Int(1), Value::Bool(true)],
                vec![Value::Int(2), Value::Null],
            ]
        );
        assert_eq!(result.affected_rows, 2);
    }

    #[test]
    fn test_query_error_is_stored() {
        let mut machine = connected();
        machine.handle(Event::Query("SELECT * FROM nope".into())).unwrap();
        machine
            .handle(msg(BackendMessage::ErrorResponse {
                fields: error_fields("42P01", "relation \"nope\" does not exist"),
            }))
            .unwrap();
        assert!(!machine.is_running());
        machine.handle(ready()).unwrap();
        assert!(machine.is_connected());

        let err = machine.take_result().unwrap_err();
        assert!(err.is_server_error());
        assert!(err.to_string().contains("42P01"));
    }

    #[test]
    fn test_empty_query() {
        let mut machine = connected();
        machine.handle(Event::Query(String::new())).unwrap();
        machine.handle(msg(BackendMessage::EmptyQueryResponse)).unwrap();
        assert!(!machine.is_running());
        machine.handle(ready()).unwrap();
        assert!(machine.take_result().unwrap().is_empty());
    }

    #[test]
    fn test_row_width_mismatch_is_fatal() {
        let mut machine = connected();
        machine.handle(Event::Query("SELECT 1".into())).unwrap();
        machine
            .handle(msg(BackendMessage::RowDescription {
                fields: vec![field("a", Oid::INT4)],
            }))
            .unwrap();
        let err = machine
            .handle(msg(BackendMessage::DataRow { values: vec![] }))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(machine.state(), State::Closed);
        assert!(!machine.is_connected());
    }

    #[test]
    fn test_query_before_ready_is_ignored() {
        let mut machine = PgMachine::new(&config());
        machine.handle(Event::Query("SELECT 1".into())).unwrap();
        assert_eq!(machine.state(), State::Init);
        assert!(sent(&mut machine).is_empty());
    }

    #[test]
    fn test_unknown_tag_closes_machine() {
        let mut machine = connected();
        let err = machine
            .handle_frame(Frame {
                tag: b'?',
                payload: Bytes::new(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(machine.state(), State::Closed);
    }

    #[test]
    fn test_terminate() {
        let mut machine = connected();
        machine.handle(Event::Terminate).unwrap();
        assert_eq!(machine.state(), State::Closed);
        assert!(!machine.is_connected());
        let out = sent(&mut machine);
        assert_eq!(&out[0][..], b"X\x00\x00\x00\x04");
    }
}
