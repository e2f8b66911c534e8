//! The query-facing side of a connection.
//!
//! Both backends implement [`Connection`]; [`Cursor`] layers argument
//! substitution, transaction nesting and row access on top of it.

use std::future::Future;
use std::ops::Index;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::value::Value;

/// A live database connection as seen by [`Cursor`] and the pool.
#[async_trait]
pub trait Connection: Send {
    /// Run one SQL statement and collect its result.
    async fn execute(&mut self, query: &str) -> Result<ResultSet>;

    /// Run an INSERT and capture the new row's key in [`Connection::last_id`].
    async fn execute_insert(&mut self, query: &str, primary_key: &str) -> Result<ResultSet> {
        let _ = primary_key;
        self.execute(query).await
    }

    /// Health check. Never fails; any error reads as `false`.
    async fn ping(&mut self) -> bool;

    async fn close(&mut self) -> Result<()>;

    /// Render a value as an SQL literal for this backend.
    fn serialize(&self, value: &Value) -> Result<String>;

    /// Key generated by the latest insert.
    fn last_id(&self) -> Option<Value>;

    /// Informational text from the latest command.
    fn message(&self) -> Option<String>;

    /// Whether the cursor should emit BEGIN/COMMIT/ROLLBACK.
    fn transactions(&self) -> bool;
}

// ============================================================================
// Results
// ============================================================================

/// Column names and decoded rows of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a DML statement, where the backend reports it.
    pub affected_rows: u64,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(self) -> Vec<Record> {
        let columns: Arc<[String]> = self.columns.into();
        self.rows
            .into_iter()
            .map(|values| Record {
                columns: Arc::clone(&columns),
                values,
            })
            .collect()
    }
}

/// One row with lookup by column name or position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(&self.values)
    }
}

impl Index<usize> for Record {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// # Panics
///
/// Panics if there is no column named `name`; use [`Record::get`] to look
/// up a column that may be missing.
impl Index<&str> for Record {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(value) => value,
            None => panic!("no column named '{}'", name),
        }
    }
}

// ============================================================================
// Argument Substitution
// ============================================================================

/// Replace each `%s` in `query` with the next rendered argument; `%%` is a
/// literal percent sign.
pub fn substitute(query: &str, args: &[String]) -> Result<String> {
    let mut out = String::with_capacity(query.len() + args.iter().map(String::len).sum::<usize>());
    let mut args = args.iter();
    let mut chars = query.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => match args.next() {
                Some(arg) => out.push_str(arg),
                None => return Err(Error::type_error("not enough arguments for format string")),
            },
            Some('%') => out.push('%'),
            Some(other) => {
                return Err(Error::type_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
            None => return Err(Error::type_error("incomplete format")),
        }
    }

    if args.next().is_some() {
        return Err(Error::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

// ============================================================================
// Cursor
// ============================================================================

/// Future returned by the closure passed to [`Cursor::transaction`].
pub type TransactionFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

pub struct Cursor<C> {
    conn: C,
    query: Option<String>,
    query_after: Option<String>,
    last_id: Option<Value>,
    message: Option<String>,
    transaction_depth: usize,
}

impl<C: Connection> Cursor<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            query: None,
            query_after: None,
            last_id: None,
            message: None,
            transaction_depth: 0,
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Latest query as given, before substitution.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Latest query as sent.
    pub fn query_after(&self) -> Option<&str> {
        self.query_after.as_deref()
    }

    pub fn last_id(&self) -> Option<&Value> {
        self.last_id.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    /// Substitute `args` into `query`. Every argument is rendered before
    /// anything is sent, so a conversion error never leaves a partial
    /// command on the wire. With no arguments the query is used verbatim.
    pub fn format(&self, query: &str, args: &[Value]) -> Result<String> {
        if args.is_empty() {
            return Ok(query.to_string());
        }
        let rendered = args
            .iter()
            .map(|arg| self.conn.serialize(arg))
            .collect::<Result<Vec<_>>>()?;
        substitute(query, &rendered)
    }

    fn prepare(&mut self, query: &str, args: &[Value]) -> Result<String> {
        self.query = Some(query.to_string());
        self.query_after = None;
        let sql = self.format(query, args)?;
        self.query_after = Some(sql.clone());
        trace!(query = %sql, "execute");
        Ok(sql)
    }

    fn record_metadata(&mut self) {
        self.last_id = self.conn.last_id();
        self.message = self.conn.message();
    }

    pub async fn execute(&mut self, query: &str, args: &[Value]) -> Result<ResultSet> {
        let sql = self.prepare(query, args)?;
        let result = self.conn.execute(&sql).await?;
        self.record_metadata();
        Ok(result)
    }

    /// Run an INSERT and return the generated key.
    pub async fn insert(
        &mut self,
        query: &str,
        args: &[Value],
        primary_key: &str,
    ) -> Result<Option<Value>> {
        let sql = self.prepare(query, args)?;
        self.conn.execute_insert(&sql, primary_key).await?;
        self.record_metadata();
        Ok(self.last_id.clone())
    }

    /// All rows as records, or `None` when the query returned none.
    pub async fn select(&mut self, query: &str, args: &[Value]) -> Result<Option<Vec<Record>>> {
        let result = self.execute(query, args).await?;
        if result.is_empty() {
            return Ok(None);
        }
        Ok(Some(result.records()))
    }

    /// First row only.
    pub async fn select_one(&mut self, query: &str, args: &[Value]) -> Result<Option<Record>> {
        Ok(self
            .select(query, args)
            .await?
            .and_then(|records| records.into_iter().next()))
    }

    /// Open a transaction. Nested calls only deepen the counter.
    pub async fn start_transaction(&mut self) -> Result<()> {
        self.transaction_depth += 1;
        if self.transaction_depth == 1 && self.conn.transactions() {
            if let Err(e) = self.execute("BEGIN", &[]).await {
                self.transaction_depth -= 1;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close one nesting level; COMMIT is sent when the outermost closes.
    pub async fn commit(&mut self) -> Result<()> {
        if self.transaction_depth == 0 {
            return Ok(());
        }
        self.transaction_depth -= 1;
        if self.transaction_depth == 0 && self.conn.transactions() {
            self.execute("COMMIT", &[]).await?;
        }
        Ok(())
    }

    /// Abandon every nesting level at once.
    pub async fn rollback(&mut self) -> Result<()> {
        if self.transaction_depth == 0 {
            return Ok(());
        }
        self.transaction_depth = 0;
        if self.conn.transactions() {
            self.execute("ROLLBACK", &[]).await?;
        }
        Ok(())
    }

    /// Run `f` inside a transaction: commit when it returns `Ok`, roll back
    /// and return its error otherwise.
    ///
    /// ```no_run
    /// # async fn run(mut cursor: dbwire::Cursor<dbwire::MysqlConnection>) -> dbwire::Result<()> {
    /// cursor
    ///     .transaction(|c| {
    ///         Box::pin(async move {
    ///             c.execute("UPDATE stock SET n = n - 1 WHERE id = %s", &[7.into()]).await?;
    ///             c.execute("INSERT INTO orders (item) VALUES (%s)", &[7.into()]).await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Cursor<C>) -> TransactionFuture<'c, T>,
    {
        self.start_transaction().await?;
        match f(&mut *self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    pub async fn ping(&mut self) -> bool {
        self.conn.ping().await
    }

    pub async fn close(mut self) -> Result<()> {
        self.conn.close().await
    }
}
