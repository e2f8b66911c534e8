//! Connection pool.
//!
//! A fixed set of slot-tagged connections kept in a LIFO list. Acquire never
//! waits: an empty pool hands out an unpooled connection instead. Connections
//! are health-checked on the way out and replaced in place when the check
//! fails; closing a pooled connection puts a fresh one back in its slot.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cursor::{Connection, Cursor, ResultSet};
use crate::error::{Error, Result};
use crate::value::Value;

/// Factory for new connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection + 'static;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// An idle connection with its 1-based slot index.
struct Slot<C> {
    index: usize,
    conn: C,
}

struct PoolInner<K: Connector> {
    connector: K,
    size: usize,
    /// Idle connections; the most recently returned is at the end.
    idle: Mutex<Vec<Slot<K::Connection>>>,
}

impl<K: Connector> PoolInner<K> {
    fn push(&self, index: usize, conn: K::Connection) {
        self.idle.lock().push(Slot { index, conn });
    }

    /// Close `slot`'s connection and connect a replacement for the same
    /// slot. On failure the old connection is handed back with the error.
    async fn reconnect(
        &self,
        mut slot: Slot<K::Connection>,
    ) -> std::result::Result<Slot<K::Connection>, (Slot<K::Connection>, Error)> {
        if let Err(e) = slot.conn.close().await {
            debug!(slot = slot.index, error = %e, "error closing stale connection");
        }
        match self.connector.connect().await {
            Ok(conn) => {
                debug!(slot = slot.index, "replaced pooled connection");
                Ok(Slot {
                    index: slot.index,
                    conn,
                })
            }
            Err(e) => Err((slot, e)),
        }
    }
}

/// A pool of connections produced by a [`Connector`].
pub struct Pool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for Pool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> Pool<K> {
    /// Open `size` connections, tagged with slots `1..=size`.
    pub async fn setup(connector: K, size: usize) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            connector,
            size,
            idle: Mutex::new(Vec::with_capacity(size)),
        });

        for index in 1..=size {
            let conn = inner.connector.connect().await?;
            debug!(slot = index, "created pooled connection");
            inner.push(index, conn);
        }

        Ok(Self { inner })
    }

    /// Take a connection, health-checking pooled ones.
    ///
    /// A connection that fails its ping is replaced in its slot. If the
    /// replacement can't be made, the dead connection goes back to the pool
    /// and [`Error::DatabaseReconnect`] is returned.
    pub async fn acquire(&self) -> Result<PooledConnection<K>> {
        let slot = self.inner.idle.lock().pop();

        let Some(mut slot) = slot else {
            debug!(size = self.inner.size, "pool exhausted, opening unpooled connection");
            let conn = self.inner.connector.connect().await?;
            return Ok(PooledConnection {
                conn: Some(conn),
                slot: None,
                pool: Arc::clone(&self.inner),
            });
        };

        if !slot.conn.ping().await {
            debug!(slot = slot.index, "pooled connection failed health check");
            slot = match self.inner.reconnect(slot).await {
                Ok(slot) => slot,
                Err((slot, e)) => {
                    warn!(slot = slot.index, error = %e, "unable to reconnect pooled connection");
                    self.inner.push(slot.index, slot.conn);
                    return Err(Error::DatabaseReconnect(e.to_string()));
                }
            };
        }

        debug!(slot = slot.index, "using pooled connection");
        Ok(PooledConnection {
            conn: Some(slot.conn),
            slot: Some(slot.index),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Acquire a connection wrapped in a [`Cursor`].
    pub async fn cursor(&self) -> Result<Cursor<PooledConnection<K>>> {
        Ok(Cursor::new(self.acquire().await?))
    }

    /// Number of pooled slots.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Number of connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn connector(&self) -> &K {
        &self.inner.connector
    }

    /// Close every idle connection. Connections checked out stay open.
    pub async fn close(&self) {
        let idle = std::mem::take(&mut *self.inner.idle.lock());
        for mut slot in idle {
            if let Err(e) = slot.conn.close().await {
                debug!(slot = slot.index, error = %e, "error closing pooled connection");
            }
        }
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// [`Connection::close`] closes it and puts a fresh connection in its slot.
/// Dropping it without closing returns it to the pool as is.
pub struct PooledConnection<K: Connector> {
    /// `None` once closed.
    conn: Option<K::Connection>,
    /// `None` for connections opened because the pool was empty.
    slot: Option<usize>,
    pool: Arc<PoolInner<K>>,
}

impl<K: Connector> PooledConnection<K> {
    /// Slot index, or `None` for an unpooled connection.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn get_ref(&self) -> Option<&K::Connection> {
        self.conn.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut K::Connection> {
        self.conn.as_mut()
    }

    fn conn_mut(&mut self) -> Result<&mut K::Connection> {
        self.conn.as_mut().ok_or(Error::ConnectionClosed)
    }

    fn conn_ref(&self) -> Result<&K::Connection> {
        self.conn.as_ref().ok_or(Error::ConnectionClosed)
    }
}

#[async_trait]
impl<K: Connector> Connection for PooledConnection<K> {
    async fn execute(&mut self, query: &str) -> Result<ResultSet> {
        self.conn_mut()?.execute(query).await
    }

    async fn execute_insert(&mut self, query: &str, primary_key: &str) -> Result<ResultSet> {
        self.conn_mut()?.execute_insert(query, primary_key).await
    }

    async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => false,
        }
    }

    /// Close the connection; a pooled slot gets a fresh replacement. If no
    /// replacement can be made the closed connection takes the slot and is
    /// repaired on a later acquire.
    async fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        if let Err(e) = conn.close().await {
            debug!(slot = ?self.slot, error = %e, "error closing connection");
        }

        let Some(index) = self.slot else {
            return Ok(());
        };

        match self.pool.connector.connect().await {
            Ok(fresh) => {
                debug!(slot = index, "replaced closed connection");
                self.pool.push(index, fresh);
            }
            Err(e) => {
                warn!(slot = index, error = %e, "unable to replace closed connection");
                self.pool.push(index, conn);
            }
        }
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        self.conn_ref()?.serialize(value)
    }

    fn last_id(&self) -> Option<Value> {
        self.conn.as_ref().and_then(Connection::last_id)
    }

    fn message(&self) -> Option<String> {
        self.conn.as_ref().and_then(Connection::message)
    }

    fn transactions(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::transactions)
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        if let (Some(conn), Some(index)) = (self.conn.take(), self.slot) {
            self.pool.push(index, conn);
        }
    }
}
