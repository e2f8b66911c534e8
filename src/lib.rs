//! MySQL and PostgreSQL clients implemented from the wire protocol up.
//!
//! Each backend is a sans-IO state machine fed by a shared [`framer`], driven
//! over tokio by its connection type. On top sit a [`Cursor`] with argument
//! substitution and transaction nesting, and a health-checked [`Pool`].
//!
//! ```no_run
//! use dbwire::{Pool, MysqlConfig};
//!
//! # async fn run() -> dbwire::Result<()> {
//! let pool = Pool::setup(MysqlConfig::from_url("mysql://app:pw@localhost/shop")?, 4).await?;
//! let mut cursor = pool.cursor().await?;
//! let user = cursor
//!     .select_one("SELECT name FROM users WHERE id = %s", &[7.into()])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod convert;
pub mod cursor;
pub mod error;
pub mod field;
pub mod framer;
pub mod mysql;
pub mod pg;
pub mod pool;
pub mod transport;
pub mod value;

pub use cursor::{Connection, Cursor, Record, ResultSet};
pub use error::{Error, Result};
pub use field::FieldKind;
pub use mysql::{MysqlConfig, MysqlConnection};
pub use pg::{PgConfig, PgConnection};
pub use pool::{Connector, Pool, PooledConnection};
pub use value::{Bit, Value};
