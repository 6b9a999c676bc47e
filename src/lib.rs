//! Connection-per-call SQLite access for the Runar ecosystem.
//!
//! # Intention
//!
//! - Run one SQL statement per call against a local SQLite file.
//! - Open a fresh connection for every call and close it before returning.
//! - Report failures as typed errors (open, execute, close) instead of sentinels.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - No query building, schema management, pooling or transactions.
//!
//! ```no_run
//! use sqlite_connector::{ConnectorConfig, SqliteConnector};
//!
//! let connector = SqliteConnector::new(ConnectorConfig::new("app.sqlite"));
//! connector.execute_statement("CREATE TABLE IF NOT EXISTS t (id INTEGER);")?;
//! connector.execute_statement("INSERT INTO t VALUES (1);")?;
//! for row in connector.execute_query("SELECT id FROM t;")? {
//!     println!("{:?}", row.get_by_name("id"));
//! }
//! # Ok::<(), sqlite_connector::ConnectorError>(())
//! ```

pub mod config;
pub mod error;
pub mod rows;
pub mod sqlite;

pub use config::{ConnectionUrl, ConnectorConfig, DEFAULT_DATABASE};
pub use error::{ConnectorError, ErrorKind, Result};
pub use rows::{Row, RowCursor, Value};
pub use sqlite::SqliteConnector;
