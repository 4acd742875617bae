//! Database module
//!
//! This module provides the connection manager and the driver layer it sits on:
//!
//! - **manager**: Lazily opened shared handle and the migrated-table set
//! - **dialect**: Traits a database driver implements
//! - **schema**: Declarative table descriptions handed to schema sync
//! - **sqlite**: SQLite driver (pool, pragmas, schema sync)
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── manager         # ConnectionManager, OpenFailure
//! ├── dialect         # Dialect + ConnectionHandle traits
//! ├── schema          # TableSchema, ColumnDef, IndexDef, Model
//! │
//! └── sqlite/         # SQLite driver
//!     ├── pool        # r2d2 connection pool and per-connection pragmas
//!     └── sync        # CREATE TABLE / ADD COLUMN / CREATE INDEX
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use lazydb::database::{ConnectionManager, Sqlite};
//!
//! // Open lazily; the first get_connection() call connects
//! let manager = ConnectionManager::deferred(":memory:", Sqlite, None);
//! let pool = manager.get_connection()?;
//! println!("{:?}", pool.stats());
//! ```

pub mod dialect;
pub mod manager;
pub mod schema;
pub mod sqlite;

pub use dialect::{ConnectionHandle, Dialect, DEFAULT_MAX_IDLE_CONNS};
pub use manager::{ConnectionManager, OpenFailure};
pub use schema::{ColumnDef, ColumnType, IndexDef, Model, TableSchema};
pub use sqlite::{PoolStats, PooledConnection, Sqlite, SqlitePool, SQLITE_DIALECT};
