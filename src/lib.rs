#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! lazydb - A lazily opened, thread-safe database connection manager
//!
//! lazydb wraps a single pooled database handle behind a manager that opens
//! it once, shares it across threads, and keeps track of which tables were
//! already synchronized so repeated schema requests are cheap.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`database`]**: Connection manager and driver abstraction
//!   - `manager`: `ConnectionManager`, the one-time open and the migrated-table set
//!   - `dialect`: `Dialect` and `ConnectionHandle` traits implemented by drivers
//!   - `schema`: Table, column and index descriptions
//!   - `sqlite`: SQLite dialect with its connection pool and schema sync
//!
//! - **[`logger`]**: Statement logger (levels, slow-statement threshold, colors)
//! - **[`config`]**: Manager configuration and file/environment settings
//! - **[`error`]**: Errors surfaced by the manager
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lazydb::{ColumnDef, ColumnType, ConnectionManager, Sqlite, TableSchema};
//!
//! let manager = ConnectionManager::new("data.sqlite3", Sqlite, None)?;
//!
//! let users = TableSchema::new("users")
//!     .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!     .with_column(ColumnDef::new("email", ColumnType::Text).not_null());
//!
//! // Only the first call reaches the database
//! manager.auto_migrate(&[users.clone()])?;
//! manager.auto_migrate(&[users])?;
//!
//! let pool = manager.get_connection()?;
//! pool.execute("DELETE FROM users")?;
//! ```
//!
//! ## Loading settings
//!
//! ```rust,ignore
//! use lazydb::{ConnectionManager, ManagerSettings};
//!
//! // ~/.lazydb/lazydb.toml, overridden by LAZYDB_* environment variables
//! let settings = ManagerSettings::load(None)?;
//! let manager = ConnectionManager::from_settings(&settings)?;
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod logger;

// =============================================================================
// Database
// =============================================================================

pub use database::{
    ColumnDef, ColumnType, ConnectionHandle, ConnectionManager, Dialect, IndexDef, Model,
    OpenFailure, PoolStats, PooledConnection, Sqlite, SqlitePool, TableSchema,
    DEFAULT_MAX_IDLE_CONNS, SQLITE_DIALECT,
};

// =============================================================================
// Configuration, errors and logging
// =============================================================================

pub use config::{ManagerConfig, ManagerSettings};
pub use error::{ManagerError, ManagerResult};
pub use logger::{LogLevel, LogOutput, LoggerConfig, SqlLogger};
