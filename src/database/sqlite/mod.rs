//! SQLite dialect
//!
//! Connection strings are file paths, `file:` URIs, or `:memory:`.

mod pool;
mod sync;

pub use pool::{PoolStats, PooledConnection, SqlitePool, MAX_POOL_SIZE};
pub use sync::{add_column_sql, create_index_sql, create_table_sql};

use crate::config::{ManagerConfig, ManagerSettings};
use crate::database::dialect::{ConnectionHandle, Dialect};
use crate::database::manager::ConnectionManager;
use crate::database::schema::TableSchema;
use crate::logger::SqlLogger;
use anyhow::{anyhow, Result};

/// Canonical name of the SQLite dialect
pub const SQLITE_DIALECT: &str = "sqlite";

/// SQLite dialect descriptor
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    type Handle = SqlitePool;

    fn name(&self) -> &str {
        SQLITE_DIALECT
    }

    fn open(&self, conn_string: &str, config: &ManagerConfig) -> Result<SqlitePool> {
        SqlitePool::open(conn_string, SqlLogger::new(config.logger.clone()))
    }
}

impl ConnectionHandle for SqlitePool {
    fn set_max_idle_conns(&self, n: usize) -> Result<()> {
        SqlitePool::set_max_idle_conns(self, n)
    }

    fn set_max_open_conns(&self, n: Option<usize>) -> Result<()> {
        SqlitePool::set_max_open_conns(self, n)
    }

    fn sync_schema(&self, tables: &[TableSchema]) -> Result<()> {
        self.sync_tables(tables)
    }
}

impl ConnectionManager<Sqlite> {
    /// Create a SQLite manager from loaded settings
    pub fn from_settings(settings: &ManagerSettings) -> Result<Self> {
        if settings.dialect != SQLITE_DIALECT {
            return Err(anyhow!("Unsupported dialect '{}'", settings.dialect));
        }

        ConnectionManager::new(
            settings.connection_string.as_str(),
            Sqlite,
            Some(settings.manager_config()),
        )
        .map_err(|failure| anyhow::Error::new(failure.into_error()))
    }
}
