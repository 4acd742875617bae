//! Driver capabilities consumed by the connection manager
//!
//! The manager never talks to a database directly. A [`Dialect`] knows how to
//! open a [`ConnectionHandle`], and the handle exposes pool controls and the
//! schema-sync engine.

use crate::config::ManagerConfig;
use crate::database::schema::TableSchema;
use anyhow::Result;

/// Maximum idle connections kept by a freshly opened handle
pub const DEFAULT_MAX_IDLE_CONNS: usize = 10;

/// Database engine family a connection targets
pub trait Dialect: Send + Sync {
    type Handle: ConnectionHandle;

    /// Canonical dialect name, e.g. `sqlite`
    fn name(&self) -> &str;

    /// Open a connection handle for `conn_string`
    fn open(&self, conn_string: &str, config: &ManagerConfig) -> Result<Self::Handle>;
}

/// Live, pooled connection returned by [`Dialect::open`]
pub trait ConnectionHandle: Send + Sync {
    /// Cap the number of idle connections kept in the pool
    fn set_max_idle_conns(&self, n: usize) -> Result<()>;

    /// Cap the number of open connections; `None` means unlimited
    fn set_max_open_conns(&self, n: Option<usize>) -> Result<()>;

    /// Create or alter tables so the live schema matches `tables`
    fn sync_schema(&self, tables: &[TableSchema]) -> Result<()>;
}
