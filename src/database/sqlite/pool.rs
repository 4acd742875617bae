//! SQLite connection pool
//!
//! `rusqlite::Connection` is not `Sync`, so connections are handed out one per
//! borrower by an `r2d2` pool and returned on drop. Every pooled connection
//! runs the same pragmas when it is opened.

use crate::logger::SqlLogger;
use anyhow::{anyhow, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Idle connections kept before the manager applies its own limit
const INITIAL_MAX_IDLE_CONNS: usize = 2;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `get` waits for a free connection
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on pool size, used when no open limit is set
pub const MAX_POOL_SIZE: u32 = 256;

static MEMORY_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Where the pool's connections point
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub(crate) path: String,
    pub(crate) in_memory: bool,
}

impl Target {
    /// Resolve a connection string
    ///
    /// `:memory:` (or an empty string) becomes a named shared-cache in-memory
    /// database so every pooled connection sees the same data.
    pub(crate) fn parse(conn_string: &str) -> Target {
        let s = conn_string.trim();
        let s = s.strip_prefix("sqlite://").unwrap_or(s);

        if s.is_empty() || s == ":memory:" {
            let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
            return Target {
                path: format!(
                    "file:lazydb-mem-{}-{}?mode=memory&cache=shared",
                    std::process::id(),
                    n
                ),
                in_memory: true,
            };
        }

        Target {
            path: s.to_string(),
            in_memory: s.starts_with("file:") && s.contains("mode=memory"),
        }
    }
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open (idle + in use)
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    /// `None` means unlimited
    pub max_open: Option<usize>,
    pub max_idle: usize,
}

/// Connection borrowed from a [`SqlitePool`], returned to it on drop
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Limits the r2d2 pool is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PoolLimits {
    max_idle: usize,
    max_open: Option<usize>,
}

impl PoolLimits {
    fn max_size(&self) -> u32 {
        self.max_open
            .map_or(MAX_POOL_SIZE, |n| u32::try_from(n).unwrap_or(MAX_POOL_SIZE))
            .min(MAX_POOL_SIZE)
    }

    fn min_idle(&self) -> u32 {
        u32::try_from(self.max_idle)
            .unwrap_or(MAX_POOL_SIZE)
            .min(self.max_size())
    }
}

/// Pool of SQLite connections to one database
///
/// Backed by an `r2d2` pool. Changing a limit builds a fresh pool with the
/// new settings; connections already handed out keep the old one alive until
/// they are dropped.
pub struct SqlitePool {
    target: Target,
    logger: SqlLogger,
    limits: Mutex<PoolLimits>,
    pool: RwLock<Pool<SqliteConnectionManager>>,
    // Keeps a shared in-memory database alive across pool rebuilds
    _anchor: Option<Mutex<Connection>>,
}

impl SqlitePool {
    /// Open the pool
    ///
    /// A bad path or URI fails on the first direct connection, before the
    /// pool is built.
    pub fn open(conn_string: &str, logger: SqlLogger) -> Result<Self> {
        let target = Target::parse(conn_string);

        let probe = open_connection(&target.path)?;
        let anchor = if target.in_memory {
            Some(Mutex::new(probe))
        } else {
            drop(probe);
            None
        };

        let limits = PoolLimits {
            max_idle: INITIAL_MAX_IDLE_CONNS,
            max_open: None,
        };
        let pool = build_pool(&target, limits)?;

        info!("Opened SQLite database at {}", target.path);

        Ok(Self {
            target,
            logger,
            limits: Mutex::new(limits),
            pool: RwLock::new(pool),
            _anchor: anchor,
        })
    }

    fn limits(&self) -> MutexGuard<'_, PoolLimits> {
        self.limits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Pool<SqliteConnectionManager> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Path or URI the connections are opened with
    pub fn path(&self) -> &str {
        &self.target.path
    }

    pub fn is_in_memory(&self) -> bool {
        self.target.in_memory
    }

    pub fn logger(&self) -> &SqlLogger {
        &self.logger
    }

    /// Borrow a connection, waiting if the pool is at its limit
    pub fn get(&self) -> Result<PooledConnection> {
        self.current()
            .get()
            .map_err(|e| anyhow!("Failed to get SQLite connection from pool: {}", e))
    }

    /// Keep at least `n` idle connections (capped by the open limit)
    pub fn set_max_idle_conns(&self, n: usize) -> Result<()> {
        let mut limits = self.limits();
        let next = PoolLimits {
            max_idle: match limits.max_open {
                Some(max) => n.min(max),
                None => n,
            },
            ..*limits
        };
        self.rebuild(next)?;
        *limits = next;
        debug!(max_idle = next.max_idle, "Set SQLite pool idle limit");
        Ok(())
    }

    /// Cap the number of open connections; `None` means the pool's upper bound
    pub fn set_max_open_conns(&self, n: Option<usize>) -> Result<()> {
        if n == Some(0) {
            return Err(anyhow!("Maximum open connections must be at least 1"));
        }

        let mut limits = self.limits();
        let next = PoolLimits {
            max_idle: match n {
                Some(max) => limits.max_idle.min(max),
                None => limits.max_idle,
            },
            max_open: n,
        };
        self.rebuild(next)?;
        *limits = next;
        debug!(max_open = ?n, max_size = next.max_size(), "Set SQLite pool open limit");
        Ok(())
    }

    fn rebuild(&self, limits: PoolLimits) -> Result<()> {
        let pool = build_pool(&self.target, limits)?;
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = pool;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let limits = *self.limits();
        let state = self.current().state();
        let open = state.connections as usize;
        let idle = state.idle_connections as usize;
        PoolStats {
            open,
            idle,
            in_use: open.saturating_sub(idle),
            max_open: limits.max_open,
            max_idle: limits.max_idle,
        }
    }

    /// Run a statement through the logger
    pub(crate) fn traced<T>(
        &self,
        sql: &str,
        rows: impl Fn(&T) -> Option<usize>,
        op: impl FnOnce() -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let start = Instant::now();
        let result = op();
        let elapsed = start.elapsed();

        match &result {
            Ok(value) => self.logger.trace(sql, elapsed, rows(value), None),
            Err(e) => {
                let err: &dyn std::fmt::Display = e;
                self.logger.trace(sql, elapsed, None, Some(err))
            }
        }
        result
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> Result<usize> {
        let conn = self.get()?;
        self.traced(sql, |n| Some(*n), || conn.execute(sql, []))
            .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
    }

    /// Execute a SQL statement with parameters
    pub fn execute_with_params<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<usize> {
        let conn = self.get()?;
        self.traced(sql, |n| Some(*n), || conn.execute(sql, params))
            .map_err(|e| anyhow!("Failed to execute SQL with params: {}", e))
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let conn = self.get()?;
        let sql = "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1";
        let count: i64 = self
            .traced(sql, |_| Some(1), || {
                conn.query_row(sql, [table_name], |row| row.get(0))
            })
            .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
        Ok(count > 0)
    }

    /// Column names of a table, in declaration order (empty if the table is missing)
    pub fn table_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let conn = self.get()?;
        self.columns_on(&conn, table_name)
    }

    pub(crate) fn columns_on(&self, conn: &Connection, table_name: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", super::sync::quote(table_name));
        self.traced(&sql, |cols: &Vec<String>| Some(cols.len()), || {
            let mut stmt = conn.prepare(&sql)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .map_err(|e| anyhow!("Failed to read columns of '{}': {}", table_name, e))
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let conn = self.get()?;
        let sql = format!("SELECT COUNT(*) FROM {}", super::sync::quote(table_name));
        self.traced(&sql, |_| Some(1), || conn.query_row(&sql, [], |row| row.get(0)))
            .map_err(|e| anyhow!("Failed to get table count: {}", e))
    }
}

/// Open and configure one connection outside the pool
fn open_connection(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| anyhow!("Failed to open database at '{}': {}", path, e))?;
    configure(&conn).map_err(|e| anyhow!("Failed to configure database at '{}': {}", path, e))?;
    Ok(conn)
}

/// Build an r2d2 pool whose connections all run [`configure`]
fn build_pool(target: &Target, limits: PoolLimits) -> Result<Pool<SqliteConnectionManager>> {
    let manager = SqliteConnectionManager::file(&target.path)
        .with_init(|conn: &mut Connection| configure(conn));

    Pool::builder()
        .max_size(limits.max_size())
        .min_idle(Some(limits.min_idle()))
        .connection_timeout(CONNECTION_TIMEOUT)
        .build(manager)
        .map_err(|e| anyhow!("Failed to build SQLite pool for '{}': {}", target.path, e))
}

/// Settings every pooled connection shares
fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // WAL lets readers proceed while a writer holds the database.
    // In-memory databases report "memory" and keep their own journal.
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

    conn.execute_batch(
        "PRAGMA synchronous=NORMAL;
         PRAGMA temp_store=MEMORY;
         PRAGMA foreign_keys=ON;",
    )
}
