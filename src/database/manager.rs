//! Lazily opened, shared database connection
//!
//! `ConnectionManager` owns the configuration, opens the connection handle
//! exactly once no matter how many threads ask for it, and remembers which
//! tables were already handed to the schema-sync engine.

use crate::config::ManagerConfig;
use crate::database::dialect::{ConnectionHandle, Dialect, DEFAULT_MAX_IDLE_CONNS};
use crate::database::schema::TableSchema;
use crate::error::{ManagerError, ManagerResult};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, error, info, warn};

/// Outcome of the one-time open.
///
/// A handle can be present together with an error when the open succeeded
/// but configuring the pool afterwards did not.
struct Opened<H> {
    handle: Option<H>,
    error: Option<ManagerError>,
}

/// Thread-safe manager around a single lazily opened connection handle
///
/// The handle is opened at most once per manager. A failed open is never
/// retried; construct a new manager to try again.
pub struct ConnectionManager<D: Dialect> {
    dialect: D,
    config: ManagerConfig,
    conn_string: String,
    connection: OnceLock<Opened<D::Handle>>,
    migrated_tables: Mutex<HashSet<String>>,
}

impl<D: Dialect> ConnectionManager<D> {
    /// Create a manager and open its connection right away
    ///
    /// When `config` is `None` the default configuration is used: statements
    /// logged to standard output, 1 second slow threshold, error-level
    /// verbosity and colored output.
    ///
    /// On failure the returned [`OpenFailure`] still carries the manager; its
    /// [`get_connection`](Self::get_connection) keeps returning the same error.
    pub fn new(
        conn_string: impl Into<String>,
        dialect: D,
        config: Option<ManagerConfig>,
    ) -> Result<Self, OpenFailure<D>> {
        let manager = Self::deferred(conn_string, dialect, config);

        let result = manager.get_connection().map(|_| ());
        match result {
            Ok(()) => Ok(manager),
            Err(error) => Err(OpenFailure { manager, error }),
        }
    }

    /// Create a manager, terminating the process if the connection cannot be opened
    pub fn must_new(
        conn_string: impl Into<String>,
        dialect: D,
        config: Option<ManagerConfig>,
    ) -> Self {
        match Self::new(conn_string, dialect, config) {
            Ok(manager) => manager,
            Err(failure) => {
                error!("failed to connect to database: {}", failure.error());
                eprintln!("failed to connect to database: {}", failure.error());
                std::process::exit(1);
            }
        }
    }

    /// Create a manager without opening the connection
    ///
    /// The first [`get_connection`](Self::get_connection) call opens it.
    pub fn deferred(
        conn_string: impl Into<String>,
        dialect: D,
        config: Option<ManagerConfig>,
    ) -> Self {
        Self {
            dialect,
            config: config.unwrap_or_default(),
            conn_string: conn_string.into(),
            connection: OnceLock::new(),
            migrated_tables: Mutex::new(HashSet::new()),
        }
    }

    /// Get the shared connection handle, opening it on first use
    ///
    /// Concurrent first callers block until the single open attempt finishes,
    /// then all of them observe the same outcome.
    pub fn get_connection(&self) -> ManagerResult<&D::Handle> {
        let opened = self.connection.get_or_init(|| self.open());

        match (&opened.error, &opened.handle) {
            (Some(err), _) => Err(err.clone()),
            (None, Some(handle)) => Ok(handle),
            (None, None) => Err(ManagerError::ConnectionClosed),
        }
    }

    fn open(&self) -> Opened<D::Handle> {
        info!(dialect = self.dialect.name(), "Opening database connection");

        let handle = match self.dialect.open(&self.conn_string, &self.config) {
            Ok(handle) => handle,
            Err(e) => {
                return Opened {
                    handle: None,
                    error: Some(ManagerError::open(e)),
                }
            }
        };

        let error = configure_pool(&handle).err().map(ManagerError::open);
        Opened {
            handle: Some(handle),
            error,
        }
    }

    /// The handle, if an open attempt produced one
    fn handle(&self) -> Option<&D::Handle> {
        self.connection.get().and_then(|o| o.handle.as_ref())
    }

    /// Whether a connection handle has been established
    pub fn is_connected(&self) -> bool {
        self.handle().is_some()
    }

    /// Synchronize the given tables, skipping ones already requested before
    ///
    /// Tables are marked as migrated before the sync engine runs. If the batch
    /// fails, the tables in it are still considered migrated and later calls
    /// will not retry them.
    pub fn auto_migrate(&self, tables: &[TableSchema]) -> ManagerResult<()> {
        let handle = self.handle().ok_or(ManagerError::ConnectionClosed)?;

        let pending = self.mark_unmigrated(tables);
        if pending.is_empty() {
            debug!("All requested tables already migrated");
            return Ok(());
        }

        let names: Vec<&str> = pending.iter().map(|t| t.name.as_str()).collect();
        debug!(tables = ?names, "Synchronizing schema");
        handle.sync_schema(&pending).map_err(ManagerError::sync)
    }

    /// Same as [`auto_migrate`](Self::auto_migrate) but logs the error instead of returning it
    pub fn auto_migrate_or_warn(&self, tables: &[TableSchema]) {
        if let Err(e) = self.auto_migrate(tables) {
            warn!("{}", e);
        }
    }

    // Check, mark and collect under one lock so overlapping calls cannot both
    // pick up the same table.
    fn mark_unmigrated(&self, tables: &[TableSchema]) -> Vec<TableSchema> {
        let mut migrated = self.migrated();
        tables
            .iter()
            .filter(|t| migrated.insert(t.name.clone()))
            .cloned()
            .collect()
    }

    fn migrated(&self) -> MutexGuard<'_, HashSet<String>> {
        self.migrated_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a table with this name was already handed to the sync engine
    pub fn is_migrated(&self, table_name: &str) -> bool {
        self.migrated().contains(table_name)
    }

    /// Sorted names of all migrated tables
    pub fn migrated_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.migrated().iter().cloned().collect();
        names.sort();
        names
    }

    /// Canonical name of the configured dialect
    pub fn dialect(&self) -> &str {
        self.dialect.name()
    }

    /// Connection string as supplied at construction
    pub fn conn_string(&self) -> &str {
        &self.conn_string
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

fn configure_pool<H: ConnectionHandle>(handle: &H) -> anyhow::Result<()> {
    handle.set_max_idle_conns(DEFAULT_MAX_IDLE_CONNS)?;
    handle.set_max_open_conns(None)?;
    Ok(())
}

impl<D: Dialect> fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("dialect", &self.dialect.name())
            .field("conn_string", &self.conn_string)
            .field("connected", &self.is_connected())
            .field("migrated_tables", &self.migrated_tables())
            .finish()
    }
}

/// Failed construction: the open error plus the manager that produced it
pub struct OpenFailure<D: Dialect> {
    manager: ConnectionManager<D>,
    error: ManagerError,
}

impl<D: Dialect> OpenFailure<D> {
    pub fn error(&self) -> &ManagerError {
        &self.error
    }

    pub fn into_error(self) -> ManagerError {
        self.error
    }

    pub fn into_manager(self) -> ConnectionManager<D> {
        self.manager
    }

    pub fn into_parts(self) -> (ConnectionManager<D>, ManagerError) {
        (self.manager, self.error)
    }
}

impl<D: Dialect> fmt::Debug for OpenFailure<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFailure")
            .field("manager", &self.manager)
            .field("error", &self.error)
            .finish()
    }
}

impl<D: Dialect> fmt::Display for OpenFailure<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<D: Dialect> std::error::Error for OpenFailure<D> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::{ColumnDef, ColumnType};
    use crate::logger::{capture_events, LogLevel, LogOutput};
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Calls {
        opens: AtomicUsize,
        synced: Mutex<Vec<Vec<String>>>,
        max_idle: Mutex<Option<usize>>,
        max_open: Mutex<Option<Option<usize>>>,
        pool_calls: Mutex<Vec<&'static str>>,
    }

    #[derive(Default)]
    struct FakeDialect {
        calls: Arc<Calls>,
        fail_open: bool,
        fail_pool: bool,
        fail_sync: bool,
        open_delay: Option<Duration>,
    }

    #[derive(Debug)]
    struct FakeHandle {
        calls: Arc<Calls>,
        fail_pool: bool,
        fail_sync: bool,
    }

    impl Dialect for FakeDialect {
        type Handle = FakeHandle;

        fn name(&self) -> &str {
            "fake"
        }

        fn open(&self, _conn_string: &str, _config: &ManagerConfig) -> Result<FakeHandle> {
            self.calls.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.open_delay {
                thread::sleep(delay);
            }
            if self.fail_open {
                return Err(anyhow!("dial tcp: connection refused"));
            }
            Ok(FakeHandle {
                calls: self.calls.clone(),
                fail_pool: self.fail_pool,
                fail_sync: self.fail_sync,
            })
        }
    }

    impl ConnectionHandle for FakeHandle {
        fn set_max_idle_conns(&self, n: usize) -> Result<()> {
            self.calls.pool_calls.lock().unwrap().push("idle");
            if self.fail_pool {
                return Err(anyhow!("sql: database is closed"));
            }
            *self.calls.max_idle.lock().unwrap() = Some(n);
            Ok(())
        }

        fn set_max_open_conns(&self, n: Option<usize>) -> Result<()> {
            self.calls.pool_calls.lock().unwrap().push("open");
            *self.calls.max_open.lock().unwrap() = Some(n);
            Ok(())
        }

        fn sync_schema(&self, tables: &[TableSchema]) -> Result<()> {
            self.calls
                .synced
                .lock()
                .unwrap()
                .push(tables.iter().map(|t| t.name.clone()).collect());
            if self.fail_sync {
                return Err(anyhow!("table sync failed"));
            }
            Ok(())
        }
    }

    fn table(name: &str) -> TableSchema {
        TableSchema::new(name).with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
    }

    fn synced(calls: &Calls) -> Vec<Vec<String>> {
        calls.synced.lock().unwrap().clone()
    }

    #[test]
    fn test_new_opens_eagerly_and_configures_pool() {
        let dialect = FakeDialect::default();
        let calls = dialect.calls.clone();

        let manager = ConnectionManager::new("fake://db", dialect, None).unwrap();
        assert_eq!(calls.opens.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
        assert_eq!(*calls.max_idle.lock().unwrap(), Some(10));
        assert_eq!(*calls.max_open.lock().unwrap(), Some(None));
        assert_eq!(*calls.pool_calls.lock().unwrap(), vec!["idle", "open"]);

        manager.get_connection().unwrap();
        manager.get_connection().unwrap();
        assert_eq!(calls.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_config() {
        let manager = ConnectionManager::deferred("fake://db", FakeDialect::default(), None);
        let logger = &manager.config().logger;
        assert_eq!(logger.output, LogOutput::Stdout);
        assert_eq!(logger.slow_threshold, Duration::from_secs(1));
        assert_eq!(logger.level, LogLevel::Error);
        assert!(logger.colorful);
    }

    #[test]
    fn test_concurrent_get_connection_opens_once() {
        let dialect = FakeDialect {
            open_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let calls = dialect.calls.clone();
        let manager = Arc::new(ConnectionManager::deferred("fake://db", dialect, None));

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let handle = manager.get_connection().unwrap();
                    handle as *const FakeHandle as usize
                })
            })
            .collect();

        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.opens.load(Ordering::SeqCst), 1);
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_failed_open_is_never_retried() {
        let dialect = FakeDialect {
            fail_open: true,
            ..Default::default()
        };
        let calls = dialect.calls.clone();

        let failure = ConnectionManager::new("fake://db", dialect, None).unwrap_err();
        assert_eq!(failure.to_string(), "dial tcp: connection refused");

        let manager = failure.into_manager();
        for _ in 0..3 {
            let err = manager.get_connection().unwrap_err();
            assert_eq!(err.to_string(), "dial tcp: connection refused");
        }
        assert_eq!(calls.opens.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_pool_failure_keeps_handle() {
        let dialect = FakeDialect {
            fail_pool: true,
            ..Default::default()
        };
        let calls = dialect.calls.clone();

        let (manager, err) = ConnectionManager::new("fake://db", dialect, None)
            .unwrap_err()
            .into_parts();
        assert!(matches!(err, ManagerError::ConnectionOpen(_)));
        assert!(manager.is_connected());
        // The idle limit failed first, so the open limit was never applied
        assert_eq!(*calls.pool_calls.lock().unwrap(), vec!["idle"]);
        assert!(manager.get_connection().is_err());

        // The handle exists, so schema sync still goes through
        manager.auto_migrate(&[table("users")]).unwrap();
        assert_eq!(synced(&calls), vec![vec!["users".to_string()]]);
    }

    #[test]
    fn test_auto_migrate_is_idempotent() {
        let dialect = FakeDialect::default();
        let calls = dialect.calls.clone();
        let manager = ConnectionManager::new("fake://db", dialect, None).unwrap();

        manager.auto_migrate(&[table("a"), table("b")]).unwrap();
        manager
            .auto_migrate(&[table("a"), table("b"), table("c")])
            .unwrap();
        manager.auto_migrate(&[table("c")]).unwrap();

        assert_eq!(
            synced(&calls),
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string()],
            ]
        );
        assert_eq!(manager.migrated_tables(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_auto_migrate_collapses_duplicates_in_one_call() {
        let dialect = FakeDialect::default();
        let calls = dialect.calls.clone();
        let manager = ConnectionManager::new("fake://db", dialect, None).unwrap();

        manager
            .auto_migrate(&[table("a"), table("a"), table("b")])
            .unwrap();
        assert_eq!(
            synced(&calls),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[test]
    fn test_auto_migrate_without_connection() {
        let dialect = FakeDialect::default();
        let calls = dialect.calls.clone();
        let manager = ConnectionManager::deferred("fake://db", dialect, None);

        let err = manager.auto_migrate(&[table("a")]).unwrap_err();
        assert!(err.is_connection_closed());
        assert!(synced(&calls).is_empty());
        assert!(!manager.is_migrated("a"));

        let failed = FakeDialect {
            fail_open: true,
            ..Default::default()
        };
        let calls = failed.calls.clone();
        let manager = ConnectionManager::new("fake://db", failed, None)
            .unwrap_err()
            .into_manager();
        let err = manager.auto_migrate(&[table("a")]).unwrap_err();
        assert!(matches!(err, ManagerError::ConnectionClosed));
        assert!(synced(&calls).is_empty());
    }

    #[test]
    fn test_failed_sync_still_marks_tables() {
        let dialect = FakeDialect {
            fail_sync: true,
            ..Default::default()
        };
        let calls = dialect.calls.clone();
        let manager = ConnectionManager::new("fake://db", dialect, None).unwrap();

        let err = manager.auto_migrate(&[table("a")]).unwrap_err();
        assert!(matches!(err, ManagerError::SchemaSync(_)));
        assert_eq!(err.to_string(), "table sync failed");

        // Marked before the sync ran, so it is not retried
        manager.auto_migrate(&[table("a")]).unwrap();
        assert_eq!(synced(&calls).len(), 1);
        assert!(manager.is_migrated("a"));
    }

    #[test]
    fn test_auto_migrate_or_warn_swallows_errors() {
        let dialect = FakeDialect {
            fail_sync: true,
            ..Default::default()
        };
        let calls = dialect.calls.clone();
        let manager = ConnectionManager::new("fake://db", dialect, None).unwrap();

        let logs = capture_events(|| manager.auto_migrate_or_warn(&[table("a")]));
        assert_eq!(synced(&calls).len(), 1);
        let warning = logs
            .lines()
            .find(|l| l.contains("WARN"))
            .unwrap_or_default();
        assert!(warning.contains("table sync failed"));

        let closed = ConnectionManager::deferred("fake://db", FakeDialect::default(), None);
        let logs = capture_events(|| closed.auto_migrate_or_warn(&[table("a")]));
        assert!(logs
            .lines()
            .any(|l| l.contains("WARN") && l.contains("db connection closed")));
    }

    #[test]
    fn test_auto_migrate_or_warn_quiet_on_success() {
        let manager = ConnectionManager::new("fake://db", FakeDialect::default(), None).unwrap();
        let logs = capture_events(|| manager.auto_migrate_or_warn(&[table("a")]));
        assert!(!logs.contains("WARN"));
        assert!(manager.is_migrated("a"));
    }

    #[test]
    fn test_concurrent_auto_migrate_syncs_each_table_once() {
        let dialect = FakeDialect::default();
        let calls = dialect.calls.clone();
        let manager = Arc::new(ConnectionManager::new("fake://db", dialect, None).unwrap());

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    manager
                        .auto_migrate(&[table("a"), table("b"), table("c")])
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut all: Vec<String> = synced(&calls).into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_accessors_have_no_side_effects() {
        let dialect = FakeDialect::default();
        let calls = dialect.calls.clone();
        let manager = ConnectionManager::deferred("fake://user@host/db", dialect, None);

        assert_eq!(manager.dialect(), "fake");
        assert_eq!(manager.conn_string(), "fake://user@host/db");
        assert_eq!(calls.opens.load(Ordering::SeqCst), 0);
        assert!(!manager.is_connected());
    }
}
