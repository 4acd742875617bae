//! Error types for the connection manager
//!
//! Driver and schema-engine collaborators report failures as `anyhow::Error`.
//! The manager stores those once and hands them out to every caller, so they
//! are kept behind an `Arc` and never re-wrapped with extra context.

use std::sync::Arc;

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager)
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    /// Opening the connection or configuring its pool failed.
    ///
    /// Captured by the one-time open and returned to every later caller.
    #[error("{0}")]
    ConnectionOpen(Arc<anyhow::Error>),

    /// No connection handle was ever established
    #[error("db connection closed")]
    ConnectionClosed,

    /// The schema-sync engine rejected the batch
    #[error("{0}")]
    SchemaSync(Arc<anyhow::Error>),
}

impl ManagerError {
    pub(crate) fn open(err: anyhow::Error) -> Self {
        ManagerError::ConnectionOpen(Arc::new(err))
    }

    pub(crate) fn sync(err: anyhow::Error) -> Self {
        ManagerError::SchemaSync(Arc::new(err))
    }

    /// True for the closed-connection sentinel
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ManagerError::ConnectionClosed)
    }
}

/// Specialized Result type for manager operations
pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_errors_display_without_extra_context() {
        let err = ManagerError::open(anyhow!("unable to open database file"));
        assert_eq!(err.to_string(), "unable to open database file");

        let err = ManagerError::sync(anyhow!("near \"TABLE\": syntax error"));
        assert_eq!(err.to_string(), "near \"TABLE\": syntax error");

        assert_eq!(
            ManagerError::ConnectionClosed.to_string(),
            "db connection closed"
        );
    }

    #[test]
    fn test_cloned_open_error_shares_source() {
        let err = ManagerError::open(anyhow!("boom"));
        let cloned = err.clone();
        match (err, cloned) {
            (ManagerError::ConnectionOpen(a), ManagerError::ConnectionOpen(b)) => {
                assert!(Arc::ptr_eq(&a, &b));
            }
            _ => panic!("expected connection open errors"),
        }
    }

    #[test]
    fn test_is_connection_closed() {
        assert!(ManagerError::ConnectionClosed.is_connection_closed());
        assert!(!ManagerError::open(anyhow!("x")).is_connection_closed());
    }
}
