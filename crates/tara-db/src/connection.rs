use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{Database, DbError, Result};

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

impl Location {
    /// Accepts `sqlite://<path>`, `sqlite::memory:`, `:memory:` or a bare path.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DbError::MissingConnectionString);
        }

        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        match rest {
            "" => Err(DbError::MissingConnectionString),
            ":memory:" => Ok(Location::Memory),
            path => Ok(Location::File(PathBuf::from(path))),
        }
    }
}

/// Owns the process-wide database handle.
///
/// The handle is opened on the first `ensure_connection` and shared by every
/// later caller. Concurrent callers wait on the same lock, so at most one open
/// ever happens.
pub struct ConnectionManager {
    url: Option<String>,
    handle: Mutex<Option<Arc<Database>>>,
}

impl ConnectionManager {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            handle: Mutex::new(None),
        }
    }

    pub async fn ensure_connection(&self) -> Result<Arc<Database>> {
        let mut handle = self.handle.lock().await;
        if let Some(db) = handle.as_ref() {
            return Ok(db.clone());
        }

        let url = self.url.as_deref().ok_or(DbError::MissingConnectionString)?;
        let location = Location::parse(url)?;

        info!("Connecting to database...");
        let db = tokio::task::spawn_blocking(move || match location {
            Location::Memory => Database::open_in_memory(),
            Location::File(path) => Database::open(&path),
        })
        .await
        .map_err(|e| DbError::Task(e.to_string()))??;

        let db = Arc::new(db);
        *handle = Some(db.clone());
        Ok(db)
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Release the manager's handle. The store is closed once no request still
    /// holds a clone; otherwise it closes when the last clone drops.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(db) = self.handle.lock().await.take() else {
            return Ok(());
        };

        match Arc::try_unwrap(db) {
            Ok(db) => tokio::task::spawn_blocking(move || db.close())
                .await
                .map_err(|e| DbError::Task(e.to_string()))?,
            Err(still_shared) => {
                warn!(
                    "Database still referenced by {} handle(s) at shutdown",
                    Arc::strong_count(&still_shared) - 1
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_strings() {
        assert_eq!(Location::parse(":memory:").unwrap(), Location::Memory);
        assert_eq!(Location::parse("sqlite::memory:").unwrap(), Location::Memory);
        assert_eq!(
            Location::parse("sqlite://data/tara.db").unwrap(),
            Location::File(PathBuf::from("data/tara.db"))
        );
        assert_eq!(
            Location::parse("tara.db").unwrap(),
            Location::File(PathBuf::from("tara.db"))
        );
        assert!(matches!(
            Location::parse("  "),
            Err(DbError::MissingConnectionString)
        ));
    }

    #[tokio::test]
    async fn missing_url_fails_fast() {
        let manager = ConnectionManager::new(None);
        let err = manager.ensure_connection().await.err().unwrap();
        assert!(matches!(err, DbError::MissingConnectionString));
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn repeated_and_concurrent_calls_share_one_handle() {
        let manager = Arc::new(ConnectionManager::new(Some(":memory:".into())));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_connection().await.unwrap() })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        let first = manager.ensure_connection().await.unwrap();
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &first)));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let manager = ConnectionManager::new(Some(":memory:".into()));
        let db = manager.ensure_connection().await.unwrap();
        drop(db);

        manager.shutdown().await.unwrap();
        assert!(!manager.is_connected().await);
        manager.shutdown().await.unwrap();
    }
}
