//! State store connection and migrations.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

/// State store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    /// A stored row no longer decodes into its domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(e.to_string())
    }
}

/// `SQLite`-backed relay state. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct StateStore {
    pool: Pool<Sqlite>,
}

impl StateStore {
    /// Open (or create) the store at `path`, creating its directory.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| DatabaseError::Io(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        info!(path = %path.display(), "State store opened");
        Self::migrate(pool).await
    }

    /// Private in-memory store.
    ///
    /// Every `:memory:` connection is its own database, so the pool holds
    /// exactly one connection and never retires it.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: Pool<Sqlite>) -> Result<Self, DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        info!("State store migrations complete");
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
