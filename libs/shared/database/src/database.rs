use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use shared_config::AppConfig;

use crate::schema::SCHEMA;

/// Handle to the clinic store.
///
/// Reads go straight to the pool or through [`Database::begin`]. Every write
/// that must first check what is already stored (bookings, schedule edits)
/// goes through [`Database::begin_write`], which serializes writers inside
/// this process so the check and the write see the same state.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        if config.is_in_memory_database() {
            warn!("Using an in-memory database, all data is lost on shutdown");
        }
        Self::connect_with(&config.database_url, config.database_max_connections).await
    }

    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {}", url))?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        if !in_memory {
            options = options
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
        }

        // Each connection to `sqlite::memory:` opens its own empty database,
        // so the pool keeps exactly one connection alive for its whole life.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", url))?;

        let database = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        database.bootstrap().await?;

        info!("Database ready at {}", url);
        Ok(database)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect_with("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens a read transaction for a consistent view across several queries.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Opens a serialized write transaction.
    ///
    /// Do not touch [`Database::pool`] while holding it: with an in-memory
    /// database the transaction owns the only connection.
    pub async fn begin_write(&self) -> Result<WriteTransaction, sqlx::Error> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        debug!("Write lock acquired");
        let tx = self.pool.begin().await?;

        Ok(WriteTransaction { tx, guard })
    }

    async fn bootstrap(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }
}

/// A transaction that holds the process-wide write lock until it is
/// committed or dropped. Dropping without commit rolls back.
pub struct WriteTransaction {
    tx: Transaction<'static, Sqlite>,
    guard: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        let Self { tx, guard } = self;
        let result = tx.commit().await;
        drop(guard);
        debug!("Write lock released");
        result
    }
}
