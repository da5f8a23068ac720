pub mod constants;
pub mod migrator;
pub mod models;
pub mod operations;
pub mod path;
pub mod sql;

use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use constants::BUSY_TIMEOUT;
use path::{parse_db_path, DbLocation};

pub use migrator::run_migrations;

/// Database manager for the poll service
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    location: DbLocation,
}

impl Database {
    /// Open a connection pool at `db_path` and run migrations
    pub async fn connect(db_path: &str, max_connections: u32) -> Result<Self> {
        info!("Initializing database at {:?}", db_path);

        let location = parse_db_path(db_path)?;
        let pool = match &location {
            // An in-memory database lives and dies with its connection, so the
            // pool holds exactly one and never recycles it.
            DbLocation::Memory => {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?
                    .foreign_keys(true)
                    .busy_timeout(BUSY_TIMEOUT);
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
            DbLocation::File(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .foreign_keys(true)
                    .busy_timeout(BUSY_TIMEOUT);
                SqlitePoolOptions::new()
                    .max_connections(max_connections.max(1))
                    .connect_with(options)
                    .await?
            }
        };

        run_migrations(&pool).await?;

        info!("Database initialized successfully");

        Ok(Database { pool, location })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }
}
