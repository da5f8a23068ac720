//! Database migration constants and metadata

use std::time::Duration;

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptions
pub const MIGRATION_DESCRIPTIONS: &[&str] =
    &["Initial schema with polls, options and ballot ledger"];

/// Default database file path
pub const DEFAULT_DB_PATH: &str = "polls.db";

/// How long a connection waits on a locked database before reporting busy
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
