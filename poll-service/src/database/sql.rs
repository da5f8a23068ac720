//! SQL statement constants for database operations

pub const CREATE_MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
)
"#;

pub const CREATE_POLLS_TABLE_SQL: &str = r#"
CREATE TABLE polls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question TEXT NOT NULL,
    creator_id TEXT NOT NULL,
    is_published INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_POLL_OPTIONS_TABLE_SQL: &str = r#"
CREATE TABLE poll_options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_id INTEGER NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE (id, poll_id),
    UNIQUE (poll_id, position)
)
"#;

// One row per (user, poll). The composite foreign key pins the option to its poll.
pub const CREATE_BALLOTS_TABLE_SQL: &str = r#"
CREATE TABLE ballots (
    user_id TEXT NOT NULL,
    poll_id INTEGER NOT NULL,
    option_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, poll_id),
    FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE,
    FOREIGN KEY (option_id, poll_id) REFERENCES poll_options(id, poll_id) ON DELETE CASCADE
)
"#;

pub const CREATE_DB_INDEXES: &[&str] = &[
    "CREATE INDEX idx_ballots_poll_option ON ballots(poll_id, option_id)",
    "CREATE INDEX idx_ballots_user ON ballots(user_id, updated_at)",
    "CREATE INDEX idx_polls_published ON polls(is_published, created_at)",
];

pub const UPSERT_BALLOT_SQL: &str = r#"
INSERT INTO ballots (user_id, poll_id, option_id, created_at, updated_at)
VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
ON CONFLICT (user_id, poll_id) DO UPDATE SET
    option_id = excluded.option_id,
    updated_at = excluded.updated_at
RETURNING user_id, poll_id, option_id, created_at, updated_at
"#;

pub const INSERT_BALLOT_SQL: &str = r#"
INSERT INTO ballots (user_id, poll_id, option_id, created_at, updated_at)
VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
RETURNING user_id, poll_id, option_id, created_at, updated_at
"#;

pub const COUNTS_BY_OPTION_SQL: &str =
    "SELECT option_id, COUNT(*) AS votes FROM ballots WHERE poll_id = ? GROUP BY option_id";
