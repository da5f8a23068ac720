//! Ballot ledger: the durable record of one vote per (user, poll).
//!
//! The one-ballot invariant is held by the store itself. The ballots table is
//! keyed on `(user_id, poll_id)` and every write is a single statement, so no
//! caller ever performs a read-then-write to decide between create and replace.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::models::BallotRecord;
use crate::types::{OptionId, PollId};

/// Default number of attempts for a ledger write that hits lock contention
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(10);

// Primary SQLite result codes that mean "another writer holds the lock".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The poll or option referenced by the write does not exist.
    #[error("poll {poll_id} or option {option_id} not found")]
    NotFound { poll_id: PollId, option_id: OptionId },

    /// Create-only write found an existing ballot for the pair.
    #[error("user {user_id} has already voted on poll {poll_id}")]
    AlreadyVoted { user_id: String, poll_id: PollId },

    /// The write could not be serialized against concurrent writers.
    #[error(
        "ballot write for user {user_id} on poll {poll_id} not serialized after {attempts} attempts"
    )]
    Conflict {
        user_id: String,
        poll_id: PollId,
        attempts: u32,
    },

    #[error("ledger storage error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ballot for (user_id, poll_id), or atomically replace its
    /// option and timestamp if one exists.
    async fn upsert_ballot(
        &self,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<BallotRecord, LedgerError>;

    /// Create the ballot for (user_id, poll_id); a second vote fails with
    /// [`LedgerError::AlreadyVoted`].
    async fn create_ballot(
        &self,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<BallotRecord, LedgerError>;

    /// Ballot count per option at a single serialization point. Options
    /// without ballots are absent from the map.
    async fn counts_by_option(
        &self,
        poll_id: PollId,
    ) -> Result<HashMap<OptionId, u64>, LedgerError>;

    async fn ballot(
        &self,
        user_id: &str,
        poll_id: PollId,
    ) -> Result<Option<BallotRecord>, LedgerError>;

    async fn ballots_for_user(&self, user_id: &str) -> Result<Vec<BallotRecord>, LedgerError>;

    async fn ballots_for_poll(&self, poll_id: PollId) -> Result<Vec<BallotRecord>, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Upsert,
    CreateOnly,
}

/// SQLite-backed ledger
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
    max_attempts: u32,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn write_ballot(
        &self,
        mode: WriteMode,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<BallotRecord, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match mode {
                WriteMode::Upsert => {
                    BallotRecord::upsert(&self.pool, user_id, poll_id, option_id).await
                }
                WriteMode::CreateOnly => {
                    BallotRecord::insert(&self.pool, user_id, poll_id, option_id).await
                }
            };

            let err = match result {
                Ok(ballot) => return Ok(ballot),
                Err(err) => err,
            };

            if is_contention(&err) {
                if attempt < self.max_attempts {
                    debug!(
                        "Ballot write contention for user {} poll {} (attempt {}/{}): {}",
                        user_id, poll_id, attempt, self.max_attempts, err
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    continue;
                }
                warn!(
                    "Ballot write for user {} poll {} gave up after {} attempts: {}",
                    user_id, poll_id, attempt, err
                );
                return Err(LedgerError::Conflict {
                    user_id: user_id.to_string(),
                    poll_id,
                    attempts: attempt,
                });
            }

            return Err(classify(err, user_id, poll_id, option_id));
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn upsert_ballot(
        &self,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<BallotRecord, LedgerError> {
        self.write_ballot(WriteMode::Upsert, user_id, poll_id, option_id)
            .await
    }

    async fn create_ballot(
        &self,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<BallotRecord, LedgerError> {
        self.write_ballot(WriteMode::CreateOnly, user_id, poll_id, option_id)
            .await
    }

    async fn counts_by_option(
        &self,
        poll_id: PollId,
    ) -> Result<HashMap<OptionId, u64>, LedgerError> {
        Ok(BallotRecord::counts_by_option(&self.pool, poll_id).await?)
    }

    async fn ballot(
        &self,
        user_id: &str,
        poll_id: PollId,
    ) -> Result<Option<BallotRecord>, LedgerError> {
        Ok(BallotRecord::get(&self.pool, user_id, poll_id).await?)
    }

    async fn ballots_for_user(&self, user_id: &str) -> Result<Vec<BallotRecord>, LedgerError> {
        Ok(BallotRecord::list_for_user(&self.pool, user_id).await?)
    }

    async fn ballots_for_poll(&self, poll_id: PollId) -> Result<Vec<BallotRecord>, LedgerError> {
        Ok(BallotRecord::list_for_poll(&self.pool, poll_id).await?)
    }
}

/// Lock contention that a later attempt may get past
fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    }
}

fn classify(err: sqlx::Error, user_id: &str, poll_id: PollId, option_id: OptionId) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_foreign_key_violation() {
            return LedgerError::NotFound { poll_id, option_id };
        }
        if db_err.is_unique_violation() {
            return LedgerError::AlreadyVoted {
                user_id: user_id.to_string(),
                poll_id,
            };
        }
    }
    LedgerError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_poll, TempDb};
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

    #[tokio::test]
    async fn upsert_creates_then_replaces_in_place() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], true).await;
        let ledger = SqliteLedger::new(db.pool().clone(), DEFAULT_MAX_WRITE_ATTEMPTS);

        let first = ledger.upsert_ballot("u1", poll.id, poll.options[0]).await.unwrap();
        let second = ledger.upsert_ballot("u1", poll.id, poll.options[1]).await.unwrap();

        assert_eq!(first.option_id, poll.options[0]);
        assert_eq!(second.option_id, poll.options[1]);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let ballots = ledger.ballots_for_poll(poll.id).await.unwrap();
        assert_eq!(ballots, vec![second]);
    }

    #[tokio::test]
    async fn create_only_rejects_second_vote() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], true).await;
        let ledger = SqliteLedger::new(db.pool().clone(), DEFAULT_MAX_WRITE_ATTEMPTS);

        ledger.create_ballot("u1", poll.id, poll.options[0]).await.unwrap();
        let err = ledger
            .create_ballot("u1", poll.id, poll.options[1])
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::AlreadyVoted { .. }), "{err:?}");
        let ballot = ledger.ballot("u1", poll.id).await.unwrap().unwrap();
        assert_eq!(ballot.option_id, poll.options[0]);
    }

    #[tokio::test]
    async fn option_of_another_poll_is_not_found() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], true).await;
        let other = seed_poll(db.pool(), &["X", "Y"], true).await;
        let ledger = SqliteLedger::new(db.pool().clone(), DEFAULT_MAX_WRITE_ATTEMPTS);

        let err = ledger
            .upsert_ballot("u1", poll.id, other.options[0])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }), "{err:?}");

        let err = ledger.upsert_ballot("u1", 9_999, 9_999).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }), "{err:?}");

        assert!(ledger.ballots_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_group_by_option() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B", "C"], true).await;
        let ledger = SqliteLedger::new(db.pool().clone(), DEFAULT_MAX_WRITE_ATTEMPTS);

        ledger.upsert_ballot("u1", poll.id, poll.options[0]).await.unwrap();
        ledger.upsert_ballot("u2", poll.id, poll.options[0]).await.unwrap();
        ledger.upsert_ballot("u3", poll.id, poll.options[1]).await.unwrap();

        let counts = ledger.counts_by_option(poll.id).await.unwrap();
        assert_eq!(counts.get(&poll.options[0]), Some(&2));
        assert_eq!(counts.get(&poll.options[1]), Some(&1));
        assert_eq!(counts.get(&poll.options[2]), None);
    }

    #[tokio::test]
    async fn each_write_is_visible_to_the_next_read() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], true).await;
        let ledger = SqliteLedger::new(db.pool().clone(), DEFAULT_MAX_WRITE_ATTEMPTS);

        for i in 0..20 {
            let option_id = poll.options[i % 2];
            ledger
                .upsert_ballot(&format!("u{}", i), poll.id, option_id)
                .await
                .unwrap();

            let counts = ledger.counts_by_option(poll.id).await.unwrap();
            assert_eq!(counts.values().sum::<u64>(), i as u64 + 1, "after write {}", i);
        }

        ledger.create_ballot("late", poll.id, poll.options[0]).await.unwrap();
        assert!(ledger.ballot("late", poll.id).await.unwrap().is_some());
        let counts = ledger.counts_by_option(poll.id).await.unwrap();
        assert_eq!(counts.values().sum::<u64>(), 21);
    }

    #[tokio::test]
    async fn concurrent_upserts_for_one_pair_leave_one_ballot() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], true).await;
        let ledger = SqliteLedger::new(db.pool().clone(), DEFAULT_MAX_WRITE_ATTEMPTS);

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            let option_id = poll.options[i % 2];
            handles.push(tokio::spawn(async move {
                ledger.upsert_ballot("same-user", poll.id, option_id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ballots = ledger.ballots_for_poll(poll.id).await.unwrap();
        assert_eq!(ballots.len(), 1);
        let counts = ledger.counts_by_option(poll.id).await.unwrap();
        assert_eq!(counts.values().sum::<u64>(), 1);
    }

    #[tokio::test]
    async fn held_write_lock_surfaces_conflict_after_retries() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], true).await;

        // A pool that reports busy immediately instead of waiting.
        let options = SqliteConnectOptions::new()
            .filename(db.path())
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::ZERO);
        let impatient = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        let ledger = SqliteLedger::new(impatient, 3);

        let mut holder = db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();

        let err = ledger
            .upsert_ballot("u1", poll.id, poll.options[0])
            .await
            .unwrap_err();
        assert!(
            matches!(err, LedgerError::Conflict { attempts: 3, .. }),
            "{err:?}"
        );

        sqlx::query("ROLLBACK").execute(&mut *holder).await.unwrap();
        drop(holder);

        assert!(ledger.ballot("u1", poll.id).await.unwrap().is_none());
    }
}
