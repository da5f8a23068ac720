use std::collections::HashMap;

use sqlx::sqlite::SqlitePool;
use tracing::debug;

use super::models::*;
use super::sql::{COUNTS_BY_OPTION_SQL, INSERT_BALLOT_SQL, UPSERT_BALLOT_SQL};
use crate::types::{OptionId, PollId};

const POLL_COLUMNS: &str = "id, question, creator_id, is_published, created_at, updated_at";
const BALLOT_COLUMNS: &str = "user_id, poll_id, option_id, created_at, updated_at";

// Writes with RETURNING are drained with fetch_all: a statement left
// mid-step keeps its implicit transaction open on the pooled connection.
fn single_row<T>(rows: Vec<T>) -> sqlx::Result<T> {
    rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)
}

/// Database operations for the ballot ledger
impl BallotRecord {
    /// Create the ballot for (user_id, poll_id) or replace its option in place.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> sqlx::Result<BallotRecord> {
        debug!(
            "Upserting ballot: user {} poll {} option {}",
            user_id, poll_id, option_id
        );

        let rows = sqlx::query_as::<_, BallotRecord>(UPSERT_BALLOT_SQL)
            .bind(user_id)
            .bind(poll_id)
            .bind(option_id)
            .fetch_all(pool)
            .await?;
        single_row(rows)
    }

    /// Create the ballot for (user_id, poll_id); fails with a unique violation if one exists.
    pub async fn insert(
        pool: &SqlitePool,
        user_id: &str,
        poll_id: PollId,
        option_id: OptionId,
    ) -> sqlx::Result<BallotRecord> {
        debug!(
            "Inserting ballot: user {} poll {} option {}",
            user_id, poll_id, option_id
        );

        let rows = sqlx::query_as::<_, BallotRecord>(INSERT_BALLOT_SQL)
            .bind(user_id)
            .bind(poll_id)
            .bind(option_id)
            .fetch_all(pool)
            .await?;
        single_row(rows)
    }

    pub async fn get(
        pool: &SqlitePool,
        user_id: &str,
        poll_id: PollId,
    ) -> sqlx::Result<Option<BallotRecord>> {
        let sql = format!(
            "SELECT {} FROM ballots WHERE user_id = ? AND poll_id = ?",
            BALLOT_COLUMNS
        );
        sqlx::query_as::<_, BallotRecord>(&sql)
            .bind(user_id)
            .bind(poll_id)
            .fetch_optional(pool)
            .await
    }

    /// Get all ballots cast by a user, most recently changed first
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> sqlx::Result<Vec<BallotRecord>> {
        let sql = format!(
            "SELECT {} FROM ballots WHERE user_id = ? ORDER BY updated_at DESC, poll_id",
            BALLOT_COLUMNS
        );
        sqlx::query_as::<_, BallotRecord>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Get all ballots of a poll
    pub async fn list_for_poll(
        pool: &SqlitePool,
        poll_id: PollId,
    ) -> sqlx::Result<Vec<BallotRecord>> {
        let sql = format!(
            "SELECT {} FROM ballots WHERE poll_id = ? ORDER BY created_at, user_id",
            BALLOT_COLUMNS
        );
        sqlx::query_as::<_, BallotRecord>(&sql)
            .bind(poll_id)
            .fetch_all(pool)
            .await
    }

    /// Ballot counts per option of a poll. Options without ballots are absent.
    pub async fn counts_by_option(
        pool: &SqlitePool,
        poll_id: PollId,
    ) -> sqlx::Result<HashMap<OptionId, u64>> {
        let rows: Vec<(OptionId, i64)> = sqlx::query_as(COUNTS_BY_OPTION_SQL)
            .bind(poll_id)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(option_id, votes)| (option_id, votes.max(0) as u64))
            .collect())
    }
}

/// Database operations for polls
impl PollRecord {
    /// Insert a poll and its options (in the given order) in one transaction
    pub async fn insert_with_options(
        pool: &SqlitePool,
        question: &str,
        creator_id: &str,
        is_published: bool,
        options: &[String],
    ) -> sqlx::Result<(PollRecord, Vec<PollOptionRecord>)> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = pool.begin().await?;

        let insert_poll = format!(
            "INSERT INTO polls (question, creator_id, is_published, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {}",
            POLL_COLUMNS
        );
        let poll = sqlx::query_as::<_, PollRecord>(&insert_poll)
            .bind(question)
            .bind(creator_id)
            .bind(is_published)
            .bind(&now)
            .bind(&now)
            .fetch_all(&mut *tx)
            .await
            .and_then(single_row)?;

        let mut records = Vec::with_capacity(options.len());
        for (position, text) in options.iter().enumerate() {
            let option = sqlx::query_as::<_, PollOptionRecord>(
                "INSERT INTO poll_options (poll_id, position, text) VALUES (?, ?, ?) \
                 RETURNING id, poll_id, position, text",
            )
            .bind(poll.id)
            .bind(position as i64)
            .bind(text)
            .fetch_all(&mut *tx)
            .await
            .and_then(single_row)?;
            records.push(option);
        }

        tx.commit().await?;

        debug!("Inserted poll {} with {} options", poll.id, records.len());
        Ok((poll, records))
    }

    pub async fn get(pool: &SqlitePool, poll_id: PollId) -> sqlx::Result<Option<PollRecord>> {
        let sql = format!("SELECT {} FROM polls WHERE id = ?", POLL_COLUMNS);
        sqlx::query_as::<_, PollRecord>(&sql)
            .bind(poll_id)
            .fetch_optional(pool)
            .await
    }

    /// Get all published polls, newest first
    pub async fn list_published(pool: &SqlitePool) -> sqlx::Result<Vec<PollRecord>> {
        let sql = format!(
            "SELECT {} FROM polls WHERE is_published = 1 ORDER BY created_at DESC, id DESC",
            POLL_COLUMNS
        );
        sqlx::query_as::<_, PollRecord>(&sql).fetch_all(pool).await
    }

    pub async fn update_question(
        pool: &SqlitePool,
        poll_id: PollId,
        question: &str,
    ) -> sqlx::Result<Option<PollRecord>> {
        let sql = format!(
            "UPDATE polls SET question = ?, updated_at = ? WHERE id = ? RETURNING {}",
            POLL_COLUMNS
        );
        sqlx::query_as::<_, PollRecord>(&sql)
            .bind(question)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(poll_id)
            .fetch_all(pool)
            .await
            .map(|rows| rows.into_iter().next())
    }

    pub async fn publish(pool: &SqlitePool, poll_id: PollId) -> sqlx::Result<Option<PollRecord>> {
        let sql = format!(
            "UPDATE polls SET is_published = 1, updated_at = ? WHERE id = ? RETURNING {}",
            POLL_COLUMNS
        );
        sqlx::query_as::<_, PollRecord>(&sql)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(poll_id)
            .fetch_all(pool)
            .await
            .map(|rows| rows.into_iter().next())
    }

    /// Delete a poll; its options and ballots go with it. Returns false if absent.
    pub async fn delete(pool: &SqlitePool, poll_id: PollId) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM polls WHERE id = ?")
            .bind(poll_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Database operations for poll options
impl PollOptionRecord {
    /// Options of a poll in definition order
    pub async fn list_for_poll(
        pool: &SqlitePool,
        poll_id: PollId,
    ) -> sqlx::Result<Vec<PollOptionRecord>> {
        sqlx::query_as::<_, PollOptionRecord>(
            "SELECT id, poll_id, position, text FROM poll_options \
             WHERE poll_id = ? ORDER BY position",
        )
        .bind(poll_id)
        .fetch_all(pool)
        .await
    }

    pub async fn get(
        pool: &SqlitePool,
        option_id: OptionId,
    ) -> sqlx::Result<Option<PollOptionRecord>> {
        sqlx::query_as::<_, PollOptionRecord>(
            "SELECT id, poll_id, position, text FROM poll_options WHERE id = ?",
        )
        .bind(option_id)
        .fetch_optional(pool)
        .await
    }
}
