//! Poll directory: the read-only view of polls the vote path depends on.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::database::models::{PollOptionRecord, PollRecord};
use crate::types::{OptionId, PollId};

/// What voting needs to know about a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutline {
    pub poll_id: PollId,
    pub published: bool,
    /// Option ids in definition order
    pub option_ids: Vec<OptionId>,
}

impl PollOutline {
    pub fn has_option(&self, option_id: OptionId) -> bool {
        self.option_ids.contains(&option_id)
    }
}

#[async_trait]
pub trait PollDirectory: Send + Sync {
    async fn outline(&self, poll_id: PollId) -> Result<Option<PollOutline>, sqlx::Error>;

    /// Poll that owns an option, if the option exists
    async fn poll_of_option(&self, option_id: OptionId) -> Result<Option<PollId>, sqlx::Error>;
}

#[derive(Clone)]
pub struct SqlitePollDirectory {
    pool: SqlitePool,
}

impl SqlitePollDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollDirectory for SqlitePollDirectory {
    async fn outline(&self, poll_id: PollId) -> Result<Option<PollOutline>, sqlx::Error> {
        let Some(poll) = PollRecord::get(&self.pool, poll_id).await? else {
            return Ok(None);
        };
        let options = PollOptionRecord::list_for_poll(&self.pool, poll_id).await?;

        Ok(Some(PollOutline {
            poll_id: poll.id,
            published: poll.is_published,
            option_ids: options.into_iter().map(|o| o.id).collect(),
        }))
    }

    async fn poll_of_option(&self, option_id: OptionId) -> Result<Option<PollId>, sqlx::Error> {
        Ok(PollOptionRecord::get(&self.pool, option_id)
            .await?
            .map(|o| o.poll_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_poll, TempDb};

    #[tokio::test]
    async fn outline_keeps_definition_order() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["Zebra", "Apple", "Mango"], false).await;
        let directory = SqlitePollDirectory::new(db.pool().clone());

        let outline = directory.outline(poll.id).await.unwrap().unwrap();
        assert_eq!(outline.option_ids, poll.options);
        assert!(!outline.published);
        assert!(outline.has_option(poll.options[2]));

        assert_eq!(
            directory.poll_of_option(poll.options[1]).await.unwrap(),
            Some(poll.id)
        );
        assert_eq!(directory.outline(poll.id + 100).await.unwrap(), None);
        assert_eq!(directory.poll_of_option(-1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn poll_updates_are_visible_to_the_next_outline() {
        let db = TempDb::new().await;
        let poll = seed_poll(db.pool(), &["A", "B"], false).await;
        let directory = SqlitePollDirectory::new(db.pool().clone());

        for _ in 0..10 {
            let renamed = PollRecord::update_question(db.pool(), poll.id, "Renamed?")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(renamed.question, "Renamed?");
        }
        let published = PollRecord::publish(db.pool(), poll.id).await.unwrap().unwrap();
        assert!(published.is_published);

        let outline = directory.outline(poll.id).await.unwrap().unwrap();
        assert!(outline.published);
        let stored = PollRecord::get(db.pool(), poll.id).await.unwrap().unwrap();
        assert_eq!(stored.question, "Renamed?");

        assert_eq!(PollRecord::publish(db.pool(), poll.id + 100).await.unwrap(), None);
    }
}
