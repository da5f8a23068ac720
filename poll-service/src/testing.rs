//! Fixtures shared by the unit tests

use std::path::{Path, PathBuf};

use rand::{distributions::Alphanumeric, Rng};
use sqlx::sqlite::SqlitePool;

use crate::database::{models::PollRecord, Database};
use crate::types::{OptionId, PollId};

/// File-backed database in the temp dir, removed on drop
pub struct TempDb {
    db: Database,
    path: PathBuf,
}

impl TempDb {
    pub async fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let path = std::env::temp_dir().join(format!("poll_test_{}.db", suffix));
        let db = Database::connect(path.to_str().unwrap(), 8).await.unwrap();
        Self { db, path }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

pub struct SeededPoll {
    pub id: PollId,
    pub options: Vec<OptionId>,
}

pub async fn seed_poll(pool: &SqlitePool, options: &[&str], published: bool) -> SeededPoll {
    let options: Vec<String> = options.iter().map(|o| o.to_string()).collect();
    let (poll, records) =
        PollRecord::insert_with_options(pool, "Which one?", "creator", published, &options)
            .await
            .unwrap();
    SeededPoll {
        id: poll.id,
        options: records.into_iter().map(|o| o.id).collect(),
    }
}
