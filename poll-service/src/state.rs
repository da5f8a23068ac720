//! Shared application state and token management

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::broadcast::BroadcastDispatcher;
use crate::config::Config;
use crate::coordinator::VoteCoordinator;
use crate::database::Database;
use crate::directory::SqlitePollDirectory;
use crate::ledger::SqliteLedger;
use crate::subscription::SubscriptionRegistry;
use crate::utils::now_unix;

/// Bearer tokens issued by `POST /auth/token`, each bound to one user id
#[derive(Clone)]
pub struct TokenStore {
    tokens: Arc<Mutex<HashMap<String, TokenData>>>,
    ttl: Duration,
}

#[derive(Clone)]
struct TokenData {
    user_id: String,
    expires_at: u64,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenData>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create_token(&self, user_id: &str) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let data = TokenData {
            user_id: user_id.to_string(),
            expires_at: now_unix() + self.ttl.as_secs(),
        };
        self.lock().insert(token.clone(), data);
        token
    }

    /// User id the token was issued for, if it exists and hasn't expired
    pub fn resolve(&self, token: &str) -> Option<String> {
        let tokens = self.lock();
        let data = tokens.get(token)?;
        (now_unix() < data.expires_at).then(|| data.user_id.clone())
    }

    /// Drop expired tokens, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = now_unix();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, data| now < data.expires_at);
        before - tokens.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub directory: Arc<SqlitePollDirectory>,
    pub ledger: Arc<SqliteLedger>,
    pub registry: Arc<SubscriptionRegistry>,
    pub coordinator: VoteCoordinator,
    pub token_store: TokenStore,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        let directory = Arc::new(SqlitePollDirectory::new(db.pool().clone()));
        let ledger = Arc::new(SqliteLedger::new(db.pool().clone(), config.ledger_max_attempts));
        let registry = Arc::new(SubscriptionRegistry::new());
        let coordinator = VoteCoordinator::new(
            ledger.clone(),
            directory.clone(),
            BroadcastDispatcher::new(registry.clone()),
            config.vote_policy,
        );

        Self {
            token_store: TokenStore::new(config.token_ttl),
            config: Arc::new(config),
            db,
            directory,
            ledger,
            registry,
            coordinator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_resolves_to_its_user() {
        let store = TokenStore::new(Duration::from_secs(60));
        let token = store.create_token("alice");
        assert_eq!(store.resolve(&token).as_deref(), Some("alice"));
        assert_eq!(store.resolve("unknown"), None);
    }

    #[test]
    fn expired_tokens_are_rejected_and_purged() {
        let store = TokenStore::new(Duration::ZERO);
        let token = store.create_token("bob");
        assert_eq!(store.resolve(&token), None);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
