//! Service configuration read from the environment

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::coordinator::VotePolicy;
use crate::database::constants::DEFAULT_DB_PATH;
use crate::database::path::parse_db_path;
use crate::ledger::DEFAULT_MAX_WRITE_ATTEMPTS;
use crate::utils::{env_parse, env_string};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    /// Shared secret required by `POST /auth/token`. Token issuance is
    /// disabled when unset.
    pub auth_secret: Option<String>,
    pub token_ttl: Duration,
    /// Guards `/admin/stats`. The endpoint is disabled when unset.
    pub metrics_token: Option<String>,
    pub vote_policy: VotePolicy,
    pub ledger_max_attempts: u32,
    pub db_max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            port: DEFAULT_PORT,
            auth_secret: None,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            metrics_token: None,
            vote_policy: VotePolicy::default(),
            ledger_max_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db_path = env_string("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        parse_db_path(&db_path).with_context(|| format!("Invalid DB_PATH '{}'", db_path))?;

        let vote_policy = match env_string("VOTE_POLICY") {
            Some(raw) => raw.parse().context("Invalid VOTE_POLICY")?,
            None => VotePolicy::default(),
        };

        let ledger_max_attempts = env_parse("LEDGER_MAX_ATTEMPTS", DEFAULT_MAX_WRITE_ATTEMPTS);
        if ledger_max_attempts == 0 {
            bail!("LEDGER_MAX_ATTEMPTS must be at least 1");
        }

        let db_max_connections = env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1);

        Ok(Self {
            db_path,
            port: env_parse("PORT", DEFAULT_PORT),
            auth_secret: env_string("AUTH_SECRET"),
            token_ttl: Duration::from_secs(env_parse("TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)),
            metrics_token: env_string("METRICS_AUTH_TOKEN"),
            vote_policy,
            ledger_max_attempts,
            db_max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &[
        "DB_PATH",
        "PORT",
        "AUTH_SECRET",
        "TOKEN_TTL_SECS",
        "METRICS_AUTH_TOKEN",
        "VOTE_POLICY",
        "LEDGER_MAX_ATTEMPTS",
        "DB_MAX_CONNECTIONS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial_test::serial]
    fn defaults_when_unset() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, DEFAULT_DB_PATH);
        assert_eq!(config.port, 3000);
        assert_eq!(config.vote_policy, VotePolicy::Overwrite);
        assert_eq!(config.ledger_max_attempts, 3);
        assert!(config.auth_secret.is_none());
        assert_eq!(config.token_ttl, Duration::from_secs(86_400));
    }

    #[test]
    #[serial_test::serial]
    fn reads_overrides() {
        clear_env();
        std::env::set_var("DB_PATH", ":memory:");
        std::env::set_var("PORT", "8088");
        std::env::set_var("AUTH_SECRET", "s3cret");
        std::env::set_var("VOTE_POLICY", "create_only");
        std::env::set_var("LEDGER_MAX_ATTEMPTS", "5");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.db_path, ":memory:");
        assert_eq!(config.port, 8088);
        assert_eq!(config.auth_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.vote_policy, VotePolicy::CreateOnly);
        assert_eq!(config.ledger_max_attempts, 5);
    }

    #[test]
    #[serial_test::serial]
    fn rejects_bad_values() {
        clear_env();
        std::env::set_var("VOTE_POLICY", "first_wins");
        assert!(Config::from_env().is_err());
        clear_env();

        std::env::set_var("DB_PATH", "../escape.db");
        assert!(Config::from_env().is_err());
        clear_env();

        std::env::set_var("LEDGER_MAX_ATTEMPTS", "0");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
