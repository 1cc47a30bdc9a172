//! Runtime settings read from the environment (and `.env`, if present).

use std::time::Duration;

use anyhow::{Context, bail};

use crate::coordinator::DEFAULT_STORE_TIMEOUT;

/// An account created at startup when it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Origins allowed to make credentialed requests. Empty mirrors the
    /// request origin.
    pub allowed_origins: Vec<String>,
    pub session_minutes: i64,
    pub store_timeout: Duration,
    pub seed_users: Vec<SeedUser>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://duochat.db?mode=rwc".to_owned(),
            bind_addr: "0.0.0.0:8080".to_owned(),
            allowed_origins: Vec::new(),
            session_minutes: 60,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            seed_users: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(url) = dotenv::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(addr) = dotenv::var("DUOCHAT_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(origins) = dotenv::var("DUOCHAT_ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Ok(minutes) = dotenv::var("DUOCHAT_SESSION_MINUTES") {
            config.session_minutes = minutes
                .trim()
                .parse()
                .with_context(|| format!("DUOCHAT_SESSION_MINUTES is not a number: {minutes}"))?;
        }
        if let Ok(millis) = dotenv::var("DUOCHAT_STORE_TIMEOUT_MS") {
            let millis: u64 = millis
                .trim()
                .parse()
                .with_context(|| format!("DUOCHAT_STORE_TIMEOUT_MS is not a number: {millis}"))?;
            config.store_timeout = Duration::from_millis(millis);
        }
        if let Ok(seeds) = dotenv::var("DUOCHAT_SEED_USERS") {
            config.seed_users = parse_seed_users(&seeds)?;
        }

        Ok(config)
    }
}

/// Parses `username:password[:Display Name]` entries separated by `;`.
pub fn parse_seed_users(raw: &str) -> anyhow::Result<Vec<SeedUser>> {
    let mut seeds = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
        let mut parts = entry.splitn(3, ':');
        let username = parts.next().unwrap_or_default().trim();
        let Some(password) = parts.next() else {
            bail!("seed user `{entry}` has no password");
        };
        if username.is_empty() || password.is_empty() {
            bail!("seed user `{entry}` needs both a username and a password");
        }
        let display_name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);

        seeds.push(SeedUser {
            username: username.to_owned(),
            password: password.to_owned(),
            display_name,
        });
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_users_with_and_without_names() {
        let seeds = parse_seed_users("jay:secret:Jay Patel; bhautik:hunter2 ;").unwrap();
        assert_eq!(
            seeds,
            vec![
                SeedUser { username: "jay".into(), password: "secret".into(), display_name: Some("Jay Patel".into()) },
                SeedUser { username: "bhautik".into(), password: "hunter2".into(), display_name: None },
            ]
        );
    }

    #[test]
    fn seed_user_without_password_is_rejected() {
        assert!(parse_seed_users("jay").is_err());
        assert!(parse_seed_users(":pw").is_err());
    }
}
