use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://smartchat.db";
pub const DEFAULT_FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Memory,
    Sqlite {
        database_url: String,
    },
    Firestore {
        project_id: String,
        endpoint: String,
        poll_interval: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    /// Base url the OAuth providers redirect back to.
    pub public_url: String,
    pub client_secret_path: PathBuf,
    pub backend: Backend,
    pub session_inactivity: time::Duration,
}

impl Config {
    /// Reads the configuration from the process environment, loading `.env` first.
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_owned());

        let backend = match or("CHAT_BACKEND", "memory").as_str() {
            "memory" => Backend::Memory,
            "sqlite" => Backend::Sqlite {
                database_url: or("DATABASE_URL", DEFAULT_DATABASE_URL),
            },
            "firestore" => Backend::Firestore {
                project_id: var("FIRESTORE_PROJECT_ID")
                    .ok_or_else(|| anyhow!("FIRESTORE_PROJECT_ID is required for the firestore backend"))?,
                endpoint: or("FIRESTORE_ENDPOINT", DEFAULT_FIRESTORE_ENDPOINT)
                    .trim_end_matches('/')
                    .to_owned(),
                poll_interval: Duration::from_millis(
                    or("FIRESTORE_POLL_MS", "1000")
                        .parse()
                        .context("FIRESTORE_POLL_MS")?,
                ),
            },
            other => bail!("unknown CHAT_BACKEND {other:?}"),
        };

        let minutes: i64 = or("SESSION_INACTIVITY_MINUTES", "60")
            .parse()
            .context("SESSION_INACTIVITY_MINUTES")?;

        Ok(Config {
            bind_addr: or("BIND_ADDR", DEFAULT_BIND_ADDR),
            public_url: or("PUBLIC_URL", DEFAULT_PUBLIC_URL)
                .trim_end_matches('/')
                .to_owned(),
            client_secret_path: or("CLIENT_SECRET_PATH", "client_secret.json").into(),
            backend,
            session_inactivity: time::Duration::minutes(minutes),
        })
    }
}
