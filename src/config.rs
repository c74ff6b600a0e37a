use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Central configuration loaded from environment variables.
///
/// Peer credentials are not configuration: they live in the `nodes` table
/// and are managed with `grapevine node add|remove`. The .env file is
/// loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// Base URL this node is reachable at; local author URLs hang off it.
    pub public_url: String,
    /// Bound on every outbound call to a peer node.
    pub http_timeout: Duration,
    /// Failed attempts before an outbox entry is dead-lettered.
    pub outbox_max_attempts: i64,
    /// How often the outbox worker drains due entries while serving.
    pub outbox_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "./grapevine.db".to_string(),
            public_url: "http://127.0.0.1:8000".to_string(),
            http_timeout: Duration::from_secs(5),
            outbox_max_attempts: 8,
            outbox_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default; malformed numbers are an error rather than
    /// silently falling back.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            db_path: env::var("GRAPEVINE_DB_PATH").unwrap_or(defaults.db_path),
            public_url: env::var("GRAPEVINE_PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_url),
            http_timeout: Duration::from_secs(env_parse("GRAPEVINE_HTTP_TIMEOUT_SECS", 5u64)?),
            outbox_max_attempts: env_parse("GRAPEVINE_OUTBOX_MAX_ATTEMPTS", 8i64)?,
            outbox_interval: Duration::from_secs(env_parse(
                "GRAPEVINE_OUTBOX_INTERVAL_SECS",
                30u64,
            )?),
        })
    }

    /// Check that the public URL is usable for building author URLs.
    /// Call this before registering authors or serving peers.
    pub fn require_public_url(&self) -> Result<()> {
        if !(self.public_url.starts_with("http://") || self.public_url.starts_with("https://")) {
            anyhow::bail!(
                "GRAPEVINE_PUBLIC_URL must be an http(s) URL, got {:?}.\n\
                 Set it in your .env file to the address peers reach this node at.",
                self.public_url
            );
        }
        Ok(())
    }

    /// Check the outbox settings make sense.
    pub fn require_outbox(&self) -> Result<()> {
        if self.outbox_max_attempts < 1 {
            anyhow::bail!("GRAPEVINE_OUTBOX_MAX_ATTEMPTS must be at least 1");
        }
        if self.outbox_interval.is_zero() {
            anyhow::bail!("GRAPEVINE_OUTBOX_INTERVAL_SECS must be at least 1");
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}
