use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::bookmark::render::AttachmentNumbering;
use crate::bookmark::{Glyphs, Settings, Strategy};

const DEFAULT_DB_PATH: &str = "./bookmarks.db";
const DEFAULT_API_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RESERVATION_TTL_SECS: u64 = 120;

/// Central configuration loaded from environment variables.
///
/// The bot token comes from the environment only (never hardcoded). The
/// .env file is loaded automatically at startup via dotenvy.
pub struct Config {
    pub discord_token: String,
    /// REST endpoint (defaults to https://discord.com/api/v10)
    pub api_url: String,
    pub gateway_url: String,
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    pub strategy: Strategy,
    pub glyphs: Glyphs,
    pub numbering: AttachmentNumbering,
    pub api_timeout: Duration,
    pub reservation_ttl: Duration,
    /// Append logs here instead of stderr
    pub log_file: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the token, which only `run` needs.
    pub fn load() -> Result<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Empty values count as unset
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let strategy = match var("DOGEAR_STRATEGY") {
            Some(s) => s
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid DOGEAR_STRATEGY")?,
            None => Strategy::default(),
        };
        let numbering = match var("DOGEAR_ATTACHMENT_NUMBERING") {
            Some(s) => s
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid DOGEAR_ATTACHMENT_NUMBERING")?,
            None => AttachmentNumbering::default(),
        };

        let defaults = Glyphs::default();
        let glyphs = Glyphs {
            bookmark: var("DOGEAR_BOOKMARK_EMOJI").unwrap_or(defaults.bookmark),
            delete: var("DOGEAR_DELETE_EMOJI").unwrap_or(defaults.delete),
        };
        if glyphs.bookmark == glyphs.delete {
            anyhow::bail!("DOGEAR_BOOKMARK_EMOJI and DOGEAR_DELETE_EMOJI must differ");
        }

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").unwrap_or_default(),
            api_url: var("DISCORD_API_URL")
                .unwrap_or_else(|| crate::discord::client::DEFAULT_API_URL.to_string()),
            gateway_url: var("DISCORD_GATEWAY_URL")
                .unwrap_or_else(|| crate::discord::gateway::DEFAULT_GATEWAY_URL.to_string()),
            db_path: var("DOGEAR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            database_url: var("DATABASE_URL"),
            strategy,
            glyphs,
            numbering,
            api_timeout: seconds(var("DOGEAR_API_TIMEOUT_SECS"), "DOGEAR_API_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS)?,
            reservation_ttl: seconds(
                var("DOGEAR_RESERVATION_TTL_SECS"),
                "DOGEAR_RESERVATION_TTL_SECS",
                DEFAULT_RESERVATION_TTL_SECS,
            )?,
            log_file: var("DOGEAR_LOG_FILE"),
        })
    }

    /// Check that the bot token is configured.
    /// Call this before connecting to Discord.
    pub fn require_token(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!(
                "DISCORD_TOKEN not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn settings(&self) -> Settings {
        Settings {
            strategy: self.strategy,
            glyphs: self.glyphs.clone(),
            numbering: self.numbering,
            api_timeout: self.api_timeout,
            reservation_ttl: self.reservation_ttl,
        }
    }
}

fn seconds(value: Option<String>, key: &str, default: u64) -> Result<Duration> {
    let secs = match value {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}"))?,
        None => default,
    };
    if secs == 0 {
        anyhow::bail!("{key} must be at least 1 second");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::load_from(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.db_path, "./bookmarks.db");
        assert_eq!(config.api_url, "https://discord.com/api/v10");
        assert_eq!(config.strategy, Strategy::Linked);
        assert_eq!(config.numbering, AttachmentNumbering::Sequential);
        assert_eq!(config.glyphs, Glyphs::default());
        assert_eq!(config.api_timeout, Duration::from_secs(10));
        assert_eq!(config.reservation_ttl, Duration::from_secs(120));
        assert!(config.database_url.is_none());
        assert!(config.log_file.is_none());
    }

    #[test]
    fn token_required_for_run() {
        assert!(load(&[]).unwrap().require_token().is_err());
        assert!(load(&[("DISCORD_TOKEN", "  ")]).unwrap().require_token().is_err());
        assert!(load(&[("DISCORD_TOKEN", "abc")]).unwrap().require_token().is_ok());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("DOGEAR_STRATEGY", "self-describing"),
            ("DOGEAR_ATTACHMENT_NUMBERING", "positional"),
            ("DOGEAR_BOOKMARK_EMOJI", "⭐"),
            ("DOGEAR_API_TIMEOUT_SECS", "3"),
            ("DATABASE_URL", "postgres://localhost/dogear"),
        ])
        .unwrap();
        assert_eq!(config.strategy, Strategy::SelfDescribing);
        assert_eq!(config.numbering, AttachmentNumbering::Positional);
        assert_eq!(config.glyphs.bookmark, "⭐");
        assert_eq!(config.glyphs.delete, "❌");
        assert_eq!(config.api_timeout, Duration::from_secs(3));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/dogear"));

        let settings = config.settings();
        assert_eq!(settings.strategy, Strategy::SelfDescribing);
        assert_eq!(settings.api_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("DOGEAR_STRATEGY", "hybrid")]).is_err());
        assert!(load(&[("DOGEAR_API_TIMEOUT_SECS", "ten")]).is_err());
        assert!(load(&[("DOGEAR_RESERVATION_TTL_SECS", "0")]).is_err());
        assert!(load(&[("DOGEAR_BOOKMARK_EMOJI", "❌")]).is_err());
    }
}
