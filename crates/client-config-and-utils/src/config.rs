//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://instaclone.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "public-anon-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Table holding feed posts.
pub const DEFAULT_POSTS_TABLE: &str = "posts";

const ENV_LOG_LEVEL: &str = "INSTACLONE_LOG_LEVEL";
const ENV_SUPABASE_URL: &str = "INSTACLONE_SUPABASE_URL";
const ENV_SUPABASE_KEY: &str = "INSTACLONE_SUPABASE_KEY";

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Table the feed reads from and subscribes to.
    #[serde(default = "default_posts_table")]
    pub posts_table: String,
    /// Realtime heartbeat interval.
    #[serde(default = "default_heartbeat_secs")]
    pub realtime_heartbeat_secs: u64,
    /// How long the feed waits for its live subscription to become active.
    #[serde(default = "default_subscribe_timeout_secs")]
    pub subscribe_timeout_secs: u64,
    /// Reconnect attempts after a live subscription drops (0 disables).
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_posts_table() -> String {
    DEFAULT_POSTS_TABLE.to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_subscribe_timeout_secs() -> u64 {
    10
}

fn default_reconnect_max_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            posts_table: default_posts_table(),
            realtime_heartbeat_secs: default_heartbeat_secs(),
            subscribe_timeout_secs: default_subscribe_timeout_secs(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from the config file (if any), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from an environment lookup.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe a configured URL.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(url) = non_empty(ENV_SUPABASE_URL) {
            self.supabase_url = url;
        }
        if let Some(key) = non_empty(ENV_SUPABASE_KEY) {
            self.supabase_publishable_key = key;
        }
    }

    /// Reject configurations the gateway cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        self.supabase_url()?;
        if self.posts_table.trim().is_empty() {
            return Err(CoreError::Config("posts_table must not be empty".to_string()));
        }
        if self.realtime_heartbeat_secs == 0 {
            return Err(CoreError::Config(
                "realtime_heartbeat_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    pub fn realtime_heartbeat(&self) -> Duration {
        Duration::from_secs(self.realtime_heartbeat_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }
}
