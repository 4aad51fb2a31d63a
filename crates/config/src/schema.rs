/// Config schema types (storage, telegram, forwarding, rate limiting, backup).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub storage: StorageConfig,
    pub telegram: TelegramConfig,
    pub forward: ForwardConfig,
    pub rate_limit: RateLimitConfig,
    pub backup: BackupConfig,
}

/// Which persistence backend holds rules, backup tasks and stats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Volatile, process-local. Useful for dry runs.
    Memory,
    /// JSON documents under `data_dir`.
    File,
    /// SQLite database at `database_url`.
    #[default]
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::File => f.write_str("file"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Overrides the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Overrides `sqlite:<data_dir>/courier.db?mode=rwc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// Telegram bot credentials and polling behaviour.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
    /// Long-polling timeout passed to `getUpdates` (seconds).
    pub poll_timeout_secs: u32,
    /// Channel capacity between the poller and the engine.
    pub inbound_buffer: usize,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl TelegramConfig {
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            poll_timeout_secs: 30,
            inbound_buffer: 256,
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Dispatcher, cache and batching knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwardConfig {
    /// How long a cached rule lookup stays valid.
    pub rule_cache_ttl_secs: u64,
    /// Debounce window for grouped (album) messages.
    pub group_debounce_ms: u64,
    /// Chained hops allowed after the initial relay.
    pub max_chain_depth: usize,
    /// Pause before continuing a chain so the relayed message lands first.
    pub chain_delay_ms: u64,
    /// Retries of the same item after a flood-wait before giving up on it.
    pub max_flood_retries: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            rule_cache_ttl_secs: 300,
            group_debounce_ms: 1_200,
            max_chain_depth: 5,
            chain_delay_ms: 1_000,
            max_flood_retries: 4,
        }
    }
}

/// Adaptive rate limiter parameters. All delays in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier applied after each success (< 1.0 speeds up).
    pub speedup_factor: f64,
    /// Safety margin applied to a platform flood-wait.
    pub flood_margin: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
            speedup_factor: 0.95,
            flood_margin: 1.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    /// History page size.
    pub batch_size: usize,
    /// Processed-message interval for progress callbacks.
    pub progress_every: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            progress_every: 10,
        }
    }
}
