//! Configuration loading, validation and env substitution for courier.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then `~/.config/courier/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{
        BackupConfig, CourierConfig, ForwardConfig, RateLimitConfig, StorageBackend,
        StorageConfig, TelegramConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_config},
};
