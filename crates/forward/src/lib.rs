//! Rule-driven message forwarding between chats.
//! Rules map a source chat to one target, optionally chaining further hops.
//! Albums are coalesced into one relay, outbound calls share an adaptive
//! throttle, and history backups checkpoint so they can resume.

pub mod backup;
pub mod batcher;
pub mod client;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod filter;
pub mod loop_detect;
pub mod migrate;
pub mod rate_limit;
pub mod rules;
pub mod stats;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod store_sqlite;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{Error, Result};

/// Run database migrations for the forward crate.
///
/// Creates the `forward_rules`, `backup_tasks` and `forward_stats` tables.
/// Called by [`store_sqlite::SqliteStore::new`]; call it yourself when
/// building the store from an existing pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
