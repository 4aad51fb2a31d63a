//! Telegram Bot API adapter for the forwarding engine.
//!
//! [`client::TelegramClient`] relays through `forwardMessages`/`copyMessage`,
//! [`bot::start_polling`] turns updates into engine messages and records
//! them in the [`archive::MessageArchive`] that backups read history from.

pub mod archive;
pub mod bot;
pub mod client;
pub mod error;
pub mod inbound;

pub use {
    archive::MessageArchive,
    client::TelegramClient,
    error::{Error, Result},
};

/// Run database migrations for the message archive.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
