use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    courier_config::{CourierConfig, StorageBackend},
    courier_forward::{
        store::ForwardStore, store_file::FileStore, store_memory::InMemoryStore,
        store_sqlite::SqliteStore,
    },
    courier_telegram::{MessageArchive, TelegramClient, bot::build_bot},
    tracing::debug,
};

const DB_FILE: &str = "courier.db";

/// SQLite URL for the configured database, defaulting to a file in the
/// data directory.
pub fn database_url(config: &CourierConfig) -> Result<String> {
    if let Some(url) = &config.storage.database_url {
        return Ok(url.clone());
    }
    let dir = data_dir(config)?;
    Ok(format!("sqlite:{}?mode=rwc", dir.join(DB_FILE).display()))
}

/// Data directory, created on first use.
pub fn data_dir(config: &CourierConfig) -> Result<PathBuf> {
    let dir = courier_config::data_dir(config);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    Ok(dir)
}

/// Open the store for `backend`, regardless of which one is configured.
pub async fn open_store(
    config: &CourierConfig,
    backend: StorageBackend,
) -> Result<Arc<dyn ForwardStore>> {
    debug!(%backend, "opening store");
    let store: Arc<dyn ForwardStore> = match backend {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::File => Arc::new(FileStore::new(data_dir(config)?)),
        StorageBackend::Sqlite => {
            let url = database_url(config)?;
            Arc::new(
                SqliteStore::new(&url)
                    .await
                    .with_context(|| format!("failed to open {url}"))?,
            )
        },
    };
    Ok(store)
}

/// Open the configured store.
pub async fn open_configured(config: &CourierConfig) -> Result<Arc<dyn ForwardStore>> {
    open_store(config, config.storage.backend).await
}

/// The message archive always lives in SQLite, next to the store when the
/// store is SQLite too.
pub async fn open_archive(config: &CourierConfig) -> Result<Arc<MessageArchive>> {
    let url = database_url(config)?;
    let archive = MessageArchive::new(&url)
        .await
        .with_context(|| format!("failed to open message archive at {url}"))?;
    Ok(Arc::new(archive))
}

/// Bot API client backed by the message archive.
pub async fn telegram_client(config: &CourierConfig) -> Result<Arc<TelegramClient>> {
    let bot = build_bot(&config.telegram)?;
    let archive = open_archive(config).await?;
    Ok(Arc::new(TelegramClient::new(bot, archive)))
}
