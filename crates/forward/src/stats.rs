//! Daily relay counters per source chat and media kind.

use std::{collections::BTreeMap, sync::Arc};

use {chrono::Utc, tokio::sync::Mutex, tracing::debug};

use crate::{
    Result,
    store::ForwardStore,
    types::{ChatId, MediaKind, StatsRecord},
};

/// day -> source -> media label -> count.
pub type StatsExport = BTreeMap<String, BTreeMap<ChatId, BTreeMap<String, u64>>>;

/// Today's UTC date as `YYYY-MM-DD`.
#[must_use]
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

pub struct StatsRecorder {
    store: Arc<dyn ForwardStore>,
    /// Serializes read-modify-write within this process only.
    write_lock: Mutex<()>,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn ForwardStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Count one relayed message for `source_id` today.
    pub async fn record(&self, source_id: ChatId, media: MediaKind) -> Result<StatsRecord> {
        self.record_on(&today(), source_id, media, 1).await
    }

    pub async fn record_on(
        &self,
        date: &str,
        source_id: ChatId,
        media: MediaKind,
        count: u64,
    ) -> Result<StatsRecord> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .store
            .get_stats(date, source_id)
            .await?
            .unwrap_or_else(|| StatsRecord::empty(date, source_id));
        record.add(media, count);
        self.store.save_stats(&record).await?;
        debug!(date, source_id, media = %media, total = record.total, "stats recorded");
        Ok(record)
    }

    pub async fn get(&self, date: &str, source_id: ChatId) -> Result<Option<StatsRecord>> {
        self.store.get_stats(date, source_id).await
    }

    pub async fn export(&self) -> Result<StatsExport> {
        let mut export = StatsExport::new();
        for record in self.store.list_stats().await? {
            export
                .entry(record.date)
                .or_default()
                .insert(record.source_id, record.counts);
        }
        Ok(export)
    }
}
