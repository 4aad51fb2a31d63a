//! One-time copy of every record from one backend to another.

use {serde::Serialize, tracing::info};

use crate::{Result, store::ForwardStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub rules: usize,
    pub tasks: usize,
    pub stats: usize,
}

/// Copy rules, backup tasks and stats from `from` into `to`. Existing
/// records in `to` with the same key are overwritten; `from` is untouched.
pub async fn migrate_store(
    from: &dyn ForwardStore,
    to: &dyn ForwardStore,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for (source_id, rule) in from.list_rules().await? {
        to.set_rule(source_id, &rule).await?;
        report.rules += 1;
    }
    for task in from.list_tasks().await? {
        to.save_task(&task).await?;
        report.tasks += 1;
    }
    for record in from.list_stats().await? {
        to.save_stats(&record).await?;
        report.stats += 1;
    }

    info!(
        rules = report.rules,
        tasks = report.tasks,
        stats = report.stats,
        "store migrated"
    );
    Ok(report)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            store_file::FileStore,
            store_sqlite::SqliteStore,
            types::{BackupStatus, BackupTask, ForwardRule, MediaKind, StatsRecord},
        },
    };

    async fn seeded_file_store(dir: &std::path::Path) -> FileStore {
        let store = FileStore::new(dir);
        store.set_rule(1, &ForwardRule::new(2)).await.unwrap();
        store.set_rule(3, &ForwardRule::new(4)).await.unwrap();
        store
            .save_task(&BackupTask {
                id: "t1".into(),
                source_id: 1,
                target_id: 9,
                status: BackupStatus::Running,
                silent: false,
                total_messages: 10,
                processed_messages: 4,
                failed_messages: 0,
                last_message_id: Some(4),
                started_at_ms: 1,
                completed_at_ms: None,
                error: None,
            })
            .await
            .unwrap();
        let mut record = StatsRecord::empty("2026-01-01", 1);
        record.add(MediaKind::Photo, 3);
        store.save_stats(&record).await.unwrap();
        store
    }

    #[tokio::test]
    async fn file_to_sqlite_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let from = seeded_file_store(dir.path()).await;
        let to = SqliteStore::new("sqlite::memory:").await.unwrap();

        let report = migrate_store(&from, &to).await.unwrap();

        assert_eq!(report, MigrationReport {
            rules: 2,
            tasks: 1,
            stats: 1
        });
        assert_eq!(to.list_rules().await.unwrap(), from.list_rules().await.unwrap());
        assert_eq!(to.get_task("t1").await.unwrap().unwrap().last_message_id, Some(4));
        assert_eq!(
            to.get_stats("2026-01-01", 1).await.unwrap().unwrap().total,
            3
        );
    }

    #[tokio::test]
    async fn migrating_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let from = seeded_file_store(dir.path()).await;
        let to = SqliteStore::new("sqlite::memory:").await.unwrap();

        migrate_store(&from, &to).await.unwrap();
        migrate_store(&from, &to).await.unwrap();
        assert_eq!(to.list_rules().await.unwrap().len(), 2);
        assert_eq!(to.list_stats().await.unwrap().len(), 1);
    }
}
