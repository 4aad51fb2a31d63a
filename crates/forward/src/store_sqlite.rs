//! SQLite-backed store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Error, Result,
    store::ForwardStore,
    types::{BackupTask, ChatId, ForwardRule, StatsRecord},
};

/// SQLite-backed persistence. Records are stored as JSON in a `data` column
/// next to the indexed key columns.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    ///
    /// For shared pools use [`SqliteStore::with_pool`] after calling
    /// [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::external("failed to connect to SQLite", e))?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ForwardStore for SqliteStore {
    async fn get_rule(&self, source_id: ChatId) -> Result<Option<ForwardRule>> {
        let row = sqlx::query("SELECT data FROM forward_rules WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("data")))
            .transpose()
            .map_err(Into::into)
    }

    async fn set_rule(&self, source_id: ChatId, rule: &ForwardRule) -> Result<()> {
        let data = serde_json::to_string(rule)?;
        sqlx::query(
            "INSERT INTO forward_rules (source_id, target_id, paused, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(source_id) DO UPDATE SET
                target_id = excluded.target_id,
                paused = excluded.paused,
                data = excluded.data",
        )
        .bind(source_id)
        .bind(rule.target_id)
        .bind(rule.paused)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, source_id: ChatId) -> Result<()> {
        let result = sqlx::query("DELETE FROM forward_rules WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::rule_not_found(source_id));
        }
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<(ChatId, ForwardRule)>> {
        let rows = sqlx::query("SELECT source_id, data FROM forward_rules ORDER BY source_id")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("data");
            rules.push((row.get("source_id"), serde_json::from_str(&data)?));
        }
        Ok(rules)
    }

    async fn get_task(&self, id: &str) -> Result<Option<BackupTask>> {
        let row = sqlx::query("SELECT data FROM backup_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("data")))
            .transpose()
            .map_err(Into::into)
    }

    async fn save_task(&self, task: &BackupTask) -> Result<()> {
        let data = serde_json::to_string(task)?;
        sqlx::query(
            "INSERT INTO backup_tasks (id, source_id, status, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, data = excluded.data",
        )
        .bind(&task.id)
        .bind(task.source_id)
        .bind(task.status.as_str())
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM backup_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::task_not_found(id));
        }
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        let rows = sqlx::query("SELECT data FROM backup_tasks")
            .fetch_all(&self.pool)
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("data");
            tasks.push(serde_json::from_str::<BackupTask>(&data)?);
        }
        tasks.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    async fn get_stats(&self, date: &str, source_id: ChatId) -> Result<Option<StatsRecord>> {
        let row = sqlx::query(
            "SELECT date, source_id, total, counts FROM forward_stats
             WHERE date = ? AND source_id = ?",
        )
        .bind(date)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| stats_from_row(&r)).transpose()
    }

    async fn save_stats(&self, record: &StatsRecord) -> Result<()> {
        let counts = serde_json::to_string(&record.counts)?;
        sqlx::query(
            "INSERT INTO forward_stats (date, source_id, total, counts) VALUES (?, ?, ?, ?)
             ON CONFLICT(date, source_id) DO UPDATE SET
                total = excluded.total,
                counts = excluded.counts",
        )
        .bind(&record.date)
        .bind(record.source_id)
        .bind(record.total as i64)
        .bind(&counts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_stats(&self) -> Result<Vec<StatsRecord>> {
        let rows = sqlx::query(
            "SELECT date, source_id, total, counts FROM forward_stats ORDER BY date, source_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stats_from_row).collect()
    }
}

fn stats_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StatsRecord> {
    let counts: String = row.get("counts");
    Ok(StatsRecord {
        date: row.get("date"),
        source_id: row.get("source_id"),
        counts: serde_json::from_str(&counts)?,
        total: row.get::<i64, _>("total") as u64,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{BackupStatus, MediaKind, RuleOptions},
    };

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn rule_upsert_and_list() {
        let store = make_store().await;
        store.set_rule(100, &ForwardRule::new(200)).await.unwrap();

        let mut rule = ForwardRule::new(300);
        rule.options = RuleOptions::from_tags(["silent"]).unwrap();
        rule.paused = true;
        store.set_rule(100, &rule).await.unwrap();

        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].1.target_id, 300);
        assert!(rules[0].1.options.silent);
        assert!(rules[0].1.paused);
    }

    #[tokio::test]
    async fn rule_delete_not_found() {
        let store = make_store().await;
        assert!(store.delete_rule(1).await.unwrap_err().is_not_found());
        assert!(store.get_rule(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn task_roundtrip() {
        let store = make_store().await;
        let task = BackupTask {
            id: "t1".into(),
            source_id: 1,
            target_id: 2,
            status: BackupStatus::Failed,
            silent: true,
            total_messages: 120,
            processed_messages: 70,
            failed_messages: 1,
            last_message_id: Some(71),
            started_at_ms: 5,
            completed_at_ms: None,
            error: Some("boom".into()),
        };
        store.save_task(&task).await.unwrap();
        assert_eq!(store.get_task("t1").await.unwrap(), Some(task));
        store.delete_task("t1").await.unwrap();
        assert!(store.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_upsert() {
        let store = make_store().await;
        let mut record = StatsRecord::empty("2026-03-01", -100);
        record.add(MediaKind::Photo, 1);
        store.save_stats(&record).await.unwrap();
        record.add(MediaKind::Text, 2);
        store.save_stats(&record).await.unwrap();

        let all = store.list_stats().await.unwrap();
        assert_eq!(all, vec![record]);
    }
}
