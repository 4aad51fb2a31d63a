//! JSON file-backed store with atomic writes.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    serde::{Serialize, de::DeserializeOwned},
    tokio::{fs, sync::Mutex},
};

use crate::{
    Error, Result,
    store::ForwardStore,
    types::{BackupTask, ChatId, ForwardRule, StatsRecord},
};

/// File-backed store. One JSON document per namespace under `dir`:
/// `rules.json` (map source → rule), `tasks.json` and `stats.json`.
pub struct FileStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles within the process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn rules_path(&self) -> PathBuf {
        self.dir.join("rules.json")
    }

    fn tasks_path(&self) -> PathBuf {
        self.dir.join("tasks.json")
    }

    fn stats_path(&self) -> PathBuf {
        self.dir.join("stats.json")
    }

    async fn read_doc<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(T::default());
        }
        let data = fs::read_to_string(path).await?;
        if data.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&data).map_err(|e| Error::external(path.display().to_string(), e))
    }

    /// Atomic write: write to temp, keep the previous file as `.bak`, rename
    /// over target.
    async fn write_doc<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(path).await.unwrap_or(false) {
            let bak = path.with_extension("json.bak");
            let _ = fs::copy(path, &bak).await;
        }

        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn load_rules(&self) -> Result<BTreeMap<ChatId, ForwardRule>> {
        Self::read_doc(&self.rules_path()).await
    }

    async fn load_tasks(&self) -> Result<Vec<BackupTask>> {
        Self::read_doc(&self.tasks_path()).await
    }

    async fn load_stats(&self) -> Result<Vec<StatsRecord>> {
        Self::read_doc(&self.stats_path()).await
    }
}

#[async_trait]
impl ForwardStore for FileStore {
    async fn get_rule(&self, source_id: ChatId) -> Result<Option<ForwardRule>> {
        Ok(self.load_rules().await?.remove(&source_id))
    }

    async fn set_rule(&self, source_id: ChatId, rule: &ForwardRule) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut rules = self.load_rules().await?;
        rules.insert(source_id, rule.clone());
        self.write_doc(&self.rules_path(), &rules).await
    }

    async fn delete_rule(&self, source_id: ChatId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut rules = self.load_rules().await?;
        if rules.remove(&source_id).is_none() {
            return Err(Error::rule_not_found(source_id));
        }
        self.write_doc(&self.rules_path(), &rules).await
    }

    async fn list_rules(&self) -> Result<Vec<(ChatId, ForwardRule)>> {
        Ok(self.load_rules().await?.into_iter().collect())
    }

    async fn get_task(&self, id: &str) -> Result<Option<BackupTask>> {
        Ok(self.load_tasks().await?.into_iter().find(|t| t.id == id))
    }

    async fn save_task(&self, task: &BackupTask) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        self.write_doc(&self.tasks_path(), &tasks).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(Error::task_not_found(id));
        }
        self.write_doc(&self.tasks_path(), &tasks).await
    }

    async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        let mut tasks = self.load_tasks().await?;
        tasks.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    async fn get_stats(&self, date: &str, source_id: ChatId) -> Result<Option<StatsRecord>> {
        Ok(self
            .load_stats()
            .await?
            .into_iter()
            .find(|r| r.date == date && r.source_id == source_id))
    }

    async fn save_stats(&self, record: &StatsRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut stats = self.load_stats().await?;
        match stats
            .iter_mut()
            .find(|r| r.date == record.date && r.source_id == record.source_id)
        {
            Some(existing) => *existing = record.clone(),
            None => stats.push(record.clone()),
        }
        stats.sort_by(|a, b| (&a.date, a.source_id).cmp(&(&b.date, b.source_id)));
        self.write_doc(&self.stats_path(), &stats).await
    }

    async fn list_stats(&self) -> Result<Vec<StatsRecord>> {
        self.load_stats().await
    }
}
