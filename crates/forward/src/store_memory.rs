//! In-memory store for tests and dry runs.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::ForwardStore,
    types::{BackupTask, ChatId, ForwardRule, StatsRecord},
};

/// In-memory store backed by ordered maps. No persistence.
#[derive(Default)]
pub struct InMemoryStore {
    rules: Mutex<BTreeMap<ChatId, ForwardRule>>,
    tasks: Mutex<HashMap<String, BackupTask>>,
    stats: Mutex<BTreeMap<(String, ChatId), StatsRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ForwardStore for InMemoryStore {
    async fn get_rule(&self, source_id: ChatId) -> Result<Option<ForwardRule>> {
        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rules.get(&source_id).cloned())
    }

    async fn set_rule(&self, source_id: ChatId, rule: &ForwardRule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules.insert(source_id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, source_id: ChatId) -> Result<()> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules
            .remove(&source_id)
            .map(|_| ())
            .ok_or_else(|| Error::rule_not_found(source_id))
    }

    async fn list_rules(&self) -> Result<Vec<(ChatId, ForwardRule)>> {
        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rules.iter().map(|(id, r)| (*id, r.clone())).collect())
    }

    async fn get_task(&self, id: &str) -> Result<Option<BackupTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.get(id).cloned())
    }

    async fn save_task(&self, task: &BackupTask) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::task_not_found(id))
    }

    async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<BackupTask> = tasks.values().cloned().collect();
        all.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(all)
    }

    async fn get_stats(&self, date: &str, source_id: ChatId) -> Result<Option<StatsRecord>> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stats.get(&(date.to_string(), source_id)).cloned())
    }

    async fn save_stats(&self, record: &StatsRecord) -> Result<()> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.insert((record.date.clone(), record.source_id), record.clone());
        Ok(())
    }

    async fn list_stats(&self) -> Result<Vec<StatsRecord>> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stats.values().cloned().collect())
    }
}
