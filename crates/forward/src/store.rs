//! Persistence trait for rules, backup tasks and stats.

use async_trait::async_trait;

use crate::{
    Result,
    types::{BackupTask, ChatId, ForwardRule, StatsRecord},
};

/// Persistence backend. One namespace per record kind; every operation is
/// atomic with respect to a single record.
#[async_trait]
pub trait ForwardStore: Send + Sync {
    async fn get_rule(&self, source_id: ChatId) -> Result<Option<ForwardRule>>;
    /// Insert or replace the rule for `source_id`.
    async fn set_rule(&self, source_id: ChatId, rule: &ForwardRule) -> Result<()>;
    /// Fails with `RuleNotFound` when no rule exists.
    async fn delete_rule(&self, source_id: ChatId) -> Result<()>;
    /// All rules, ordered by source id.
    async fn list_rules(&self) -> Result<Vec<(ChatId, ForwardRule)>>;

    async fn get_task(&self, id: &str) -> Result<Option<BackupTask>>;
    async fn save_task(&self, task: &BackupTask) -> Result<()>;
    /// Fails with `TaskNotFound` when no task exists.
    async fn delete_task(&self, id: &str) -> Result<()>;
    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<BackupTask>>;

    async fn get_stats(&self, date: &str, source_id: ChatId) -> Result<Option<StatsRecord>>;
    async fn save_stats(&self, record: &StatsRecord) -> Result<()>;
    /// All records, ordered by date then source.
    async fn list_stats(&self) -> Result<Vec<StatsRecord>>;
}
