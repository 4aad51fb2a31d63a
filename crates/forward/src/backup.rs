//! Resumable replay of a chat's history into another chat.
//!
//! A task moves `pending -> running -> {completed, failed}`. The task is
//! saved after every relayed message, so an interrupted job restarts right
//! after the last one. `on_progress` fires every `progress_every` messages.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    courier_config::{BackupConfig, RateLimitConfig},
    tokio::task::JoinHandle,
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    client::{ClientError, ForwardClient, ForwardRequest},
    dispatcher::forward_with_retry,
    rate_limit::AdaptiveRateLimiter,
    store::ForwardStore,
    types::{BackupCreate, BackupStatus, BackupTask},
};

/// Callback receiving a snapshot of the task.
pub type TaskFn = Arc<dyn Fn(&BackupTask) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BackupCallbacks {
    /// Called every `progress_every` processed messages.
    pub on_progress: Option<TaskFn>,
    /// Called once the task reaches a terminal state.
    pub on_complete: Option<TaskFn>,
}

pub struct BackupManager {
    store: Arc<dyn ForwardStore>,
    client: Arc<dyn ForwardClient>,
    config: BackupConfig,
    rate_limit: RateLimitConfig,
    max_flood_retries: usize,
    callbacks: BackupCallbacks,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BackupManager {
    pub fn new(
        store: Arc<dyn ForwardStore>,
        client: Arc<dyn ForwardClient>,
        config: BackupConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
            rate_limit,
            max_flood_retries: 4,
            callbacks: BackupCallbacks::default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_max_flood_retries(mut self, max_flood_retries: usize) -> Self {
        self.max_flood_retries = max_flood_retries;
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: BackupCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Create and persist a pending task.
    pub async fn start_backup(&self, create: BackupCreate) -> Result<BackupTask> {
        if create.source_id == create.target_id {
            return Err(Error::message("backup source and target must differ"));
        }
        let task = BackupTask {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: create.source_id,
            target_id: create.target_id,
            status: BackupStatus::Pending,
            silent: create.silent,
            total_messages: 0,
            processed_messages: 0,
            failed_messages: 0,
            last_message_id: None,
            started_at_ms: crate::now_ms(),
            completed_at_ms: None,
            error: None,
        };
        self.store.save_task(&task).await?;
        info!(
            id = %task.id,
            source_id = task.source_id,
            target_id = task.target_id,
            "backup task created"
        );
        Ok(task)
    }

    pub async fn status(&self, task_id: &str) -> Result<BackupTask> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    pub async fn list(&self) -> Result<Vec<BackupTask>> {
        self.store.list_tasks().await
    }

    /// Abort the job if it is running and remove the task.
    pub async fn delete(&self, task_id: &str) -> Result<()> {
        if let Some(handle) = self.take_handle(task_id) {
            handle.abort();
        }
        self.store.delete_task(task_id).await?;
        info!(id = task_id, "backup task deleted");
        Ok(())
    }

    /// Load a task and run it from its checkpoint.
    pub async fn resume(&self, task_id: &str) -> Result<BackupTask> {
        let task = self.status(task_id).await?;
        self.execute_backup(task).await
    }

    /// Run `task` to a terminal state. Completed tasks are rejected.
    ///
    /// Platform failures end up in the returned task (`failed` status or
    /// `failed_messages`); only store errors are returned as `Err`, leaving
    /// the task resumable from its last checkpoint.
    pub async fn execute_backup(&self, mut task: BackupTask) -> Result<BackupTask> {
        if task.status == BackupStatus::Completed {
            return Err(Error::message(format!(
                "backup task {} is already completed",
                task.id
            )));
        }

        task.status = BackupStatus::Running;
        task.error = None;
        task.completed_at_ms = None;
        match self.client.history_count(task.source_id).await {
            Ok(Some(count)) => task.total_messages = count,
            Ok(None) => {},
            Err(e) => debug!(id = %task.id, error = %e, "history count unavailable"),
        }
        self.store.save_task(&task).await?;
        info!(
            id = %task.id,
            after = ?task.last_message_id,
            total = task.total_messages,
            "backup running"
        );

        let limiter = AdaptiveRateLimiter::new(self.rate_limit.clone());
        let batch_size = self.config.batch_size.max(1);
        let progress_every = self.config.progress_every.max(1);
        // Advances past failed items too, so paging never stalls on one.
        let mut cursor = task.last_message_id;

        loop {
            let page = match self
                .client
                .list_history(task.source_id, cursor, batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => return self.fail(task, e).await,
            };
            if page.is_empty() {
                break;
            }

            for message in page {
                cursor = Some(message.message_id);
                let request = ForwardRequest {
                    from_chat: task.source_id,
                    to_chat: task.target_id,
                    message_ids: vec![message.message_id],
                    silent: task.silent,
                    reply_to: None,
                };
                match forward_with_retry(
                    self.client.as_ref(),
                    &limiter,
                    &request,
                    self.max_flood_retries,
                )
                .await
                {
                    Ok(_) => {
                        task.processed_messages += 1;
                        task.last_message_id = Some(message.message_id);
                        track_total(&mut task);
                        self.store.save_task(&task).await?;
                        if task.processed_messages % progress_every == 0 {
                            self.report_progress(&task);
                        }
                    },
                    Err(e @ ClientError::ContentProtected { .. }) => {
                        return self.fail(task, e).await;
                    },
                    Err(e) => {
                        task.failed_messages += 1;
                        track_total(&mut task);
                        warn!(
                            id = %task.id,
                            message_id = message.message_id,
                            error = %e,
                            "backup item failed, skipping"
                        );
                    },
                }
            }
        }

        task.status = BackupStatus::Completed;
        task.completed_at_ms = Some(crate::now_ms());
        self.store.save_task(&task).await?;
        info!(
            id = %task.id,
            processed = task.processed_messages,
            failed = task.failed_messages,
            "backup completed"
        );
        self.notify_complete(&task);
        Ok(task)
    }

    fn report_progress(&self, task: &BackupTask) {
        if let Some(cb) = &self.callbacks.on_progress {
            cb(task);
        }
        debug!(
            id = %task.id,
            processed = task.processed_messages,
            total = task.total_messages,
            "backup progress"
        );
    }

    async fn fail(&self, mut task: BackupTask, cause: ClientError) -> Result<BackupTask> {
        task.status = BackupStatus::Failed;
        task.error = Some(cause.to_string());
        task.completed_at_ms = Some(crate::now_ms());
        self.store.save_task(&task).await?;
        error!(id = %task.id, error = %cause, "backup failed");
        self.notify_complete(&task);
        Ok(task)
    }

    fn notify_complete(&self, task: &BackupTask) {
        if let Some(cb) = &self.callbacks.on_complete {
            cb(task);
        }
    }

    // ── Background jobs ─────────────────────────────────────────────────

    /// Run the task in the background. At most one job per task id.
    pub fn spawn(self: &Arc<Self>, task_id: &str) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.retain(|_, handle| !handle.is_finished());
        if running.contains_key(task_id) {
            return Err(Error::message(format!(
                "backup task {task_id} is already running"
            )));
        }

        let manager = Arc::clone(self);
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.resume(&id).await {
                error!(id = %id, error = %e, "backup job aborted");
            }
        });
        running.insert(task_id.to_string(), handle);
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.get(task_id).is_some_and(|h| !h.is_finished())
    }

    /// Wait for a spawned job to finish. No-op when none is tracked.
    pub async fn join(&self, task_id: &str) {
        if let Some(handle) = self.take_handle(task_id) {
            let _ = handle.await;
        }
    }

    /// Abort every running job. Their tasks stay `running` in the store and
    /// resume from the last checkpoint.
    pub fn stop_all(&self) -> usize {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let mut stopped = 0;
        for (id, handle) in running.drain() {
            if !handle.is_finished() {
                handle.abort();
                stopped += 1;
                info!(id = %id, "backup job stopped");
            }
        }
        stopped
    }

    fn take_handle(&self, task_id: &str) -> Option<JoinHandle<()>> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id)
    }
}

/// Without a platform count, the total grows with the work seen so far.
fn track_total(task: &mut BackupTask) {
    task.total_messages = task
        .total_messages
        .max(task.processed_messages + task.failed_messages);
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store_memory::InMemoryStore, test_support::FakeClient},
        std::{
            collections::HashSet,
            sync::atomic::{AtomicU64, Ordering},
        },
    };

    const SOURCE: i64 = 100;
    const TARGET: i64 = 200;

    fn manager(client: Arc<FakeClient>) -> (Arc<InMemoryStore>, BackupManager) {
        let store = Arc::new(InMemoryStore::new());
        let manager = BackupManager::new(
            store.clone(),
            client,
            BackupConfig::default(),
            RateLimitConfig::default(),
        );
        (store, manager)
    }

    fn create() -> BackupCreate {
        BackupCreate {
            source_id: SOURCE,
            target_id: TARGET,
            silent: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replays_history_to_completion() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 3));
        let progress = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));
        let (_, manager) = manager(client.clone());
        let manager = manager.with_callbacks(BackupCallbacks {
            on_progress: Some({
                let progress = Arc::clone(&progress);
                Arc::new(move |_| {
                    progress.fetch_add(1, Ordering::SeqCst);
                })
            }),
            on_complete: Some({
                let completed = Arc::clone(&completed);
                Arc::new(move |task| {
                    completed.store(task.processed_messages, Ordering::SeqCst);
                })
            }),
        });

        let task = manager.start_backup(create()).await.unwrap();
        assert_eq!(task.status, BackupStatus::Pending);

        let task = manager.resume(&task.id).await.unwrap();
        assert_eq!(task.status, BackupStatus::Completed);
        assert_eq!(task.processed_messages, 3);
        assert_eq!(task.total_messages, 3);
        assert_eq!(task.last_message_id, Some(3));
        assert!(task.completed_at_ms.is_some());
        assert_eq!(client.relayed_into(TARGET), vec![1, 2, 3]);
        assert!(client.requests().iter().all(|r| r.silent));
        assert_eq!(progress.load(Ordering::SeqCst), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_job_resumes_without_duplicates() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 120));
        let (store, manager) = manager(client.clone());
        let manager = Arc::new(manager);
        let task = manager.start_backup(create()).await.unwrap();

        client.block_after(70);
        manager.spawn(&task.id).unwrap();
        assert!(manager.is_running(&task.id));
        client.blocked().notified().await;
        assert_eq!(manager.stop_all(), 1);

        let checkpoint = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.status, BackupStatus::Running);
        assert_eq!(checkpoint.processed_messages, 70);
        assert_eq!(checkpoint.last_message_id, Some(70));

        client.unblock();
        let done = manager.resume(&task.id).await.unwrap();
        assert_eq!(done.status, BackupStatus::Completed);
        assert_eq!(done.processed_messages, 120);

        let relayed = client.relayed_into(TARGET);
        assert_eq!(relayed.len(), 120);
        let unique: HashSet<_> = relayed.iter().collect();
        assert_eq!(unique.len(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_survives_interruption_between_progress_ticks() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 120));
        let progress = Arc::new(AtomicU64::new(0));
        let (store, manager) = manager(client.clone());
        let manager = Arc::new(manager.with_callbacks(BackupCallbacks {
            on_progress: Some({
                let progress = Arc::clone(&progress);
                Arc::new(move |_| {
                    progress.fetch_add(1, Ordering::SeqCst);
                })
            }),
            on_complete: None,
        }));
        let task = manager.start_backup(create()).await.unwrap();

        client.block_after(75);
        manager.spawn(&task.id).unwrap();
        client.blocked().notified().await;
        manager.stop_all();

        let checkpoint = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.processed_messages, 75);
        assert_eq!(checkpoint.last_message_id, Some(75));
        assert_eq!(progress.load(Ordering::SeqCst), 7);

        client.unblock();
        let done = manager.resume(&task.id).await.unwrap();
        assert_eq!(done.processed_messages, 120);

        let relayed = client.relayed_into(TARGET);
        let mut seen = HashSet::new();
        let duplicates: Vec<_> = relayed.iter().filter(|id| !seen.insert(**id)).collect();
        assert!(duplicates.is_empty(), "relayed twice: {duplicates:?}");
        assert_eq!(relayed, (1..=120).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_items_are_counted_and_skipped() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 5));
        client.fail_message(2, ClientError::transient("network"));
        let (_, manager) = manager(client.clone());

        let task = manager.start_backup(create()).await.unwrap();
        let task = manager.execute_backup(task).await.unwrap();

        assert_eq!(task.status, BackupStatus::Completed);
        assert_eq!(task.processed_messages, 4);
        assert_eq!(task.failed_messages, 1);
        assert_eq!(client.relayed_into(TARGET), vec![1, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_retries_the_same_item() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 2));
        client.fail_next(ClientError::RateLimited {
            retry_after_secs: 2,
        });
        let (_, manager) = manager(client.clone());

        let task = manager.start_backup(create()).await.unwrap();
        let task = manager.execute_backup(task).await.unwrap();

        assert_eq!(task.processed_messages, 2);
        assert_eq!(task.failed_messages, 0);
        assert_eq!(client.attempts(), 3);
        assert_eq!(client.relayed_into(TARGET), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn protected_source_fails_the_task() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 5));
        client.protect(SOURCE);
        let (store, manager) = manager(client.clone());

        let task = manager.start_backup(create()).await.unwrap();
        let task = manager.execute_backup(task).await.unwrap();

        assert_eq!(task.status, BackupStatus::Failed);
        assert!(task.error.unwrap().contains("forwarding disabled"));
        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BackupStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_task_cannot_be_resumed() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 1));
        let (_, manager) = manager(client);
        let task = manager.start_backup(create()).await.unwrap();
        manager.resume(&task.id).await.unwrap();

        let err = manager.resume(&task.id).await.unwrap_err();
        assert!(err.to_string().contains("already completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn total_tracks_progress_without_history_count() {
        let client = Arc::new(
            FakeClient::new()
                .with_history(SOURCE, 4)
                .without_history_count(),
        );
        let (_, manager) = manager(client);
        let task = manager.start_backup(create()).await.unwrap();
        let task = manager.execute_backup(task).await.unwrap();
        assert_eq!(task.total_messages, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_job_can_be_joined_and_deleted() {
        let client = Arc::new(FakeClient::new().with_history(SOURCE, 12));
        let (_, manager) = manager(client);
        let manager = Arc::new(manager);
        let task = manager.start_backup(create()).await.unwrap();

        manager.spawn(&task.id).unwrap();
        manager.join(&task.id).await;
        assert!(!manager.is_running(&task.id));
        assert_eq!(
            manager.status(&task.id).await.unwrap().status,
            BackupStatus::Completed
        );
        assert_eq!(manager.list().await.unwrap().len(), 1);

        manager.delete(&task.id).await.unwrap();
        assert!(manager.status(&task.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn same_source_and_target_is_rejected() {
        let (_, manager) = manager(Arc::new(FakeClient::new()));
        let err = manager
            .start_backup(BackupCreate {
                source_id: 1,
                target_id: 1,
                silent: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Message { .. }));
    }
}
