//! Fakes shared by the unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
};

use {async_trait::async_trait, tokio::sync::Notify};

use crate::{
    Result,
    client::{ClientError, ForwardClient, ForwardRequest},
    store::ForwardStore,
    store_memory::InMemoryStore,
    types::{BackupTask, ChatId, ChatMessage, ForwardRule, MessageId, StatsRecord},
};

/// Recording client. Every successful call is kept; new message ids are
/// allocated from 10_000 upwards.
pub struct FakeClient {
    requests: Mutex<Vec<ForwardRequest>>,
    scripted: Mutex<VecDeque<ClientError>>,
    failing_ids: Mutex<HashMap<MessageId, ClientError>>,
    protected: Mutex<HashSet<ChatId>>,
    history: Mutex<HashMap<ChatId, Vec<ChatMessage>>>,
    report_count: bool,
    block_after: Mutex<Option<usize>>,
    blocked: Notify,
    attempts: AtomicUsize,
    next_id: AtomicI64,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self {
            requests: Mutex::default(),
            scripted: Mutex::default(),
            failing_ids: Mutex::default(),
            protected: Mutex::default(),
            history: Mutex::default(),
            report_count: true,
            block_after: Mutex::default(),
            blocked: Notify::new(),
            attempts: AtomicUsize::new(0),
            next_id: AtomicI64::new(10_000),
        }
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `count` text messages with ids `1..=count`.
    pub fn with_history(self, chat: ChatId, count: i64) -> Self {
        let messages = (1..=count)
            .map(|id| ChatMessage::text(chat, id, format!("message {id}")))
            .collect();
        self.history.lock().unwrap().insert(chat, messages);
        self
    }

    pub fn without_history_count(mut self) -> Self {
        self.report_count = false;
        self
    }

    /// The next `forward` calls fail with these errors, in order.
    pub fn fail_next(&self, error: ClientError) {
        self.scripted.lock().unwrap().push_back(error);
    }

    /// Every request carrying `id` fails with `error`.
    pub fn fail_message(&self, id: MessageId, error: ClientError) {
        self.failing_ids.lock().unwrap().insert(id, error);
    }

    pub fn protect(&self, chat: ChatId) {
        self.protected.lock().unwrap().insert(chat);
    }

    /// After `count` successful calls, further calls hang forever and
    /// signal [`FakeClient::blocked`].
    pub fn block_after(&self, count: usize) {
        *self.block_after.lock().unwrap() = Some(count);
    }

    pub fn unblock(&self) {
        *self.block_after.lock().unwrap() = None;
    }

    pub fn blocked(&self) -> &Notify {
        &self.blocked
    }

    pub fn requests(&self) -> Vec<ForwardRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Calls made, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Source ids relayed into `chat`, in call order.
    pub fn relayed_into(&self, chat: ChatId) -> Vec<MessageId> {
        self.requests()
            .into_iter()
            .filter(|r| r.to_chat == chat)
            .flat_map(|r| r.message_ids)
            .collect()
    }
}

#[async_trait]
impl ForwardClient for FakeClient {
    async fn forward(
        &self,
        request: &ForwardRequest,
    ) -> std::result::Result<Vec<MessageId>, ClientError> {
        let done = self.requests.lock().unwrap().len();
        let limit = *self.block_after.lock().unwrap();
        if limit.is_some_and(|limit| done >= limit) {
            self.blocked.notify_one();
            std::future::pending::<()>().await;
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scripted.lock().unwrap().pop_front() {
            return Err(error);
        }
        if self.protected.lock().unwrap().contains(&request.from_chat) {
            return Err(ClientError::ContentProtected {
                chat_id: request.from_chat,
            });
        }
        {
            let failing = self.failing_ids.lock().unwrap();
            if let Some(error) = request.message_ids.iter().find_map(|id| failing.get(id)) {
                return Err(error.clone());
            }
        }

        self.requests.lock().unwrap().push(request.clone());
        Ok(request
            .message_ids
            .iter()
            .map(|_| self.next_id.fetch_add(1, Ordering::SeqCst))
            .collect())
    }

    async fn list_history(
        &self,
        chat: ChatId,
        after: Option<MessageId>,
        limit: usize,
    ) -> std::result::Result<Vec<ChatMessage>, ClientError> {
        let history = self.history.lock().unwrap();
        Ok(history
            .get(&chat)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| after.is_none_or(|after| m.message_id > after))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn history_count(&self, chat: ChatId) -> std::result::Result<Option<u64>, ClientError> {
        if !self.report_count {
            return Ok(None);
        }
        let history = self.history.lock().unwrap();
        Ok(history.get(&chat).map(|m| m.len() as u64))
    }
}

/// Store wrapper counting rule reads, for cache assertions.
pub struct CountingStore {
    inner: InMemoryStore,
    rule_reads: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            rule_reads: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn rule_reads(&self) -> usize {
        self.rule_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForwardStore for CountingStore {
    async fn get_rule(&self, source_id: ChatId) -> Result<Option<ForwardRule>> {
        self.rule_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_rule(source_id).await
    }

    async fn set_rule(&self, source_id: ChatId, rule: &ForwardRule) -> Result<()> {
        self.inner.set_rule(source_id, rule).await
    }

    async fn delete_rule(&self, source_id: ChatId) -> Result<()> {
        self.inner.delete_rule(source_id).await
    }

    async fn list_rules(&self) -> Result<Vec<(ChatId, ForwardRule)>> {
        self.inner.list_rules().await
    }

    async fn get_task(&self, id: &str) -> Result<Option<BackupTask>> {
        self.inner.get_task(id).await
    }

    async fn save_task(&self, task: &BackupTask) -> Result<()> {
        self.inner.save_task(task).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.inner.delete_task(id).await
    }

    async fn list_tasks(&self) -> Result<Vec<BackupTask>> {
        self.inner.list_tasks().await
    }

    async fn get_stats(&self, date: &str, source_id: ChatId) -> Result<Option<StatsRecord>> {
        self.inner.get_stats(date, source_id).await
    }

    async fn save_stats(&self, record: &StatsRecord) -> Result<()> {
        self.inner.save_stats(record).await
    }

    async fn list_stats(&self) -> Result<Vec<StatsRecord>> {
        self.inner.list_stats().await
    }
}
