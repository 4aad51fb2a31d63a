//! Album coalescing.
//!
//! Messages sharing a group id arrive as separate updates. They are buffered
//! per `(source, group)` and flushed as a single batch once no new part has
//! arrived for the debounce window.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, warn},
};

use crate::types::{ChatId, ChatMessage, MediaKind, MessageId, RuleOptions};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1_200);

type GroupKey = (ChatId, String);

/// A flushed album, ready to relay.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBatch {
    pub source_id: ChatId,
    pub group_id: String,
    pub target_id: ChatId,
    pub options: RuleOptions,
    /// Ascending, no duplicates.
    pub message_ids: Vec<MessageId>,
    /// Media kind of the first part seen.
    pub media: MediaKind,
}

struct GroupBuffer {
    target_id: ChatId,
    options: RuleOptions,
    media: MediaKind,
    ids: BTreeSet<MessageId>,
    should_forward: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl GroupBuffer {
    fn into_batch(self, (source_id, group_id): GroupKey) -> Option<GroupBatch> {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        if !self.should_forward {
            debug!(source_id, group_id, parts = self.ids.len(), "dropping unforwarded group");
            return None;
        }
        Some(GroupBatch {
            source_id,
            group_id,
            target_id: self.target_id,
            options: self.options,
            message_ids: self.ids.into_iter().collect(),
            media: self.media,
        })
    }
}

#[derive(Default)]
struct BatcherState {
    buffers: HashMap<GroupKey, GroupBuffer>,
    next_generation: u64,
}

/// Debounced per-group buffers. Flushed batches are delivered on the
/// channel returned by [`GroupBatcher::new`].
pub struct GroupBatcher {
    debounce: Duration,
    state: Arc<Mutex<BatcherState>>,
    flush_tx: mpsc::UnboundedSender<GroupBatch>,
}

impl GroupBatcher {
    pub fn new(debounce: Duration) -> (Self, mpsc::UnboundedReceiver<GroupBatch>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let batcher = Self {
            debounce,
            state: Arc::new(Mutex::new(BatcherState::default())),
            flush_tx,
        };
        (batcher, flush_rx)
    }

    /// Add one part of an album. Returns `false` (and does nothing) for
    /// messages without a group id.
    ///
    /// The first part fixes target and options; `should_forward` is OR-ed
    /// across parts. Each call restarts the flush timer for the group.
    pub fn enqueue(
        &self,
        message: &ChatMessage,
        target_id: ChatId,
        options: &RuleOptions,
        should_forward: bool,
    ) -> bool {
        let Some(group_id) = message.group_id.clone() else {
            return false;
        };
        let key: GroupKey = (message.chat_id, group_id);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_generation += 1;
        let generation = state.next_generation;

        let buffer = state
            .buffers
            .entry(key.clone())
            .or_insert_with(|| GroupBuffer {
                target_id,
                options: options.clone(),
                media: message.media,
                ids: BTreeSet::new(),
                should_forward: false,
                generation,
                timer: None,
            });
        buffer.ids.insert(message.message_id);
        buffer.should_forward |= should_forward;
        buffer.generation = generation;
        if let Some(previous) = buffer.timer.take() {
            previous.abort();
        }
        buffer.timer = Some(self.schedule_flush(key, generation));
        true
    }

    fn schedule_flush(&self, key: GroupKey, generation: u64) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let flush_tx = self.flush_tx.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let buffer = {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                match state.buffers.get(&key) {
                    Some(buffer) if buffer.generation == generation => {
                        state.buffers.remove(&key)
                    },
                    _ => None,
                }
            };
            let Some(mut buffer) = buffer else {
                return;
            };
            // This is the running task's own handle.
            buffer.timer = None;
            if let Some(batch) = buffer.into_batch(key) {
                debug!(
                    source_id = batch.source_id,
                    group_id = %batch.group_id,
                    parts = batch.message_ids.len(),
                    "group flushed"
                );
                if let Err(mpsc::error::SendError(batch)) = flush_tx.send(batch) {
                    warn!(
                        source_id = batch.source_id,
                        group_id = %batch.group_id,
                        "group flush dropped, consumer is gone"
                    );
                }
            }
        })
    }

    /// Flush every pending group now. Returns the number of batches sent.
    pub fn flush_all(&self) -> usize {
        let drained: Vec<(GroupKey, GroupBuffer)> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.buffers.drain().collect()
        };
        let mut sent = 0;
        for (key, buffer) in drained {
            let Some(batch) = buffer.into_batch(key) else {
                continue;
            };
            match self.flush_tx.send(batch) {
                Ok(()) => sent += 1,
                Err(mpsc::error::SendError(batch)) => warn!(
                    source_id = batch.source_id,
                    group_id = %batch.group_id,
                    "group flush dropped, consumer is gone"
                ),
            }
        }
        sent
    }

    /// Groups currently buffered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buffers
            .len()
    }
}
