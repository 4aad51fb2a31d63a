//! Messaging-platform contract used by the dispatcher and backup jobs.

use {async_trait::async_trait, thiserror::Error};

use crate::types::{ChatId, ChatMessage, MessageId};

/// Failure kinds a platform client must distinguish.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The platform demands a cooldown before the next call.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The source chat disallows forwarding. Terminal for the rule.
    #[error("forwarding disabled by chat {chat_id}")]
    ContentProtected { chat_id: ChatId },

    /// Network or unknown remote error on a single item.
    #[error("{message}")]
    Transient { message: String },
}

impl ClientError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }
}

/// One relay call: copy `message_ids` from `from_chat` into `to_chat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub from_chat: ChatId,
    pub to_chat: ChatId,
    /// Ascending.
    pub message_ids: Vec<MessageId>,
    pub silent: bool,
    pub reply_to: Option<MessageId>,
}

#[async_trait]
pub trait ForwardClient: Send + Sync {
    /// Relay the messages. Returns the ids of the new messages in `to_chat`,
    /// in the same order (empty if the platform does not report them).
    async fn forward(&self, request: &ForwardRequest) -> Result<Vec<MessageId>, ClientError>;

    /// Up to `limit` messages of `chat` with id greater than `after`,
    /// ascending. `None` starts from the oldest message.
    async fn list_history(
        &self,
        chat: ChatId,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ClientError>;

    /// Total messages available in `chat`, when the platform can tell.
    async fn history_count(&self, _chat: ChatId) -> Result<Option<u64>, ClientError> {
        Ok(None)
    }
}
