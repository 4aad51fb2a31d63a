//! Bot API implementation of the forwarding client.

use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_forward::{
        client::{ClientError, ForwardClient, ForwardRequest},
        types::{ChatMessage, MessageId},
    },
    teloxide::{
        RequestError,
        payloads::{CopyMessageSetters, ForwardMessagesSetters},
        prelude::*,
        types::{ChatId, MessageId as TgMessageId, ReplyParameters},
    },
    tracing::{debug, warn},
};

use crate::archive::MessageArchive;

/// API error fragments that mean the source chat forbids forwarding.
const PROTECTED_MARKERS: &[&str] = &[
    "can't be forwarded",
    "can't be copied",
    "protected content",
    "has_protected_content",
];

/// Flood-wait retries for a single copy once part of a relay has landed.
const COPY_FLOOD_RETRIES: usize = 4;

pub struct TelegramClient {
    bot: Bot,
    archive: Arc<MessageArchive>,
}

impl TelegramClient {
    pub fn new(bot: Bot, archive: Arc<MessageArchive>) -> Self {
        Self { bot, archive }
    }

    pub fn archive(&self) -> &Arc<MessageArchive> {
        &self.archive
    }

    /// Reply-threaded relays must be copies: `forwardMessages` takes no
    /// reply parameters.
    ///
    /// Copies go out one call per id. Once the first copy has landed the
    /// relay never reports an error: flood-waits are waited out here, and any
    /// other failure returns the ids copied so far.
    async fn copy_with_reply(
        &self,
        request: &ForwardRequest,
        ids: Vec<TgMessageId>,
        reply_to: TgMessageId,
    ) -> Result<Vec<MessageId>, RequestError> {
        let reply = ReplyParameters::new(reply_to).allow_sending_without_reply();
        let total = ids.len();
        let mut copied = Vec::with_capacity(total);
        for id in ids {
            let mut retries = 0;
            loop {
                let result = self
                    .bot
                    .copy_message(ChatId(request.to_chat), ChatId(request.from_chat), id)
                    .disable_notification(request.silent)
                    .reply_parameters(reply.clone())
                    .await;
                match result {
                    Ok(new_id) => {
                        copied.push(i64::from(new_id.0));
                        break;
                    },
                    Err(e) if copied.is_empty() => return Err(e),
                    Err(RequestError::RetryAfter(wait)) if retries < COPY_FLOOD_RETRIES => {
                        retries += 1;
                        warn!(
                            to_chat = request.to_chat,
                            message_id = id.0,
                            retry_after_secs = wait.duration().as_secs(),
                            "rate limited mid-copy, waiting"
                        );
                        tokio::time::sleep(wait.duration()).await;
                    },
                    Err(e) => {
                        warn!(
                            to_chat = request.to_chat,
                            copied = copied.len(),
                            total,
                            error = %e,
                            "copy interrupted, keeping partial relay"
                        );
                        return Ok(copied);
                    },
                }
            }
        }
        Ok(copied)
    }
}

#[async_trait]
impl ForwardClient for TelegramClient {
    async fn forward(&self, request: &ForwardRequest) -> Result<Vec<MessageId>, ClientError> {
        let ids = request
            .message_ids
            .iter()
            .map(|id| to_telegram_id(*id))
            .collect::<Result<Vec<_>, _>>()?;

        let result = match request.reply_to {
            Some(reply_to) => {
                let reply_to = to_telegram_id(reply_to)?;
                self.copy_with_reply(request, ids, reply_to).await
            },
            None => self
                .bot
                .forward_messages(ChatId(request.to_chat), ChatId(request.from_chat), ids)
                .disable_notification(request.silent)
                .await
                .map(|ids| ids.into_iter().map(|id| i64::from(id.0)).collect()),
        };

        match result {
            Ok(new_ids) => {
                debug!(
                    from_chat = request.from_chat,
                    to_chat = request.to_chat,
                    count = new_ids.len(),
                    "telegram relay ok"
                );
                Ok(new_ids)
            },
            Err(e) => Err(classify(&e, request.from_chat)),
        }
    }

    async fn list_history(
        &self,
        chat: i64,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        self.archive
            .page(chat, after, limit)
            .await
            .map_err(|e| ClientError::transient(format!("message archive: {e}")))
    }

    async fn history_count(&self, chat: i64) -> Result<Option<u64>, ClientError> {
        self.archive
            .count(chat)
            .await
            .map(Some)
            .map_err(|e| ClientError::transient(format!("message archive: {e}")))
    }
}

fn to_telegram_id(id: MessageId) -> Result<TgMessageId, ClientError> {
    i32::try_from(id)
        .map(TgMessageId)
        .map_err(|_| ClientError::transient(format!("message id {id} out of range")))
}

/// Map a Bot API failure onto the engine's error kinds.
pub(crate) fn classify(error: &RequestError, from_chat: i64) -> ClientError {
    match error {
        RequestError::RetryAfter(wait) => ClientError::RateLimited {
            retry_after_secs: wait.duration().as_secs(),
        },
        RequestError::Api(api) if is_protected(&api.to_string()) => {
            ClientError::ContentProtected { chat_id: from_chat }
        },
        other => ClientError::transient(other.to_string()),
    }
}

fn is_protected(description: &str) -> bool {
    let lower = description.to_lowercase();
    PROTECTED_MARKERS.iter().any(|marker| lower.contains(marker))
}
