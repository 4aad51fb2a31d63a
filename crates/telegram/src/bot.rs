use std::{sync::Arc, time::Duration};

use {
    courier_config::TelegramConfig,
    courier_forward::types::ChatMessage,
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, Update},
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{Error, Result, archive::MessageArchive, inbound};

/// Seconds added to the long-poll timeout for the HTTP client, so the
/// client never aborts a poll before Telegram answers it.
const CLIENT_TIMEOUT_SLACK_SECS: u64 = 15;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Build a bot whose HTTP timeout outlives a long poll.
pub fn build_bot(config: &TelegramConfig) -> Result<Bot> {
    if !config.has_token() {
        return Err(Error::message("telegram.token is not configured"));
    }
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(
            u64::from(config.poll_timeout_secs) + CLIENT_TIMEOUT_SLACK_SECS,
        ))
        .build()?;
    Ok(Bot::with_client(config.token.expose_secret(), client))
}

/// Start long polling.
///
/// Every relayable update is recorded in `archive` and then sent to
/// `inbound`. The loop runs until the returned token is cancelled, the
/// receiver is dropped, or another instance takes over the token.
pub async fn start_polling(
    bot: Bot,
    config: &TelegramConfig,
    archive: Arc<MessageArchive>,
    inbound: mpsc::Sender<ChatMessage>,
) -> Result<CancellationToken> {
    let me = bot.get_me().await?;
    bot.delete_webhook().send().await?;
    info!(username = ?me.username, "telegram bot connected (webhook cleared)");

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let poll_timeout = config.poll_timeout_secs;

    tokio::spawn(async move {
        info!("starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let result = tokio::select! {
                () = cancel_clone.cancelled() => break,
                result = bot
                    .get_updates()
                    .offset(offset)
                    .timeout(poll_timeout)
                    .allowed_updates(vec![
                        AllowedUpdate::Message,
                        AllowedUpdate::EditedMessage,
                        AllowedUpdate::ChannelPost,
                        AllowedUpdate::EditedChannelPost,
                    ])
                    .send() => result,
            };

            match result {
                Ok(updates) => {
                    debug!(count = updates.len(), "got telegram updates");
                    for update in updates {
                        offset = update.id.as_offset();
                        if !handle_update(&update, &archive, &inbound).await {
                            info!("inbound channel closed, stopping telegram polling");
                            cancel_clone.cancel();
                            break;
                        }
                    }
                },
                Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                    error!("another instance is already polling with this token, stopping");
                    cancel_clone.cancel();
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        () = cancel_clone.cancelled() => break,
                        () = tokio::time::sleep(RETRY_DELAY) => {},
                    }
                },
            }
        }
        info!("telegram polling stopped");
    });

    Ok(cancel)
}

/// Archive and hand over one update. Returns `false` once the engine side
/// has hung up.
pub(crate) async fn handle_update(
    update: &Update,
    archive: &MessageArchive,
    inbound: &mpsc::Sender<ChatMessage>,
) -> bool {
    let Some(message) = inbound::update_message(&update.kind) else {
        debug!(update_id = update.id.0, "ignoring non-message update");
        return true;
    };

    if let Err(e) = archive.record(&message).await {
        warn!(
            chat_id = message.chat_id,
            message_id = message.message_id,
            error = %e,
            "failed to archive telegram message"
        );
    }

    inbound.send(message).await.is_ok()
}
