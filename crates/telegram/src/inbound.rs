//! Conversion of Telegram messages into engine messages.

use {
    courier_forward::types::{ChatMessage, MediaKind},
    teloxide::types::{MediaKind as TgMedia, Message, MessageKind, UpdateKind},
};

/// Map a Telegram message. `edited` marks edited messages and posts.
#[must_use]
pub fn chat_message(msg: &Message, edited: bool) -> ChatMessage {
    let (media, text) = match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            TgMedia::Text(t) => (MediaKind::Text, Some(t.text.clone())),
            TgMedia::Photo(p) => (MediaKind::Photo, p.caption.clone()),
            TgMedia::Video(v) => (MediaKind::Video, v.caption.clone()),
            TgMedia::Document(d) => (MediaKind::Document, d.caption.clone()),
            TgMedia::Audio(a) => (MediaKind::Audio, a.caption.clone()),
            TgMedia::Voice(v) => (MediaKind::Voice, v.caption.clone()),
            TgMedia::Animation(a) => (MediaKind::Animation, a.caption.clone()),
            TgMedia::Sticker(_) => (MediaKind::Sticker, None),
            _ => (MediaKind::Other, None),
        },
        _ => (MediaKind::Other, None),
    };

    ChatMessage {
        chat_id: msg.chat.id.0,
        message_id: i64::from(msg.id.0),
        group_id: msg.media_group_id().map(|id| id.to_string()),
        text,
        media,
        edited,
    }
}

/// Extract the message carried by an update, if it is one we relay.
/// Service messages (joins, pins, title changes) are skipped.
#[must_use]
pub fn update_message(kind: &UpdateKind) -> Option<ChatMessage> {
    let (msg, edited) = match kind {
        UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => (msg, false),
        UpdateKind::EditedMessage(msg) | UpdateKind::EditedChannelPost(msg) => (msg, true),
        _ => return None,
    };
    matches!(msg.kind, MessageKind::Common(_)).then(|| chat_message(msg, edited))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        serde_json::{Value, json},
        teloxide::types::Update,
    };

    fn message(extra: Value) -> Message {
        let mut base = json!({
            "message_id": 7,
            "date": 1,
            "chat": { "id": -100123, "type": "supergroup", "title": "Source" },
            "from": { "id": 1001, "is_bot": false, "first_name": "Alice" }
        });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        serde_json::from_value(base).expect("deserialize message")
    }

    #[test]
    fn text_message() {
        let msg = message(json!({ "text": "hello" }));
        let mapped = chat_message(&msg, false);
        assert_eq!(mapped, ChatMessage::text(-100123, 7, "hello"));
    }

    #[test]
    fn photo_album_part_keeps_caption_and_group() {
        let msg = message(json!({
            "media_group_id": "13579",
            "caption": "look",
            "photo": [{
                "file_id": "f",
                "file_unique_id": "u",
                "width": 10,
                "height": 10
            }]
        }));
        let mapped = chat_message(&msg, false);
        assert_eq!(mapped.media, MediaKind::Photo);
        assert_eq!(mapped.text.as_deref(), Some("look"));
        assert_eq!(mapped.group_id.as_deref(), Some("13579"));
    }

    #[test]
    fn sticker_has_no_text() {
        let msg = message(json!({
            "sticker": {
                "file_id": "s",
                "file_unique_id": "u",
                "type": "regular",
                "width": 512,
                "height": 512,
                "is_animated": false,
                "is_video": false
            }
        }));
        let mapped = chat_message(&msg, false);
        assert_eq!(mapped.media, MediaKind::Sticker);
        assert!(mapped.text.is_none());
    }

    #[test]
    fn edited_updates_are_flagged() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "edited_message": {
                "message_id": 3,
                "date": 1,
                "edit_date": 2,
                "chat": { "id": 42, "type": "private", "first_name": "Alice" },
                "from": { "id": 42, "is_bot": false, "first_name": "Alice" },
                "text": "fixed"
            }
        }))
        .unwrap();
        let mapped = update_message(&update.kind).unwrap();
        assert!(mapped.edited);
        assert_eq!(mapped.text.as_deref(), Some("fixed"));
    }

    #[test]
    fn channel_posts_are_relayed() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 2,
            "channel_post": {
                "message_id": 9,
                "date": 1,
                "chat": { "id": -1001, "type": "channel", "title": "News" },
                "text": "breaking"
            }
        }))
        .unwrap();
        let mapped = update_message(&update.kind).unwrap();
        assert_eq!((mapped.chat_id, mapped.message_id), (-1001, 9));
        assert!(!mapped.edited);
    }
}
