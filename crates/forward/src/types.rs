//! Core data types for rules, backup jobs, stats and inbound messages.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Platform chat identifier.
pub type ChatId = i64;
/// Platform message identifier, scoped to a chat.
pub type MessageId = i64;

/// Coarse media classification used for option tags and stats labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Other,
}

impl MediaKind {
    pub const ALL: [Self; 9] = [
        Self::Text,
        Self::Photo,
        Self::Video,
        Self::Document,
        Self::Audio,
        Self::Voice,
        Self::Sticker,
        Self::Animation,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Animation => "animation",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| Error::invalid_option(s))
    }
}

/// A message observed in a chat, either live or from history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    /// Shared by all parts of an album.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Message text or media caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub media: MediaKind,
    #[serde(default)]
    pub edited: bool,
}

impl ChatMessage {
    #[must_use]
    pub fn text(chat_id: ChatId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id,
            group_id: None,
            text: Some(text.into()),
            media: MediaKind::Text,
            edited: false,
        }
    }
}

/// Per-rule relay options.
///
/// Persisted as a list of tags: media kinds, `silent`, `handle-edited` and
/// `replyTo:<id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct RuleOptions {
    /// When non-empty, only these kinds are relayed.
    pub media: BTreeSet<MediaKind>,
    pub silent: bool,
    pub handle_edited: bool,
    pub reply_to: Option<MessageId>,
}

const REPLY_TO_PREFIX: &str = "replyto:";

impl RuleOptions {
    /// Parse a set of tags, rejecting anything outside the vocabulary.
    pub fn from_tags<I, S>(tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for tag in tags {
            options.apply_tag(tag.as_ref())?;
        }
        Ok(options)
    }

    pub fn apply_tag(&mut self, tag: &str) -> Result<()> {
        let lower = tag.trim().to_ascii_lowercase();
        match lower.as_str() {
            "" => {},
            "silent" => self.silent = true,
            "handle-edited" | "handle_edited" => self.handle_edited = true,
            _ if lower.starts_with(REPLY_TO_PREFIX) => {
                let id = lower[REPLY_TO_PREFIX.len()..]
                    .parse::<MessageId>()
                    .map_err(|_| Error::invalid_option(tag))?;
                self.reply_to = Some(id);
            },
            _ => {
                self.media.insert(lower.parse()?);
            },
        }
        Ok(())
    }

    /// Canonical tag list, media kinds first.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.media.iter().map(|m| m.as_str().to_string()).collect();
        if self.silent {
            tags.push("silent".into());
        }
        if self.handle_edited {
            tags.push("handle-edited".into());
        }
        if let Some(id) = self.reply_to {
            tags.push(format!("replyTo:{id}"));
        }
        tags
    }

    /// Whether a message of this kind passes the media tags.
    #[must_use]
    pub fn admits(&self, media: MediaKind) -> bool {
        self.media.is_empty() || self.media.contains(&media)
    }
}

impl From<RuleOptions> for Vec<String> {
    fn from(options: RuleOptions) -> Self {
        options.tags()
    }
}

impl TryFrom<Vec<String>> for RuleOptions {
    type Error = Error;

    fn try_from(tags: Vec<String>) -> Result<Self> {
        Self::from_tags(tags)
    }
}

/// A forwarding rule, keyed by its source chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRule {
    pub target_id: ChatId,
    #[serde(default)]
    pub options: RuleOptions,
    /// Blocklist keywords, stored lowercased.
    #[serde(default)]
    pub filters: BTreeSet<String>,
    #[serde(default)]
    pub paused: bool,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_display: Option<String>,
}

impl ForwardRule {
    #[must_use]
    pub fn new(target_id: ChatId) -> Self {
        Self {
            target_id,
            options: RuleOptions::default(),
            filters: BTreeSet::new(),
            paused: false,
            created_at_ms: crate::now_ms(),
            source_display: None,
            target_display: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.paused
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCreate {
    pub source_id: ChatId,
    pub target_id: ChatId,
    #[serde(default)]
    pub options: RuleOptions,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub source_display: Option<String>,
    #[serde(default)]
    pub target_display: Option<String>,
}

/// Lifecycle of a backup job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackupStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bulk-replay job from one chat's history into another chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupTask {
    pub id: String,
    pub source_id: ChatId,
    pub target_id: ChatId,
    pub status: BackupStatus,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub processed_messages: u64,
    #[serde(default)]
    pub failed_messages: u64,
    /// Checkpoint: the most recently relayed source message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<MessageId>,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Input for creating a backup job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCreate {
    pub source_id: ChatId,
    pub target_id: ChatId,
    #[serde(default)]
    pub silent: bool,
}

/// Relay counts for one source on one UTC day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub source_id: ChatId,
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub total: u64,
}

impl StatsRecord {
    #[must_use]
    pub fn empty(date: impl Into<String>, source_id: ChatId) -> Self {
        Self {
            date: date.into(),
            source_id,
            counts: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn add(&mut self, media: MediaKind, count: u64) {
        *self.counts.entry(media.as_str().to_string()).or_default() += count;
        self.total += count;
    }
}
