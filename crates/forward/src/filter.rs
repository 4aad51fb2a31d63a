//! Per-rule admission checks: keyword blocklist, media tags, edits.

use crate::types::{ChatMessage, ForwardRule};

/// `true` when the message text contains any blocklisted keyword
/// (case-insensitive substring match).
#[must_use]
pub fn is_filtered(message: &ChatMessage, rule: &ForwardRule) -> bool {
    if rule.filters.is_empty() {
        return false;
    }
    let Some(text) = message.text.as_deref().filter(|t| !t.is_empty()) else {
        return false;
    };
    let folded = text.to_lowercase();
    rule.filters
        .iter()
        .filter(|k| !k.is_empty())
        .any(|keyword| folded.contains(&keyword.to_lowercase()))
}

/// Full admission decision for one message under `rule`.
#[must_use]
pub fn should_forward(message: &ChatMessage, rule: &ForwardRule) -> bool {
    rule.is_active()
        && (!message.edited || rule.options.handle_edited)
        && rule.options.admits(message.media)
        && !is_filtered(message, rule)
}
