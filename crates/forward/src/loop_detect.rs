//! Cycle detection over the rule graph.
//!
//! The walk follows `source -> target` edges starting at a proposed rule's
//! target. It runs when a rule is created or imported, never per relay.

use std::{collections::HashSet, fmt};

use crate::types::ChatId;

/// Hops followed before a chain is treated as circular.
pub const MAX_WALK_HOPS: usize = 20;

/// Outcome of checking a proposed `source -> target` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopCheck {
    /// The chain from the target terminates.
    Clear,
    /// Source and target are the same chat.
    SelfLoop { chat: ChatId },
    /// The walk revisited `closed_at`. `chain` starts at the proposed source.
    Cycle { chain: Vec<ChatId>, closed_at: ChatId },
    /// The walk ran past [`MAX_WALK_HOPS`] without terminating.
    TooDeep { chain: Vec<ChatId>, last: ChatId },
}

impl LoopCheck {
    #[must_use]
    pub fn is_circular(&self) -> bool {
        !matches!(self, Self::Clear)
    }

    /// The chat that made the check fail, if any.
    #[must_use]
    pub fn offending_chat(&self) -> Option<ChatId> {
        match self {
            Self::Clear => None,
            Self::SelfLoop { chat } => Some(*chat),
            Self::Cycle { closed_at, .. } => Some(*closed_at),
            Self::TooDeep { last, .. } => Some(*last),
        }
    }
}

impl fmt::Display for LoopCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => f.write_str("no cycle"),
            Self::SelfLoop { chat } => write!(f, "self-loop: chat {chat} forwards to itself"),
            Self::Cycle { chain, closed_at } => write!(
                f,
                "chat {closed_at} closes the cycle {}",
                render_chain(chain)
            ),
            Self::TooDeep { chain, last } => write!(
                f,
                "chain exceeds {MAX_WALK_HOPS} hops at chat {last}: {}",
                render_chain(chain)
            ),
        }
    }
}

fn render_chain(chain: &[ChatId]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Check whether adding `source -> target` would create a forwarding cycle.
///
/// `next_hop` returns the target of the existing rule for a chat, if any.
pub fn check_new_rule<F>(source: ChatId, target: ChatId, mut next_hop: F) -> LoopCheck
where
    F: FnMut(ChatId) -> Option<ChatId>,
{
    if source == target {
        return LoopCheck::SelfLoop { chat: source };
    }

    let mut visited = HashSet::from([source]);
    let mut chain = vec![source];
    let mut current = target;
    let mut hops = 0usize;

    loop {
        chain.push(current);
        if !visited.insert(current) {
            return LoopCheck::Cycle {
                chain,
                closed_at: current,
            };
        }
        let Some(next) = next_hop(current) else {
            return LoopCheck::Clear;
        };
        hops += 1;
        if hops > MAX_WALK_HOPS {
            return LoopCheck::TooDeep {
                chain,
                last: current,
            };
        }
        current = next;
    }
}
