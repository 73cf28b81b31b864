//! Conversation list with summary metadata.

use chrono::{DateTime, Utc};
use dealflow_shared::{Conversation, ConversationId, LastMessage};

/// Conversation summaries, in server order.
///
/// Mutated only through the named methods below; the messenger is the single
/// writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
    search_term: String,
    /// Set once a successful list has been applied while nothing was
    /// selected.
    auto_select_done: bool,
}

impl ConversationDirectory {
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    /// Replace the list with a fresh fetch.
    ///
    /// Returns the conversation to auto-select: the first entry of the first
    /// list applied while `nothing_selected` holds. That list consumes the
    /// auto-selection even when it is empty; lists applied while a
    /// conversation is selected leave it untouched.
    pub fn replace(
        &mut self,
        conversations: Vec<Conversation>,
        nothing_selected: bool,
    ) -> Option<ConversationId> {
        self.conversations = conversations;
        if self.auto_select_done || !nothing_selected {
            return None;
        }
        self.auto_select_done = true;
        self.conversations.first().map(|c| c.id.clone())
    }

    /// Reset a conversation's unread counter. Returns true if it changed.
    pub fn mark_read(&mut self, id: &ConversationId) -> bool {
        match self.conversations.iter_mut().find(|c| &c.id == id) {
            Some(conv) if conv.unread_count != 0 => {
                conv.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Update a conversation's last-message summary without a re-fetch.
    ///
    /// Older timestamps than the current summary are ignored.
    pub fn apply_incoming_summary(
        &mut self,
        id: &ConversationId,
        snippet: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> bool {
        let Some(conv) = self.conversations.iter_mut().find(|c| &c.id == id) else {
            return false;
        };
        if conv
            .last_message
            .as_ref()
            .is_some_and(|last| last.created_at > created_at)
        {
            return false;
        }
        conv.last_message = Some(LastMessage {
            content: snippet.into(),
            created_at,
        });
        true
    }
}

/// Shorten `content` to at most `max` characters, adding an ellipsis when cut.
pub fn snippet(content: &str, max: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// Human-readable age of `at` relative to `now`.
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else if elapsed.num_days() < 7 {
        format!("{}d ago", elapsed.num_days())
    } else {
        at.format("%b %-d, %Y").to_string()
    }
}
