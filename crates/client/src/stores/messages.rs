//! Ordered message log for the active conversation.
//!
//! This store is the single source of truth for what the thread shows. It
//! merges three sources: the fetched history, optimistic local sends, and
//! channel events (plus fallback poll results, which use the same merge).
//!
//! Layout invariant: confirmed entries come first, ordered by `created_at`;
//! pending (optimistic) entries follow in send order.

use chrono::{DateTime, Utc};
use dealflow_shared::{ClientKey, ConversationId, Message, MessageId, Participant};

/// Text shown in place of a deleted message.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Identity of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Server-assigned id.
    Confirmed(MessageId),
    /// Local send awaiting confirmation.
    Pending(ClientKey),
}

/// A message as rendered in the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub key: MessageKey,
    pub conversation_id: ConversationId,
    pub sender: Participant,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<MessageId>,
    /// Idempotency key echoed by the server, if any.
    pub client_key: Option<ClientKey>,
    pub edited: bool,
    pub deleted: bool,
}

impl StoredMessage {
    /// Optimistic entry for a local send.
    pub fn pending(
        client_key: ClientKey,
        conversation_id: ConversationId,
        sender: Participant,
        content: impl Into<String>,
        parent_id: Option<MessageId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: MessageKey::Pending(client_key),
            conversation_id,
            sender,
            content: content.into(),
            created_at,
            parent_id,
            client_key: Some(client_key),
            edited: false,
            deleted: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }

    pub fn id(&self) -> Option<&MessageId> {
        match &self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    /// Content to render; deleted messages show a placeholder.
    pub fn display_content(&self) -> &str {
        if self.deleted {
            DELETED_PLACEHOLDER
        } else {
            &self.content
        }
    }
}

impl From<Message> for StoredMessage {
    fn from(msg: Message) -> Self {
        Self {
            key: MessageKey::Confirmed(msg.id),
            conversation_id: msg.conversation,
            sender: msg.sender,
            content: msg.content,
            created_at: msg.created_at,
            parent_id: msg.parent_message,
            client_key: msg.client_key,
            edited: msg.is_edited,
            deleted: msg.is_deleted,
        }
    }
}

/// Outcome of merging one confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A pending entry was replaced by its confirmation.
    Replaced,
    /// A message not seen before was added.
    Inserted,
    /// The id was already present; nothing new was added.
    Duplicate,
}

impl Reconciled {
    /// Whether the store gained a confirmed message.
    pub fn is_new(self) -> bool {
        !matches!(self, Reconciled::Duplicate)
    }
}

/// Messages for the active conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    conversation_id: Option<ConversationId>,
    messages: Vec<StoredMessage>,
    /// Whether the history has been fetched from the REST API.
    is_loaded: bool,
}

impl MessageStore {
    pub fn for_conversation(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            ..Self::default()
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position_of(id).is_some()
    }

    /// Most recent confirmed, non-deleted message.
    pub fn last_confirmed(&self) -> Option<&StoredMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| !m.is_pending() && !m.deleted)
    }

    /// Set the full history for `conversation_id`.
    ///
    /// Switching to a different conversation discards everything, including
    /// pending entries. Reloading the same conversation keeps pending entries
    /// that the history does not confirm and any confirmed messages that
    /// arrived before the fetch completed.
    pub fn load(&mut self, conversation_id: &ConversationId, history: Vec<Message>) {
        if self.conversation_id.as_ref() != Some(conversation_id) {
            self.conversation_id = Some(conversation_id.clone());
            self.messages.clear();
        }

        let earlier = std::mem::take(&mut self.messages);

        let mut fetched: Vec<StoredMessage> = Vec::with_capacity(history.len());
        for msg in history {
            if !fetched.iter().any(|m| m.id() == Some(&msg.id)) {
                fetched.push(msg.into());
            }
        }
        // Stable, so equal timestamps keep server order
        fetched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.messages = fetched;

        let (pending, confirmed): (Vec<_>, Vec<_>) =
            earlier.into_iter().partition(StoredMessage::is_pending);

        // Confirmations merged before this load already settled their sends.
        let mut claimed: Vec<bool> = self
            .messages
            .iter()
            .map(|m| confirmed.iter().any(|c| c.id().is_some() && c.id() == m.id()))
            .collect();
        let mut unconfirmed = Vec::with_capacity(pending.len());
        for msg in pending.into_iter().rev() {
            if !claim_confirmation(&self.messages, &mut claimed, &msg) {
                unconfirmed.push(msg);
            }
        }

        for msg in confirmed {
            let known = msg.id().is_some_and(|id| self.contains(id));
            if !known {
                self.insert_confirmed(msg);
            }
        }
        self.messages.extend(unconfirmed.into_iter().rev());

        self.is_loaded = true;
    }

    /// Show a local send immediately, at the end of the thread.
    pub fn append_optimistic(&mut self, msg: StoredMessage) {
        debug_assert!(msg.is_pending());
        if let MessageKey::Pending(key) = &msg.key {
            // At most one pending entry per logical send
            if self.pending_position(key).is_some() {
                return;
            }
        }
        self.messages.push(msg);
    }

    /// Merge a server-confirmed message.
    ///
    /// Removes at most one pending entry: the one whose key the server
    /// echoed, or, when the server echoes no key, the oldest pending entry
    /// from the same sender with identical content.
    pub fn reconcile(&mut self, msg: Message) -> Reconciled {
        if let Some(idx) = self.position_of(&msg.id) {
            // A redelivery may still clear a stray entry carrying its key,
            // but never consumes another send by content.
            let stray = msg.client_key.and_then(|key| self.pending_position(&key));
            if let Some(p) = stray {
                self.messages.remove(p);
            }
            self.refresh_flags(idx_after_removal(idx, stray), &msg);
            return Reconciled::Duplicate;
        }

        let outcome = match self.matching_pending(&msg) {
            Some(p) => {
                self.messages.remove(p);
                Reconciled::Replaced
            }
            None => Reconciled::Inserted,
        };
        self.insert_confirmed(msg.into());
        outcome
    }

    /// Merge a full re-fetch of the history (fallback polling).
    ///
    /// Returns how many confirmed messages were added.
    pub fn merge_fetched(&mut self, history: Vec<Message>) -> usize {
        history
            .into_iter()
            .map(|msg| self.reconcile(msg))
            .filter(|outcome| outcome.is_new())
            .count()
    }

    /// Replace a message's content. Unknown ids are ignored.
    pub fn apply_edit(&mut self, id: &MessageId, content: impl Into<String>) -> bool {
        match self.position_of(id) {
            Some(idx) => {
                let entry = &mut self.messages[idx];
                entry.content = content.into();
                entry.edited = true;
                true
            }
            None => false,
        }
    }

    /// Flag a message as deleted. Unknown ids are ignored.
    pub fn apply_delete(&mut self, id: &MessageId) -> bool {
        match self.position_of(id) {
            Some(idx) => {
                self.messages[idx].deleted = true;
                true
            }
            None => false,
        }
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id() == Some(id))
    }

    fn pending_position(&self, key: &ClientKey) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| matches!(&m.key, MessageKey::Pending(k) if k == key))
    }

    fn matching_pending(&self, msg: &Message) -> Option<usize> {
        match &msg.client_key {
            Some(key) => self.pending_position(key),
            None => self.messages.iter().position(|m| {
                m.is_pending() && m.sender.id == msg.sender.id && m.content == msg.content
            }),
        }
    }

    /// Insert after every confirmed entry with `created_at <= msg.created_at`,
    /// ahead of all pending entries.
    fn insert_confirmed(&mut self, msg: StoredMessage) {
        let confirmed_len = self
            .messages
            .iter()
            .take_while(|m| !m.is_pending())
            .count();
        let pos = self.messages[..confirmed_len].partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(pos, msg);
    }

    /// Server state wins for edit/delete flags on a re-fetched message.
    fn refresh_flags(&mut self, idx: usize, msg: &Message) {
        let entry = &mut self.messages[idx];
        if msg.is_edited && entry.content != msg.content {
            entry.content = msg.content.clone();
        }
        entry.edited |= msg.is_edited;
        entry.deleted |= msg.is_deleted;
    }
}

/// Find the fetched message confirming `pending` and mark it claimed.
///
/// An echoed key decides outright. Keyless confirmations from the same
/// sender with identical content are matched newest first, each at most once.
fn claim_confirmation(
    fetched: &[StoredMessage],
    claimed: &mut [bool],
    pending: &StoredMessage,
) -> bool {
    let by_key = pending
        .client_key
        .and_then(|key| fetched.iter().position(|m| m.client_key == Some(key)));
    let hit = by_key.or_else(|| {
        (0..fetched.len()).rev().find(|&i| {
            let m = &fetched[i];
            !claimed[i]
                && m.client_key.is_none()
                && m.sender.id == pending.sender.id
                && m.content == pending.content
        })
    });
    match hit {
        Some(i) => {
            claimed[i] = true;
            true
        }
        None => false,
    }
}

fn idx_after_removal(idx: usize, removed: Option<usize>) -> usize {
    match removed {
        Some(r) if r < idx => idx - 1,
        _ => idx,
    }
}
