//! In-memory state owned by the messenger.

pub mod conversations;
pub mod messages;
pub mod presence;

pub use conversations::{format_relative, snippet, ConversationDirectory};
pub use messages::{MessageKey, MessageStore, Reconciled, StoredMessage, DELETED_PLACEHOLDER};
pub use presence::{OnlineUsers, TypingSet, TypingUser};
