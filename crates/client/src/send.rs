//! Outgoing message state machine.
//!
//! One coordinator serves the active conversation. A send is either pushed
//! through the live channel (optimistic, returns to idle at once) or posted
//! over HTTP (stays `Sending` until the response arrives).

use chrono::{DateTime, Utc};
use dealflow_shared::{
    ApiError, ClientCommand, ClientKey, ConversationId, Message, MessageId, Participant,
    SendMessageRequest,
};

use crate::error::{ErrorBanner, ErrorKind};
use crate::stores::StoredMessage;

/// Where the coordinator is in the `idle → sending → (confirmed | failed)` cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    /// An HTTP send is in flight.
    Sending { client_key: ClientKey, content: String },
    /// The last HTTP send failed; `content` is the draft to retry.
    Failed { content: String, error: ErrorBanner },
}

impl SendState {
    pub fn is_sending(&self) -> bool {
        matches!(self, SendState::Sending { .. })
    }

    /// Draft text the UI should keep in the composer.
    pub fn draft(&self) -> Option<&str> {
        match self {
            SendState::Idle => None,
            SendState::Sending { content, .. } | SendState::Failed { content, .. } => {
                Some(content)
            }
        }
    }
}

/// A validated outgoing message, ready for either path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub client_key: ClientKey,
    pub conversation_id: ConversationId,
    pub content: String,
    pub parent_id: Option<MessageId>,
}

impl OutgoingMessage {
    /// Frame for the live channel.
    pub fn command(&self) -> ClientCommand {
        ClientCommand::ChatMessage {
            content: self.content.clone(),
            parent_message_id: self.parent_id.clone(),
            client_key: self.client_key,
        }
    }

    /// Body for `POST /messages/`.
    pub fn request(&self) -> SendMessageRequest {
        SendMessageRequest {
            conversation: self.conversation_id.clone(),
            content: self.content.clone(),
            parent_message: self.parent_id.clone(),
            client_key: self.client_key,
        }
    }

    /// Pending store entry shown until the server confirms.
    pub fn optimistic(&self, sender: Participant, now: DateTime<Utc>) -> StoredMessage {
        StoredMessage::pending(
            self.client_key,
            self.conversation_id.clone(),
            sender,
            self.content.clone(),
            self.parent_id.clone(),
            now,
        )
    }
}

/// Gatekeeper for outgoing messages.
#[derive(Debug, Clone, Default)]
pub struct SendCoordinator {
    state: SendState,
}

impl SendCoordinator {
    pub fn state(&self) -> &SendState {
        &self.state
    }

    /// Validate a send request.
    ///
    /// Returns `None` for blank content, when no conversation is active, or
    /// while an HTTP send is still in flight.
    pub fn prepare(
        &self,
        content: &str,
        conversation_id: Option<&ConversationId>,
        parent_id: Option<MessageId>,
    ) -> Option<OutgoingMessage> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        if self.state.is_sending() {
            tracing::debug!("send ignored: previous send still in flight");
            return None;
        }
        let conversation_id = conversation_id?;
        Some(OutgoingMessage {
            client_key: ClientKey::generate(),
            conversation_id: conversation_id.clone(),
            content: content.to_string(),
            parent_id,
        })
    }

    /// The message was queued on the live channel.
    pub fn dispatched_live(&mut self) {
        self.state = SendState::Idle;
    }

    /// The message is being posted over HTTP.
    pub fn dispatched_request(&mut self, outgoing: &OutgoingMessage) {
        self.state = SendState::Sending {
            client_key: outgoing.client_key,
            content: outgoing.content.clone(),
        };
    }

    /// Record the HTTP response for the send identified by `client_key`.
    ///
    /// Returns the confirmed message on success. Responses for a send that
    /// is no longer in flight are ignored.
    pub fn complete(
        &mut self,
        client_key: ClientKey,
        result: Result<Message, ApiError>,
    ) -> Option<Message> {
        let content = match &self.state {
            SendState::Sending {
                client_key: current,
                content,
            } if *current == client_key => content.clone(),
            _ => return None,
        };
        match result {
            Ok(message) => {
                self.state = SendState::Idle;
                Some(message)
            }
            Err(error) => {
                tracing::warn!(%client_key, error = %error, "fallback send failed");
                self.state = SendState::Failed {
                    content,
                    error: ErrorBanner::from_api(ErrorKind::Send, &error),
                };
                None
            }
        }
    }
}
