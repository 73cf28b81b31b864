//! State and background work tied to one conversation selection.
//!
//! A [`MessagingSession`] is built when a conversation is selected and
//! dropped when the selection changes or the messenger stops. It owns the
//! channel, the reconnect timer, the poller and every in-flight call for its
//! conversation, so dropping it cancels all of them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealflow_shared::{
    ApiError, ClientCommand, ClientKey, ConversationDetail, ConversationId, Message, MessageId,
    ServerEvent,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api_client::MessagingApi;
use crate::auth_session::AuthSession;
use crate::config::MessagingConfig;
use crate::messenger::Event;
use crate::poller::FallbackPoller;
use crate::send::{SendCoordinator, SendState};
use crate::stores::{MessageStore, OnlineUsers, TypingSet, TypingUser};
use crate::task::ScheduledTask;
use crate::ws::{
    self, ChannelEvent, ChannelHandle, CloseDecision, ConnectionState, ConnectionStatus,
    Connector, ReconnectSupervisor,
};

/// Collaborators shared by every session.
pub(crate) struct SessionContext {
    pub config: MessagingConfig,
    pub api: Arc<dyn MessagingApi>,
    pub connector: Arc<dyn Connector>,
    pub auth: AuthSession,
    pub events: mpsc::UnboundedSender<Event>,
}

impl SessionContext {
    /// Run an API call in the background and post its result as an event.
    pub fn call<T, Fut>(
        &self,
        fut: Fut,
        into_event: impl FnOnce(T) -> Event + Send + 'static,
    ) -> ScheduledTask
    where
        T: Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let events = self.events.clone();
        ScheduledTask::spawn(async move {
            let output = fut.await;
            // The loop may already have stopped
            let _ = events.send(into_event(output));
        })
    }
}

/// A newly confirmed message, reported so the directory summary can follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IncomingSummary {
    pub conversation_id: ConversationId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl IncomingSummary {
    fn of(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

pub(crate) struct MessagingSession {
    id: u64,
    conversation_id: ConversationId,
    store: MessageStore,
    connection: ConnectionState,
    typing: TypingSet,
    online: OnlineUsers,
    sender: SendCoordinator,
    supervisor: ReconnectSupervisor,
    poller: FallbackPoller,
    channel: Option<ChannelHandle>,
    /// Bumped on every open so events from a replaced channel are dropped.
    channel_generation: u64,
    local_typing: bool,
    history_task: Option<ScheduledTask>,
    poll_task: Option<ScheduledTask>,
    mark_read_task: Option<ScheduledTask>,
    send_task: Option<ScheduledTask>,
}

impl MessagingSession {
    pub fn new(ctx: &SessionContext, id: u64, conversation_id: ConversationId) -> Self {
        Self {
            id,
            store: MessageStore::for_conversation(conversation_id.clone()),
            conversation_id,
            connection: ConnectionState::default(),
            typing: TypingSet::new(ctx.config.typing_expiry),
            online: OnlineUsers::default(),
            sender: SendCoordinator::default(),
            supervisor: ReconnectSupervisor::new(ctx.config.reconnect.clone()),
            poller: FallbackPoller::new(ctx.config.poll_interval),
            channel: None,
            channel_generation: 0,
            local_typing: false,
            history_task: None,
            poll_task: None,
            mark_read_task: None,
            send_task: None,
        }
    }

    /// Fetch history, mark the conversation read and open the channel.
    pub fn start(&mut self, ctx: &SessionContext) {
        tracing::info!(conversation = %self.conversation_id, session = self.id, "session started");

        let api = ctx.api.clone();
        let id = self.conversation_id.clone();
        let session = self.id;
        self.history_task = Some(ctx.call(
            async move { api.get_conversation(&id).await },
            move |result| Event::HistoryLoaded { session, result },
        ));

        let api = ctx.api.clone();
        let id = self.conversation_id.clone();
        self.mark_read_task = Some(ctx.call(
            async move { api.mark_as_read(&id).await },
            move |result| Event::MarkedRead { session, result },
        ));

        self.open_channel(ctx);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn online(&self) -> &OnlineUsers {
        &self.online
    }

    pub fn send_state(&self) -> &SendState {
        self.sender.state()
    }

    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.typing.users()
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.next_expiry()
    }

    /// The supervisor gave up; only polling keeps this session fresh.
    pub fn is_exhausted(&self) -> bool {
        self.supervisor.is_exhausted()
    }

    fn open_channel(&mut self, ctx: &SessionContext) {
        let Some(token) = ctx.auth.tokens.token() else {
            tracing::warn!(conversation = %self.conversation_id, "no credential; channel not opened");
            self.set_status(ctx, ConnectionStatus::Disconnected);
            return;
        };
        let url = match ctx.config.ws_url(&self.conversation_id, &token) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(conversation = %self.conversation_id, error = %e, "cannot build channel address");
                self.set_status(ctx, ConnectionStatus::Disconnected);
                return;
            }
        };

        self.channel_generation += 1;
        let session = self.id;
        let channel = self.channel_generation;
        let events = ctx.events.clone();
        tracing::debug!(
            conversation = %self.conversation_id,
            channel,
            attempt = self.supervisor.attempts(),
            "opening channel"
        );
        self.channel = Some(ws::open(ctx.connector.clone(), url, move |event| {
            let _ = events.send(Event::Channel {
                session,
                channel,
                event,
            });
        }));
        self.set_status(ctx, ConnectionStatus::Connecting);
    }

    fn set_status(&mut self, ctx: &SessionContext, status: ConnectionStatus) {
        self.connection.status = status;
        self.connection.reconnect_attempts = self.supervisor.attempts();
        self.connection.retry_pending = self.supervisor.has_pending();
        self.connection.exhausted = self.supervisor.is_exhausted();

        if self.connection.needs_polling() {
            let events = ctx.events.clone();
            let session = self.id;
            self.poller.start(move || {
                let _ = events.send(Event::PollTick { session });
            });
        } else {
            self.poller.stop();
            self.poll_task = None;
        }
    }

    /// Apply a lifecycle or inbound event from the channel numbered `channel`.
    pub fn on_channel_event(
        &mut self,
        ctx: &SessionContext,
        channel: u64,
        event: ChannelEvent,
    ) -> Option<IncomingSummary> {
        if channel != self.channel_generation {
            tracing::debug!(conversation = %self.conversation_id, channel, "dropping event from replaced channel");
            return None;
        }
        match event {
            ChannelEvent::Opened => {
                tracing::info!(conversation = %self.conversation_id, "channel open");
                self.supervisor.on_open();
                self.set_status(ctx, ConnectionStatus::Connected);
                None
            }
            ChannelEvent::Event(event) => self.apply_server_event(ctx, event),
            ChannelEvent::Closed { reason } => {
                self.channel = None;
                self.local_typing = false;
                match self.supervisor.on_unexpected_close() {
                    CloseDecision::Retry { attempt, delay } => {
                        tracing::info!(
                            conversation = %self.conversation_id,
                            reason = reason.as_deref().unwrap_or("closed"),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "channel lost; reconnect scheduled"
                        );
                        let events = ctx.events.clone();
                        let session = self.id;
                        self.supervisor.schedule(delay, move || {
                            let _ = events.send(Event::ReconnectDue { session });
                        });
                    }
                    CloseDecision::GiveUp { attempts } => {
                        tracing::warn!(
                            conversation = %self.conversation_id,
                            attempts,
                            "reconnect attempts exhausted; falling back to polling"
                        );
                    }
                }
                self.set_status(ctx, ConnectionStatus::Disconnected);
                None
            }
        }
    }

    fn apply_server_event(
        &mut self,
        ctx: &SessionContext,
        event: ServerEvent,
    ) -> Option<IncomingSummary> {
        match event {
            ServerEvent::ChatMessage { message } => {
                if message.conversation != self.conversation_id {
                    tracing::debug!(
                        conversation = %self.conversation_id,
                        other = %message.conversation,
                        "ignoring message for another conversation"
                    );
                    return None;
                }
                self.typing.stop(&message.sender.id);
                let summary = IncomingSummary::of(&message);
                self.store.reconcile(message).is_new().then_some(summary)
            }
            ServerEvent::TypingIndicator {
                user_id,
                user_name,
                is_typing,
            } => {
                if user_id == ctx.auth.user.id {
                    return None;
                }
                if is_typing {
                    self.typing.refresh(user_id, user_name, Instant::now());
                } else {
                    self.typing.stop(&user_id);
                }
                None
            }
            ServerEvent::MessageEdit {
                message_id,
                content,
            } => {
                if !self.store.apply_edit(&message_id, content) {
                    tracing::debug!(message = %message_id, "edit for unknown message");
                }
                None
            }
            ServerEvent::MessageDelete { message_id } => {
                if !self.store.apply_delete(&message_id) {
                    tracing::debug!(message = %message_id, "delete for unknown message");
                }
                None
            }
            ServerEvent::UserStatus { user_id, is_online } => {
                self.online.update(user_id, is_online);
                None
            }
        }
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_due(&mut self, ctx: &SessionContext) {
        self.supervisor.fired();
        if self.channel.is_some() {
            return;
        }
        self.open_channel(ctx);
    }

    pub fn on_history(
        &mut self,
        result: Result<ConversationDetail, ApiError>,
    ) -> Result<(), ApiError> {
        self.history_task = None;
        let detail = result?;
        tracing::debug!(
            conversation = %self.conversation_id,
            count = detail.messages.len(),
            "history loaded"
        );
        self.store.load(&self.conversation_id, detail.messages);
        Ok(())
    }

    pub fn on_poll_tick(&mut self, ctx: &SessionContext) {
        if !self.connection.needs_polling() {
            return;
        }
        if self.poll_task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!(conversation = %self.conversation_id, "previous poll still running");
            return;
        }
        let api = ctx.api.clone();
        let id = self.conversation_id.clone();
        let session = self.id;
        self.poll_task = Some(ctx.call(
            async move { api.get_conversation(&id).await },
            move |result| Event::PollResult { session, result },
        ));
    }

    pub fn on_poll_result(
        &mut self,
        result: Result<ConversationDetail, ApiError>,
    ) -> Option<IncomingSummary> {
        match result {
            Ok(detail) => {
                let added = self.store.merge_fetched(detail.messages);
                if added == 0 {
                    return None;
                }
                tracing::debug!(conversation = %self.conversation_id, added, "poll found new messages");
                self.store.last_confirmed().map(|m| IncomingSummary {
                    conversation_id: m.conversation_id.clone(),
                    content: m.content.clone(),
                    created_at: m.created_at,
                })
            }
            Err(e) => {
                tracing::warn!(conversation = %self.conversation_id, error = %e, "poll failed");
                None
            }
        }
    }

    /// Send through the live channel when connected, otherwise over HTTP.
    pub fn send(&mut self, ctx: &SessionContext, content: &str, parent: Option<MessageId>) {
        let Some(outgoing) = self
            .sender
            .prepare(content, Some(&self.conversation_id), parent)
        else {
            return;
        };

        if self.connection.is_connected() {
            if let Some(channel) = &self.channel {
                match channel.send(outgoing.command()) {
                    Ok(()) => {
                        tracing::debug!(key = %outgoing.client_key, "message queued on channel");
                        self.store
                            .append_optimistic(outgoing.optimistic(ctx.auth.user.clone(), Utc::now()));
                        self.sender.dispatched_live();
                        self.clear_local_typing();
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "channel rejected message; sending over HTTP");
                    }
                }
            }
        }

        self.local_typing = false;
        self.sender.dispatched_request(&outgoing);
        let api = ctx.api.clone();
        let request = outgoing.request();
        let client_key = outgoing.client_key;
        let session = self.id;
        self.send_task = Some(ctx.call(
            async move { api.send_message(&request).await },
            move |result| Event::SendCompleted {
                session,
                client_key,
                result,
            },
        ));
    }

    pub fn on_send_completed(
        &mut self,
        client_key: ClientKey,
        result: Result<Message, ApiError>,
    ) -> Option<IncomingSummary> {
        self.send_task = None;
        let message = self.sender.complete(client_key, result)?;
        let summary = IncomingSummary::of(&message);
        self.store.reconcile(message).is_new().then_some(summary)
    }

    /// Tell the counterpart whether the local user is composing.
    pub fn set_typing(&mut self, is_typing: bool) {
        if is_typing == self.local_typing || !self.connection.is_connected() {
            return;
        }
        if let Some(channel) = &self.channel {
            if channel.send(ClientCommand::TypingIndicator { is_typing }).is_ok() {
                self.local_typing = is_typing;
            }
        }
    }

    fn clear_local_typing(&mut self) {
        if !self.local_typing {
            return;
        }
        self.local_typing = false;
        if let Some(channel) = &self.channel {
            let _ = channel.send(ClientCommand::TypingIndicator { is_typing: false });
        }
    }

    /// Drop typing entries past their deadline.
    pub fn expire_typing(&mut self, now: Instant) -> bool {
        self.typing.expire(now)
    }

    /// Close the channel and cancel timers, polling and calls. Idempotent.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.supervisor.cancel();
        self.poller.stop();
        self.history_task = None;
        self.poll_task = None;
        self.mark_read_task = None;
        self.send_task = None;
        self.connection.status = ConnectionStatus::Disconnected;
    }
}

impl Drop for MessagingSession {
    fn drop(&mut self) {
        self.close();
        tracing::debug!(conversation = %self.conversation_id, session = self.id, "session closed");
    }
}
