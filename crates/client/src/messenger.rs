//! The messaging core's public handle and its event loop.
//!
//! All state lives in a single task. UI calls, API responses, timers and
//! channel traffic are all turned into [`Event`]s on one queue and applied in
//! arrival order, so no state is ever touched from two places at once. The
//! UI reads the result through a [`watch`] snapshot.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;

use dealflow_shared::{
    ApiError, ClientKey, Conversation, ConversationDetail, ConversationId, Message, MessageId,
    UserId,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api_client::MessagingApi;
use crate::auth_session::AuthSession;
use crate::config::MessagingConfig;
use crate::error::{ErrorBanner, ErrorKind, MessengerError};
use crate::send::SendState;
use crate::session::{IncomingSummary, MessagingSession, SessionContext};
use crate::stores::{snippet, ConversationDirectory, StoredMessage, TypingUser};
use crate::task::ScheduledTask;
use crate::ws::{ChannelEvent, ConnectionState, Connector};

/// Everything the UI renders, published after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessengerSnapshot {
    pub conversations: Vec<Conversation>,
    pub search_term: String,
    pub active: Option<ConversationId>,
    /// Messages of the active conversation, oldest first.
    pub messages: Vec<StoredMessage>,
    pub history_loaded: bool,
    pub connection: ConnectionState,
    pub typing: Vec<TypingUser>,
    pub online: HashMap<UserId, bool>,
    pub send_state: SendState,
    pub error: Option<ErrorBanner>,
    /// Aggregate unread count reported by the server.
    pub unread_total: u32,
}

impl MessengerSnapshot {
    pub fn active_conversation(&self) -> Option<&Conversation> {
        let active = self.active.as_ref()?;
        self.conversations.iter().find(|c| &c.id == active)
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.get(user).copied().unwrap_or(false)
    }
}

/// Everything the loop reacts to.
#[derive(Debug)]
pub(crate) enum Event {
    Select(ConversationId),
    Send {
        content: String,
        parent: Option<MessageId>,
    },
    Search(String),
    Refresh,
    SetTyping(bool),
    Shutdown,
    ConversationsLoaded {
        generation: u64,
        result: Result<Vec<Conversation>, ApiError>,
    },
    UnreadTotal(Result<u32, ApiError>),
    HistoryLoaded {
        session: u64,
        result: Result<ConversationDetail, ApiError>,
    },
    MarkedRead {
        session: u64,
        result: Result<(), ApiError>,
    },
    PollTick {
        session: u64,
    },
    PollResult {
        session: u64,
        result: Result<ConversationDetail, ApiError>,
    },
    SendCompleted {
        session: u64,
        client_key: ClientKey,
        result: Result<Message, ApiError>,
    },
    Channel {
        session: u64,
        channel: u64,
        event: ChannelEvent,
    },
    ReconnectDue {
        session: u64,
    },
}

/// Handle to the running messaging core.
///
/// Dropping the handle stops the core and releases the active conversation's
/// channel, timers and polling.
pub struct Messenger {
    events: mpsc::UnboundedSender<Event>,
    snapshot: watch::Receiver<MessengerSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl Messenger {
    /// Start the core and fetch the conversation list.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: MessagingConfig,
        api: Arc<dyn MessagingApi>,
        connector: Arc<dyn Connector>,
        auth: AuthSession,
    ) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        let (publisher, snapshot) = watch::channel(MessengerSnapshot::default());
        let ctx = SessionContext {
            config,
            api,
            connector,
            auth,
            events: events.clone(),
        };
        let worker = MessengerLoop {
            ctx,
            inbox,
            publisher,
            directory: ConversationDirectory::default(),
            session: None,
            next_session: 0,
            list_generation: 0,
            list_task: None,
            unread_task: None,
            unread_total: 0,
            error: None,
        };
        Self {
            events,
            snapshot,
            task: Some(tokio::spawn(worker.run())),
        }
    }

    fn dispatch(&self, event: Event) -> Result<(), MessengerError> {
        self.events.send(event).map_err(|_| MessengerError::Stopped)
    }

    /// Make `id` the active conversation.
    pub fn select_conversation(&self, id: impl Into<ConversationId>) -> Result<(), MessengerError> {
        self.dispatch(Event::Select(id.into()))
    }

    pub fn send_message(&self, content: impl Into<String>) -> Result<(), MessengerError> {
        self.dispatch(Event::Send {
            content: content.into(),
            parent: None,
        })
    }

    pub fn send_reply(
        &self,
        content: impl Into<String>,
        parent: MessageId,
    ) -> Result<(), MessengerError> {
        self.dispatch(Event::Send {
            content: content.into(),
            parent: Some(parent),
        })
    }

    /// Re-list conversations filtered by `term`. Never changes the selection.
    pub fn search(&self, term: impl Into<String>) -> Result<(), MessengerError> {
        self.dispatch(Event::Search(term.into()))
    }

    /// Re-list conversations with the current search term.
    pub fn refresh(&self) -> Result<(), MessengerError> {
        self.dispatch(Event::Refresh)
    }

    pub fn set_typing(&self, is_typing: bool) -> Result<(), MessengerError> {
        self.dispatch(Event::SetTyping(is_typing))
    }

    pub fn subscribe(&self) -> watch::Receiver<MessengerSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> MessengerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Stop the core and wait for it to release its resources.
    pub async fn shutdown(mut self) {
        let _ = self.events.send(Event::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "messenger task panicked");
                }
            }
        }
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("running", &self.task.as_ref().is_some_and(|t| !t.is_finished()))
            .finish()
    }
}

enum Wake {
    Event(Option<Event>),
    TypingExpired,
}

struct MessengerLoop {
    ctx: SessionContext,
    inbox: mpsc::UnboundedReceiver<Event>,
    publisher: watch::Sender<MessengerSnapshot>,
    directory: ConversationDirectory,
    session: Option<MessagingSession>,
    next_session: u64,
    list_generation: u64,
    list_task: Option<ScheduledTask>,
    unread_task: Option<ScheduledTask>,
    unread_total: u32,
    error: Option<ErrorBanner>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}

impl MessengerLoop {
    async fn run(mut self) {
        tracing::info!(user = %self.ctx.auth.user.id, "messenger started");
        self.load_conversations();
        self.publish();

        loop {
            let deadline = self.session.as_ref().and_then(|s| s.typing_deadline());
            let wake = tokio::select! {
                event = self.inbox.recv() => Wake::Event(event),
                () = wait_until(deadline) => Wake::TypingExpired,
            };
            match wake {
                Wake::Event(None | Some(Event::Shutdown)) => break,
                Wake::Event(Some(event)) => self.handle(event),
                Wake::TypingExpired => {
                    if let Some(session) = self.session.as_mut() {
                        session.expire_typing(Instant::now());
                    }
                }
            }
            self.publish();
        }

        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.list_task = None;
        self.unread_task = None;
        self.publish();
        tracing::info!("messenger stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Select(id) => self.select(id),
            Event::Send { content, parent } => match self.session.as_mut() {
                Some(session) => session.send(&self.ctx, &content, parent),
                None => tracing::debug!("send ignored: no active conversation"),
            },
            Event::Search(term) => {
                self.directory.set_search_term(term);
                self.load_conversations();
            }
            Event::Refresh => self.load_conversations(),
            Event::SetTyping(is_typing) => {
                if let Some(session) = self.session.as_mut() {
                    session.set_typing(is_typing);
                }
            }
            Event::Shutdown => {}
            Event::ConversationsLoaded { generation, result } => {
                self.on_conversations(generation, result)
            }
            Event::UnreadTotal(result) => {
                self.unread_task = None;
                match result {
                    Ok(total) => self.unread_total = total,
                    Err(e) => tracing::warn!(error = %e, "unread count unavailable"),
                }
            }
            Event::HistoryLoaded { session, result } => {
                let Some(active) = self.session.as_mut().filter(|s| s.id() == session) else {
                    return;
                };
                match active.on_history(result) {
                    Ok(()) => self.clear_error(ErrorKind::MessageHistory),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to load message history");
                        self.error = Some(ErrorBanner::from_api(ErrorKind::MessageHistory, &e));
                    }
                }
            }
            Event::MarkedRead { session, result } => {
                if !self.session.as_ref().is_some_and(|s| s.id() == session) {
                    return;
                }
                match result {
                    Ok(()) => self.load_unread_total(),
                    Err(e) => tracing::warn!(error = %e, "mark as read failed"),
                }
            }
            Event::PollTick { session } => {
                if let Some(active) = self.session.as_mut().filter(|s| s.id() == session) {
                    active.on_poll_tick(&self.ctx);
                }
            }
            Event::PollResult { session, result } => {
                let summary = self
                    .session
                    .as_mut()
                    .filter(|s| s.id() == session)
                    .and_then(|active| active.on_poll_result(result));
                self.apply_summary(summary);
            }
            Event::SendCompleted {
                session,
                client_key,
                result,
            } => {
                let summary = self
                    .session
                    .as_mut()
                    .filter(|s| s.id() == session)
                    .and_then(|active| active.on_send_completed(client_key, result));
                self.apply_summary(summary);
            }
            Event::Channel {
                session,
                channel,
                event,
            } => {
                let summary = match self.session.as_mut().filter(|s| s.id() == session) {
                    Some(active) => active.on_channel_event(&self.ctx, channel, event),
                    None => None,
                };
                self.apply_summary(summary);
            }
            Event::ReconnectDue { session } => {
                if let Some(active) = self.session.as_mut().filter(|s| s.id() == session) {
                    active.on_reconnect_due(&self.ctx);
                }
            }
        }
    }

    fn select(&mut self, id: ConversationId) {
        if let Some(active) = &self.session {
            if active.conversation_id() == &id {
                if !active.is_exhausted() {
                    tracing::debug!(conversation = %id, "already selected");
                    return;
                }
                tracing::info!(conversation = %id, "restarting session after reconnects ran out");
            }
        }

        // The old session must be fully closed before the new channel opens
        if let Some(mut previous) = self.session.take() {
            previous.close();
        }

        self.next_session += 1;
        self.directory.mark_read(&id);
        self.clear_error(ErrorKind::MessageHistory);

        let mut session = MessagingSession::new(&self.ctx, self.next_session, id);
        if self.ctx.auth.is_authenticated() {
            session.start(&self.ctx);
        } else {
            tracing::warn!(conversation = %session.conversation_id(), "not authenticated");
            self.error = Some(ErrorBanner::not_authenticated());
        }
        self.session = Some(session);
    }

    fn load_conversations(&mut self) {
        self.list_generation += 1;
        let generation = self.list_generation;
        let api = self.ctx.api.clone();
        let term = self.directory.search_term().to_string();
        tracing::debug!(search = %term, generation, "listing conversations");
        self.list_task = Some(self.ctx.call(
            async move { api.list_conversations(&term).await },
            move |result| Event::ConversationsLoaded { generation, result },
        ));
    }

    fn on_conversations(
        &mut self,
        generation: u64,
        result: Result<Vec<Conversation>, ApiError>,
    ) {
        if generation != self.list_generation {
            tracing::debug!(generation, "dropping superseded conversation list");
            return;
        }
        self.list_task = None;
        match result {
            Ok(conversations) => {
                self.clear_error(ErrorKind::ConversationList);
                let nothing_selected = self.session.is_none();
                if let Some(first) = self.directory.replace(conversations, nothing_selected) {
                    tracing::info!(conversation = %first, "auto-selecting first conversation");
                    self.select(first);
                }
                self.load_unread_total();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load conversations");
                self.error = Some(ErrorBanner::from_api(ErrorKind::ConversationList, &e));
            }
        }
    }

    fn load_unread_total(&mut self) {
        let api = self.ctx.api.clone();
        self.unread_task = Some(
            self.ctx
                .call(async move { api.unread_count().await }, Event::UnreadTotal),
        );
    }

    fn apply_summary(&mut self, summary: Option<IncomingSummary>) {
        let Some(summary) = summary else {
            return;
        };
        let text = snippet(&summary.content, self.ctx.config.snippet_len);
        self.directory
            .apply_incoming_summary(&summary.conversation_id, text, summary.created_at);
    }

    fn clear_error(&mut self, kind: ErrorKind) {
        if self.error.as_ref().is_some_and(|e| e.kind == kind) {
            self.error = None;
        }
    }

    fn publish(&self) {
        let session = self.session.as_ref();
        let next = MessengerSnapshot {
            conversations: self.directory.conversations().to_vec(),
            search_term: self.directory.search_term().to_string(),
            active: session.map(|s| s.conversation_id().clone()),
            messages: session
                .map(|s| s.store().messages().to_vec())
                .unwrap_or_default(),
            history_loaded: session.is_some_and(|s| s.store().is_loaded()),
            connection: session.map(|s| s.connection().clone()).unwrap_or_default(),
            typing: session.map(|s| s.typing_users()).unwrap_or_default(),
            online: session.map(|s| s.online().snapshot()).unwrap_or_default(),
            send_state: session.map(|s| s.send_state().clone()).unwrap_or_default(),
            error: self.error.clone(),
            unread_total: self.unread_total,
        };
        self.publisher.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
