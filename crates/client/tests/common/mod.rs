//! In-memory backend and channel connector shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dealflow_client::{
    AuthSession, Connector, Messenger, MessengerSnapshot, MessagingApi, MessagingConfig,
    SharedToken, TransportError,
};
use dealflow_client::ws::{FrameSink, FrameStream};
use dealflow_shared::{
    ApiError, ClientCommand, Conversation, ConversationDetail, ConversationId, LastMessage,
    Message, Participant, SendMessageRequest, ServerEvent,
};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use tokio::sync::watch;
use url::Url;

pub fn me() -> Participant {
    Participant::new("me", "Morgan Reed")
}

pub fn counterpart(id: &str) -> Participant {
    let mut p = Participant::new(format!("user-{id}"), format!("Investor {id}"));
    p.role = Some("Investor".into());
    p
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn conversation(id: &str, unread: u32) -> Conversation {
    Conversation {
        id: id.into(),
        participant: counterpart(id),
        last_message: Some(LastMessage {
            content: format!("earlier note in {id}"),
            created_at: at(0),
        }),
        unread_count: unread,
        status: Some("active".into()),
    }
}

pub fn message(id: &str, conversation: &str, sender: Participant, content: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        conversation: conversation.into(),
        sender,
        content: content.into(),
        created_at: at(secs),
        is_edited: false,
        is_deleted: false,
        parent_message: None,
        client_key: None,
    }
}

// --- Fake REST backend ---

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    List(String),
    Get(ConversationId),
    MarkRead(ConversationId),
    UnreadCount,
    Send(SendMessageRequest),
}

#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<ApiCall>>,
    conversations: Mutex<Vec<Conversation>>,
    history: Mutex<HashMap<ConversationId, Vec<Message>>>,
    fail_sends: AtomicBool,
    fail_lists: AtomicBool,
    next_id: AtomicU64,
    unread_total: AtomicU32,
}

impl FakeApi {
    pub fn with_conversations(conversations: Vec<Conversation>) -> Arc<Self> {
        let total = conversations.iter().map(|c| c.unread_count).sum();
        let api = Self::default();
        api.unread_total.store(total, Ordering::SeqCst);
        *api.conversations.lock().unwrap() = conversations;
        Arc::new(api)
    }

    pub fn set_history(&self, id: &str, messages: Vec<Message>) {
        self.history.lock().unwrap().insert(id.into(), messages);
    }

    pub fn push_history(&self, message: Message) {
        self.history
            .lock()
            .unwrap()
            .entry(message.conversation.clone())
            .or_default()
            .push(message);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn fetches(&self, id: &str) -> usize {
        let id = ConversationId::from(id);
        self.count(|c| matches!(c, ApiCall::Get(got) if *got == id))
    }

    pub fn sends(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Send(_)))
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MessagingApi for FakeApi {
    async fn list_conversations(&self, search: &str) -> Result<Vec<Conversation>, ApiError> {
        self.record(ApiCall::List(search.to_string()));
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ApiError::Http {
                status: 502,
                body: r#"{"detail":"Upstream unavailable."}"#.into(),
            });
        }
        let term = search.trim().to_lowercase();
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| term.is_empty() || c.participant.name.to_lowercase().contains(&term))
            .cloned()
            .collect())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationDetail, ApiError> {
        self.record(ApiCall::Get(id.clone()));
        Ok(ConversationDetail {
            id: id.clone(),
            messages: self.history.lock().unwrap().get(id).cloned().unwrap_or_default(),
        })
    }

    async fn mark_as_read(&self, id: &ConversationId) -> Result<(), ApiError> {
        self.record(ApiCall::MarkRead(id.clone()));
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(conv) = conversations.iter_mut().find(|c| &c.id == id) {
            self.unread_total.fetch_sub(conv.unread_count, Ordering::SeqCst);
            conv.unread_count = 0;
        }
        Ok(())
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        self.record(ApiCall::UnreadCount);
        Ok(self.unread_total.load(Ordering::SeqCst))
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message, ApiError> {
        self.record(ApiCall::Send(request.clone()));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Http {
                status: 503,
                body: r#"{"detail":"Messaging is temporarily unavailable."}"#.into(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut confirmed = message(
            &format!("srv-{n}"),
            request.conversation.as_str(),
            me(),
            &request.content,
            3_600 + n as i64,
        );
        confirmed.parent_message = request.parent_message.clone();
        confirmed.client_key = Some(request.client_key);
        self.push_history(confirmed.clone());
        Ok(confirmed)
    }
}

// --- Fake duplex channel ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Refuse,
    Accept,
}

pub struct FakeChannel {
    pub url: Url,
    inbound: UnboundedSender<Result<String, TransportError>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FakeChannel {
    pub fn push(&self, event: &ServerEvent) {
        let frame = serde_json::to_string(event).unwrap();
        let _ = self.inbound.unbounded_send(Ok(frame));
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.inbound.unbounded_send(Ok(frame.to_string()));
    }

    /// End the stream as if the server went away.
    pub fn drop_connection(&self) {
        self.inbound.close_channel();
    }

    /// The client side has released the channel.
    pub fn is_released(&self) -> bool {
        self.inbound.is_closed()
    }

    pub fn sent(&self) -> Vec<ClientCommand> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }
}

pub struct FakeConnector {
    mode: Mutex<ConnectMode>,
    attempts: Mutex<Vec<Url>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeConnector {
    pub fn new(mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            attempts: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn attempts(&self) -> Vec<Url> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<FakeChannel> {
        self.channels
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no channel was accepted")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        self.attempts.lock().unwrap().push(url.clone());
        if *self.mode.lock().unwrap() == ConnectMode::Refuse {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (inbound, stream) = unbounded();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = futures_util::sink::unfold(sent.clone(), |log: Arc<Mutex<Vec<String>>>, frame: String| async move {
            log.lock().unwrap().push(frame);
            Ok::<_, TransportError>(log)
        });
        self.channels.lock().unwrap().push(Arc::new(FakeChannel {
            url: url.clone(),
            inbound,
            sent,
        }));
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// --- Harness ---

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub connector: Arc<FakeConnector>,
    pub messenger: Messenger,
    pub updates: watch::Receiver<MessengerSnapshot>,
}

impl Harness {
    pub fn start(api: Arc<FakeApi>, mode: ConnectMode) -> Self {
        Self::start_with_token(api, mode, Some("test-token"))
    }

    pub fn start_with_token(api: Arc<FakeApi>, mode: ConnectMode, token: Option<&str>) -> Self {
        let connector = FakeConnector::new(mode);
        let auth = AuthSession::new(me(), Arc::new(SharedToken::new(token.map(String::from))));
        let messenger = Messenger::spawn(
            MessagingConfig::default(),
            api.clone(),
            connector.clone(),
            auth,
        );
        let updates = messenger.subscribe();
        Self {
            api,
            connector,
            messenger,
            updates,
        }
    }

    /// Wait until `pred` holds for a published snapshot.
    pub async fn wait_for(
        &mut self,
        what: &str,
        pred: impl Fn(&MessengerSnapshot) -> bool,
    ) -> MessengerSnapshot {
        let updates = &mut self.updates;
        let found = tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                {
                    let snapshot = updates.borrow_and_update();
                    if pred(&snapshot) {
                        return snapshot.clone();
                    }
                }
                if updates.changed().await.is_err() {
                    panic!("messenger stopped while waiting for {what}");
                }
            }
        })
        .await;
        match found {
            Ok(snapshot) => snapshot,
            Err(_) => panic!("timed out waiting for {what}"),
        }
    }

    /// Let queued events drain without moving the clock far.
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pub async fn connected(&mut self, id: &str) -> MessengerSnapshot {
        let id = ConversationId::from(id);
        self.wait_for("connected channel", move |s| {
            s.active.as_ref() == Some(&id) && s.connection.is_connected() && s.history_loaded
        })
        .await
    }
}
