//! Dealflow Client - terminal driver
//!
//! Runs the messaging core against a live backend and prints what a UI would
//! render. Commands are read from stdin:
//!
//! - `/search <term>` filter the conversation list
//! - `/select <id>` open a conversation
//! - `/reply <message-id> <text>` reply to a message
//! - `/refresh` re-list conversations
//! - `/quit` exit
//! - anything else is sent to the active conversation

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use dealflow_client::{
    stores::{format_relative, MessageKey},
    ApiClient, AuthSession, ConnectionState, EnvToken, Messenger, MessengerSnapshot,
    MessagingConfig, SendState, TokenSource, TungsteniteConnector,
};
use dealflow_shared::{Conversation, ConversationId, Participant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dealflow_client=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = MessagingConfig::from_env();
    let tokens: Arc<dyn TokenSource> = Arc::new(EnvToken::new("DEALFLOW_TOKEN"));
    let user_id = std::env::var("DEALFLOW_USER_ID").context("DEALFLOW_USER_ID is not set")?;
    let user_name = std::env::var("DEALFLOW_USER_NAME").unwrap_or_else(|_| user_id.clone());
    let auth = AuthSession::new(Participant::new(user_id, user_name), tokens.clone());

    tracing::info!(api = %config.api_base_url, "starting messaging client");
    let api = Arc::new(ApiClient::new(config.api_base_url.clone(), tokens));
    let messenger = Messenger::spawn(config, api, Arc::new(TungsteniteConnector), auth);

    let mut updates = messenger.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = View::default();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                view.render(&snapshot);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !run_command(&messenger, line.trim())? {
                    break;
                }
            }
        }
    }

    messenger.shutdown().await;
    Ok(())
}

/// Returns false when the user asked to quit.
fn run_command(messenger: &Messenger, line: &str) -> anyhow::Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "/quit" => return Ok(false),
        "/search" => messenger.search(rest.trim())?,
        "/select" => messenger.select_conversation(ConversationId::new(rest.trim()))?,
        "/refresh" => messenger.refresh()?,
        "/reply" => match rest.split_once(' ') {
            Some((parent, text)) => messenger.send_reply(text, parent.into())?,
            None => eprintln!("usage: /reply <message-id> <text>"),
        },
        _ if command.starts_with('/') => eprintln!("unknown command {command}"),
        _ => messenger.send_message(line)?,
    }
    Ok(true)
}

/// Prints only what changed since the previous snapshot.
#[derive(Default)]
struct View {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    printed: HashSet<MessageKey>,
    connection: ConnectionState,
    typing: Vec<String>,
    send_state: SendState,
    error: Option<String>,
    unread_total: u32,
}

impl View {
    fn render(&mut self, snapshot: &MessengerSnapshot) {
        let now = Utc::now();

        if snapshot.conversations != self.conversations || snapshot.unread_total != self.unread_total {
            println!("== conversations ({} unread) ==", snapshot.unread_total);
            for conv in &snapshot.conversations {
                let last = conv
                    .last_message
                    .as_ref()
                    .map(|m| format!("{} · {}", m.content, format_relative(m.created_at, now)))
                    .unwrap_or_default();
                println!(
                    "  [{}] {} ({}) unread={} {}",
                    conv.id,
                    conv.participant.name,
                    conv.participant.initials(),
                    conv.unread_count,
                    last
                );
            }
            self.conversations = snapshot.conversations.clone();
            self.unread_total = snapshot.unread_total;
        }

        if snapshot.active != self.active {
            if let Some(active) = &snapshot.active {
                println!("== conversation {active} ==");
            }
            self.active = snapshot.active.clone();
            self.printed.clear();
        }

        for msg in &snapshot.messages {
            if self.printed.insert(msg.key.clone()) {
                let marker = match (msg.is_pending(), msg.edited) {
                    (true, _) => " (sending)",
                    (false, true) => " (edited)",
                    _ => "",
                };
                println!(
                    "{} {}: {}{}",
                    msg.created_at.format("%H:%M"),
                    msg.sender.name,
                    msg.display_content(),
                    marker
                );
            }
        }

        if snapshot.connection != self.connection {
            let c = &snapshot.connection;
            println!(
                "-- connection: {:?} (attempts {}, retrying {}, gave up {})",
                c.status, c.reconnect_attempts, c.retry_pending, c.exhausted
            );
            self.connection = c.clone();
        }

        let typing: Vec<String> = snapshot
            .typing
            .iter()
            .map(|t| t.name.clone().unwrap_or_else(|| t.id.to_string()))
            .collect();
        if typing != self.typing {
            if !typing.is_empty() {
                println!("-- {} typing…", typing.join(", "));
            }
            self.typing = typing;
        }

        if snapshot.send_state != self.send_state {
            if let SendState::Failed { content, error } = &snapshot.send_state {
                println!("!! send failed: {} (draft kept: {content})", error.message);
            }
            self.send_state = snapshot.send_state.clone();
        }

        let error = snapshot.error.as_ref().map(|e| e.message.clone());
        if error != self.error {
            if let Some(message) = &error {
                println!("!! {message}");
            }
            self.error = error;
        }
    }
}
