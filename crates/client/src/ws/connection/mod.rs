//! Duplex channel for a single conversation.
//!
//! This module provides the shared connection types and the channel run loop;
//! the concrete socket implementation lives in `connection_native`.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dealflow_shared::{decode_server_frame, ClientCommand, InboundFrame, ServerEvent};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use url::Url;

use crate::error::TransportError;
use crate::task::ScheduledTask;

/// Coarse connection status of the active conversation's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection state exposed to the UI and consulted by the fallback poller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Reconnect attempts made since the last successful open.
    pub reconnect_attempts: u32,
    /// A reconnect attempt is scheduled.
    pub retry_pending: bool,
    /// The attempt cap was reached; no further automatic reconnects.
    pub exhausted: bool,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Whether the fallback poller may run in this state.
    pub fn needs_polling(&self) -> bool {
        !self.is_connected()
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts per conversation selection
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}

/// Outgoing half of a connected socket, carrying text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half of a connected socket, yielding text frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Establishes duplex connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// Lifecycle and inbound traffic of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Event(ServerEvent),
    /// The channel ended without being closed through its handle. A failed
    /// connect is reported the same way.
    Closed { reason: Option<String> },
}

/// Handle for sending commands through an open channel.
///
/// Dropping the handle tears the channel down.
#[derive(Debug)]
pub struct ChannelHandle {
    sender: UnboundedSender<ClientCommand>,
    task: ScheduledTask,
}

impl ChannelHandle {
    /// Queue a command for transmission.
    ///
    /// Fails only when the channel task has already ended; success does not
    /// mean the server received the frame.
    pub fn send(&self, cmd: ClientCommand) -> Result<(), TransportError> {
        self.sender
            .unbounded_send(cmd)
            .map_err(|_| TransportError::Closed)
    }

    /// Release the connection. Idempotent.
    pub fn close(&self) {
        self.sender.close_channel();
        self.task.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.task.is_finished()
    }
}

/// Open a channel to `url`, reporting lifecycle and inbound events through
/// `on_event`.
///
/// Never fails: a construction or connect error is delivered as
/// [`ChannelEvent::Closed`].
pub fn open(
    connector: Arc<dyn Connector>,
    url: Url,
    on_event: impl Fn(ChannelEvent) + Send + Sync + 'static,
) -> ChannelHandle {
    let (sender, receiver) = unbounded();
    let task = ScheduledTask::spawn(run_channel(connector, url, receiver, on_event));
    ChannelHandle { sender, task }
}

/// Address with the credential stripped, for logs.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

async fn run_channel(
    connector: Arc<dyn Connector>,
    url: Url,
    mut outbound: UnboundedReceiver<ClientCommand>,
    on_event: impl Fn(ChannelEvent) + Send + Sync + 'static,
) {
    let target = redacted(&url);

    let (mut sink, mut stream) = match connector.connect(&url).await {
        Ok(halves) => halves,
        Err(e) => {
            tracing::warn!(url = %target, error = %e, "channel connect failed");
            on_event(ChannelEvent::Closed {
                reason: Some(e.to_string()),
            });
            return;
        }
    };

    tracing::info!(url = %target, "channel connected");
    on_event(ChannelEvent::Opened);

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(text)) => dispatch_frame(&text, &on_event),
                Some(Err(e)) => {
                    tracing::warn!(url = %target, error = %e, "channel read failed");
                    break Some(e.to_string());
                }
                None => {
                    tracing::info!(url = %target, "channel closed by server");
                    break None;
                }
            },
            cmd = outbound.next() => match cmd {
                Some(cmd) => match cmd.to_frame() {
                    Ok(json) => {
                        tracing::debug!(url = %target, frame = %json, "sending frame");
                        if let Err(e) = sink.send(json).await {
                            tracing::warn!(url = %target, error = %e, "channel send failed");
                            break Some(e.to_string());
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize command"),
                },
                None => {
                    // Handle dropped or closed; this is a deliberate close.
                    let _ = sink.close().await;
                    return;
                }
            },
        }
    };

    on_event(ChannelEvent::Closed { reason });
}

fn dispatch_frame(text: &str, on_event: &impl Fn(ChannelEvent)) {
    match decode_server_frame(text) {
        Ok(InboundFrame::Event(event)) => on_event(ChannelEvent::Event(event)),
        Ok(InboundFrame::Unknown { kind }) => {
            tracing::debug!(kind = %kind, "ignoring unknown frame type");
        }
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed frame");
        }
    }
}

// Include the socket implementation
mod connection_native;
pub use connection_native::TungsteniteConnector;
