//! Real-time channel for the active conversation.
//!
//! This module provides:
//! - The channel itself: one duplex connection per selected conversation
//! - Typed inbound events and outbound commands
//! - Reconnect supervision with linear backoff and an attempt cap
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Messenger                        │
//! │   (single event loop owning the active session)     │
//! └─────────────────────────────────────────────────────┘
//!          │ open / send / close      ▲ ChannelEvent
//!          ▼                          │
//!   ┌─────────────┐  closed   ┌─────────────────────┐
//!   │ChannelHandle│──────────>│ ReconnectSupervisor │
//!   └─────────────┘           └─────────────────────┘
//!          │                          │ delay(attempt)
//!          ▼                          ▼
//!   ┌─────────────┐           ┌─────────────────────┐
//!   │  Connector  │<──────────│   ScheduledTask     │
//!   │ (tungstenite│  reopen   │  (reconnect timer)  │
//!   │  or fake)   │           └─────────────────────┘
//!   └─────────────┘
//! ```
//!
//! Events are never read by UI code directly; the messenger applies them to
//! its stores and publishes a snapshot.

mod connection;
mod supervisor;

pub use connection::{
    open, ChannelEvent, ChannelHandle, ConnectionState, ConnectionStatus, Connector, FrameSink,
    FrameStream, ReconnectConfig, TungsteniteConnector,
};
pub use supervisor::{CloseDecision, ReconnectSupervisor};
