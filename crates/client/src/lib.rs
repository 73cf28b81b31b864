//! Dealflow Client - real-time messaging core
//!
//! This crate keeps an investor/manager conversation list and the active
//! conversation's message thread in sync with the Dealflow backend, over a
//! per-conversation WebSocket with HTTP polling as the fallback.

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod error;
pub mod messenger;
pub mod poller;
pub mod send;
pub mod stores;
pub mod task;
pub mod ws;

mod session;

pub use api_client::{ApiClient, MessagingApi};
pub use auth_session::{AuthSession, EnvToken, SharedToken, TokenSource};
pub use config::MessagingConfig;
pub use error::{ConfigError, ErrorBanner, ErrorKind, MessengerError, TransportError};
pub use messenger::{Messenger, MessengerSnapshot};
pub use send::SendState;
pub use stores::{StoredMessage, TypingUser};
pub use ws::{ConnectionState, ConnectionStatus, Connector, TungsteniteConnector};
