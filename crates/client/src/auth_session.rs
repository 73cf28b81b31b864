//! Local user identity and credential sourcing.
//!
//! Obtaining and refreshing the bearer credential is the host application's
//! job; the messaging core only asks for the current value before each call.

use std::sync::{Arc, RwLock};

use dealflow_shared::Participant;

/// Supplies the current bearer credential, if any.
pub trait TokenSource: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A credential held in memory and replaced on login/logout.
#[derive(Debug, Default)]
pub struct SharedToken {
    token: RwLock<Option<String>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl TokenSource for SharedToken {
    fn token(&self) -> Option<String> {
        let guard = match self.token.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().filter(|t| !t.trim().is_empty())
    }
}

/// Credential read from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

/// The signed-in user and where their credential comes from.
#[derive(Clone)]
pub struct AuthSession {
    pub user: Participant,
    pub tokens: Arc<dyn TokenSource>,
}

impl AuthSession {
    pub fn new(user: Participant, tokens: Arc<dyn TokenSource>) -> Self {
        Self { user, tokens }
    }

    /// Check if a credential is currently available
    pub fn is_authenticated(&self) -> bool {
        self.tokens.token().is_some()
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
