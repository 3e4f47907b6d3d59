//! Authenticated session with the CRM.
//!
//! A [`Session`] holds at most one credential at a time. It is acquired
//! lazily on the first request, reused afterwards, and released when the
//! remote side rejects it; the next request acquires a fresh one through
//! the [`CredentialProvider`].

use crate::error::Result;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Credential attached to every request of a session.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionToken {
    /// No authentication
    Anonymous,
    /// HTTP basic authentication
    Basic { username: String, password: String },
    /// Pre-negotiated session cookie, sent verbatim in the `Cookie` header
    Cookie(String),
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionToken::Anonymous => f.write_str("Anonymous"),
            SessionToken::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            SessionToken::Cookie(_) => f.write_str("Cookie(<redacted>)"),
        }
    }
}

/// Source of fresh credentials.
pub trait CredentialProvider: Send + Sync {
    fn acquire(&self) -> Result<SessionToken>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Result<SessionToken> + Send + Sync,
{
    fn acquire(&self) -> Result<SessionToken> {
        self()
    }
}

/// Always hands out the same token.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub SessionToken);

impl CredentialProvider for StaticCredentials {
    fn acquire(&self) -> Result<SessionToken> {
        Ok(self.0.clone())
    }
}

pub struct Session {
    provider: Box<dyn CredentialProvider>,
    token: Mutex<Option<SessionToken>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Session {
    pub fn new(provider: impl CredentialProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            token: Mutex::new(None),
        }
    }

    /// A session that never authenticates.
    pub fn anonymous() -> Self {
        Self::new(StaticCredentials(SessionToken::Anonymous))
    }

    /// A session using HTTP basic authentication.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(StaticCredentials(SessionToken::Basic {
            username: username.into(),
            password: password.into(),
        }))
    }

    fn slot(&self) -> MutexGuard<'_, Option<SessionToken>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current token, acquiring one if the session is inactive.
    pub fn acquire(&self) -> Result<SessionToken> {
        let mut slot = self.slot();
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        let token = self.provider.acquire()?;
        info!(?token, "session acquired");
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drop the current token.
    pub fn release(&self) {
        if self.slot().take().is_some() {
            debug!("session released");
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }
}
