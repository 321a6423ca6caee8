//! Identity session state shared with the mounted chat views.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_sessions::Session;

use crate::AppResult;

pub const CSRF_STATE: &str = "csrf_state";
pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const RETURN_URL: &str = "return_url";
pub const IDENTITY: &str = "identity";

/// The signed-in user's profile as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Loading,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub status: Status,
}

impl SessionState {
    pub fn loading(&self) -> bool {
        self.status == Status::Loading
    }

    pub fn phase(&self) -> AuthPhase {
        match (&self.status, &self.identity) {
            (Status::Loading, _) => AuthPhase::Loading,
            (Status::Ready, Some(_)) => AuthPhase::Authenticated,
            (Status::Ready, None) => AuthPhase::Unauthenticated,
        }
    }

    /// Where the chat view must send the browser instead, if anywhere.
    pub fn redirect(&self) -> Option<&'static str> {
        match self.phase() {
            AuthPhase::Unauthenticated => Some("/login?return_url=/chat"),
            _ => None,
        }
    }
}

/// `return_url` when it stays on this site, `fallback` otherwise.
pub fn return_target(return_url: Option<String>, fallback: &str) -> String {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") => url,
        _ => fallback.to_owned(),
    }
}

/// `{identity, status}` for one browser session. Clones share state, and
/// every auth-state change is observable through [`SessionProvider::subscribe`].
#[derive(Clone)]
pub struct SessionProvider {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState {
            identity: None,
            status: Status::Loading,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Applies an auth-state determination. The first one moves the session
    /// out of `Loading`; subscribers are only woken when something changed.
    pub fn auth_state_changed(&self, identity: Option<Identity>) -> bool {
        self.tx.send_if_modified(|state| {
            let modified = state.status == Status::Loading || state.identity != identity;
            state.status = Status::Ready;
            state.identity = identity;
            modified
        })
    }

    /// Whether anything besides the hub still holds or watches this provider.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.tx) > 1 || self.tx.receiver_count() > 0
    }
}

/// One [`SessionProvider`] per browser session, so that signing in or out
/// reaches every chat view that browser has open.
#[derive(Clone, Default)]
pub struct SessionHub {
    providers: Arc<Mutex<HashMap<String, SessionProvider>>>,
}

impl SessionHub {
    pub fn provider(&self, session_id: &str) -> SessionProvider {
        let mut providers = self.providers.lock().unwrap_or_else(PoisonError::into_inner);
        providers.retain(|id, provider| id == session_id || provider.in_use());
        providers
            .entry(session_id.to_owned())
            .or_default()
            .clone()
    }

    /// Provider for the request's session, determined from the stored identity.
    pub async fn mount(&self, session: &Session) -> AppResult<SessionProvider> {
        let identity = session.get::<Identity>(IDENTITY).await?;
        let provider = match session.id() {
            Some(id) => self.provider(&id.to_string()),
            None => SessionProvider::new(),
        };
        provider.auth_state_changed(identity);
        Ok(provider)
    }

    /// Notifies the views of `session_id`, if any are open.
    pub fn notify(&self, session_id: &str, identity: Option<Identity>) {
        let providers = self.providers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = providers.get(session_id) {
            provider.auth_state_changed(identity);
        }
    }
}
