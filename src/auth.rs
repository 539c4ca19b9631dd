//! Auth session persistence.
//!
//! A bearer token and the signed-in user blob are stored as one JSON value
//! in local storage and attached to every API request. There is no
//! credential protocol here: the token is opaque and simply carried. A 401
//! from the server clears the session and broadcasts
//! [`AuthEvent::Unauthenticated`] so every UI shell can route to its login
//! screen.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::storage::{self, StorageAdapter, KEY_AUTH_SESSION};

/// Session-level events broadcast to interested subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// The server rejected our token; the session has been cleared.
    Unauthenticated,
}

/// Persisted session blob: the bearer token plus the user as returned by the
/// login endpoint (opaque to this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    token: String,
    user: Value,
}

pub struct AuthSession {
    storage: Arc<dyn StorageAdapter>,
    current: Mutex<Option<SessionData>>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthSession {
    /// Hydrate from the persisted blob; absent or corrupt blobs start
    /// signed-out.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        let current = storage
            .get(KEY_AUTH_SESSION)
            .and_then(|raw| match serde_json::from_str::<SessionData>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "auth: corrupt persisted session, starting signed out");
                    None
                }
            });
        let (events, _) = broadcast::channel(8);
        Self {
            storage,
            current: Mutex::new(current),
            events,
        }
    }

    /// Store a fresh session after a successful login call.
    pub fn login(&self, token: &str, user: Value) {
        let session = SessionData {
            token: token.to_string(),
            user,
        };
        match serde_json::to_value(&session) {
            Ok(blob) => {
                if let Err(e) = storage::write_json(self.storage.as_ref(), KEY_AUTH_SESSION, &blob)
                {
                    warn!(error = %e, "auth: failed to persist session");
                }
            }
            Err(e) => warn!(error = %e, "auth: failed to serialize session"),
        }
        if let Ok(mut current) = self.current.lock() {
            *current = Some(session);
        }
        info!("auth: session stored");
    }

    /// The bearer token, when signed in.
    pub fn token(&self) -> Option<String> {
        self.current.lock().ok()?.as_ref().map(|s| s.token.clone())
    }

    /// The signed-in user blob, when present.
    pub fn user(&self) -> Option<Value> {
        self.current.lock().ok()?.as_ref().map(|s| s.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Clear the session and wipe the token from memory.
    pub fn logout(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(mut session) = current.take() {
                session.token.zeroize();
            }
        }
        if let Err(e) = self.storage.remove(KEY_AUTH_SESSION) {
            warn!(error = %e, "auth: failed to remove persisted session");
        }
        info!("auth: session cleared");
    }

    /// Handle a 401 from the API: log the session out and notify
    /// subscribers. Safe to call repeatedly.
    pub fn handle_unauthenticated(&self) {
        let was_signed_in = self.is_authenticated();
        self.logout();
        if was_signed_in {
            warn!("auth: server rejected token, session logged out");
        }
        let _ = self.events.send(AuthEvent::Unauthenticated);
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn user() -> Value {
        serde_json::json!({ "id": "u1", "name": "Maria", "role": "admin" })
    }

    #[test]
    fn test_login_persists_and_rehydrates() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let auth = AuthSession::new(storage.clone());
            assert!(!auth.is_authenticated());
            auth.login("tok-123", user());
            assert_eq!(auth.token().as_deref(), Some("tok-123"));
        }

        let auth = AuthSession::new(storage);
        assert!(auth.is_authenticated());
        assert_eq!(auth.user().unwrap()["name"], "Maria");
    }

    #[test]
    fn test_logout_clears_memory_and_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let auth = AuthSession::new(storage.clone());
        auth.login("tok-123", user());

        auth.logout();
        assert!(!auth.is_authenticated());
        assert!(storage.get(KEY_AUTH_SESSION).is_none());
    }

    #[test]
    fn test_unauthenticated_broadcasts_and_logs_out() {
        let auth = AuthSession::new(Arc::new(MemoryStorage::new()));
        auth.login("tok-123", user());
        let mut events = auth.subscribe();

        auth.handle_unauthenticated();
        assert!(!auth.is_authenticated());
        assert!(matches!(events.try_recv(), Ok(AuthEvent::Unauthenticated)));

        // Repeated 401s keep signalling without error
        auth.handle_unauthenticated();
        assert!(matches!(events.try_recv(), Ok(AuthEvent::Unauthenticated)));
    }

    #[test]
    fn test_corrupt_session_blob_starts_signed_out() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(KEY_AUTH_SESSION, "{nope").unwrap();
        let auth = AuthSession::new(storage);
        assert!(!auth.is_authenticated());
    }
}
