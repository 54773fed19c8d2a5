//! Session storage for authenticated SAML principals.
//!
//! The ACS endpoint stores the [`ValidatedPrincipal`] (including its
//! credential blob) under a random session ID carried in a cookie. Later
//! requests resolve the session and recompute authorization facts from it.
//!
//! `MemorySessionStore` keeps sessions in process memory (single-node only).

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::authenticator::ValidatedPrincipal;

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,
}

/// A stored login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSession {
    /// Session ID (cookie value)
    pub id: Uuid,

    /// The principal established at login
    pub principal: ValidatedPrincipal,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the session expires
    pub expires_at: DateTime<Utc>,
}

impl PrincipalSession {
    /// New session for `principal` lasting `lifetime_secs` from now.
    ///
    /// Lifetimes beyond what a timestamp can represent saturate at the
    /// latest representable instant.
    pub fn new(principal: ValidatedPrincipal, lifetime_secs: u64) -> Self {
        let created_at = Utc::now();
        let expires_at = i64::try_from(lifetime_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| created_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            principal,
            created_at,
            expires_at,
        }
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Session store trait for principal sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session.
    async fn create_session(&self, session: PrincipalSession) -> SessionResult<Uuid>;

    /// Get a session by ID.
    async fn get_session(&self, id: Uuid) -> SessionResult<Option<PrincipalSession>>;

    /// Delete a session.
    async fn delete_session(&self, id: Uuid) -> SessionResult<()>;

    /// Remove expired sessions. Returns how many were removed.
    async fn cleanup(&self) -> SessionResult<usize>;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Session Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory session store.
///
/// Suitable for development and single-node deployments.
/// Sessions are lost on restart and not shared across nodes.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, PrincipalSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: PrincipalSession) -> SessionResult<Uuid> {
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session);
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> SessionResult<Option<PrincipalSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        Ok(())
    }

    async fn cleanup(&self) -> SessionResult<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}

/// Resolve a session ID, failing when it is unknown or expired.
pub async fn require_session(
    store: &dyn SessionStore,
    id: Uuid,
) -> SessionResult<PrincipalSession> {
    let session = store.get_session(id).await?.ok_or(SessionError::NotFound)?;
    if session.is_expired() {
        store.delete_session(id).await?;
        return Err(SessionError::Expired);
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::AttributeMap;

    fn principal(subject_id: &str) -> ValidatedPrincipal {
        ValidatedPrincipal {
            subject_id: subject_id.to_string(),
            attributes: AttributeMap::from([("groups".to_string(), vec!["admins".to_string()])]),
            credentials: "PHNhbWxwOlJlc3BvbnNlLz4=".to_string(),
            remember_me: false,
            session_index: Some("_session".to_string()),
            authenticated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_session_store() {
        let store = MemorySessionStore::new();
        let session = PrincipalSession::new(principal("jane"), 3600);
        let id = session.id;

        store.create_session(session.clone()).await.unwrap();

        let retrieved = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(retrieved, session);
        assert_eq!(retrieved.principal.credentials, "PHNhbWxwOlJlc3BvbnNlLz4=");

        store.delete_session(id).await.unwrap();
        assert!(store.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_sessions() {
        let store = MemorySessionStore::new();
        let mut expired = PrincipalSession::new(principal("old"), 3600);
        expired.expires_at = Utc::now() - Duration::seconds(1);
        let live = PrincipalSession::new(principal("new"), 3600);

        store.create_session(expired.clone()).await.unwrap();
        store.create_session(live.clone()).await.unwrap();

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert!(store.get_session(expired.id).await.unwrap().is_none());
        assert!(store.get_session(live.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_require_session() {
        let store = MemorySessionStore::new();
        let session = PrincipalSession::new(principal("jane"), 3600);
        store.create_session(session.clone()).await.unwrap();

        let found = require_session(&store, session.id).await.unwrap();
        assert_eq!(found.principal.subject_id, "jane");

        assert!(matches!(
            require_session(&store, Uuid::new_v4()).await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_require_session_drops_expired() {
        let store = MemorySessionStore::new();
        let mut session = PrincipalSession::new(principal("jane"), 3600);
        session.expires_at = Utc::now() - Duration::seconds(1);
        store.create_session(session.clone()).await.unwrap();

        assert!(matches!(
            require_session(&store, session.id).await,
            Err(SessionError::Expired)
        ));
        assert!(store.get_session(session.id).await.unwrap().is_none());
    }

    #[test]
    fn test_session_lifetime() {
        let session = PrincipalSession::new(principal("jane"), 60);
        assert!(!session.is_expired());
        assert_eq!(session.expires_at - session.created_at, Duration::seconds(60));
    }

    #[test]
    fn test_session_lifetime_saturates() {
        let session = PrincipalSession::new(principal("jane"), 10_000_000_000_000_000);
        assert_eq!(session.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!session.is_expired());

        let session = PrincipalSession::new(principal("jane"), u64::MAX);
        assert_eq!(session.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_session_serde() {
        let session = PrincipalSession::new(principal("jane"), 60);
        let json = serde_json::to_string(&session).unwrap();
        let parsed: PrincipalSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }
}
