//! In-memory registry of in-flight login sessions.
//!
//! A session is created when credentials pass and destroyed on final
//! success, flow restart, or TTL expiry. Sessions are ephemeral by
//! contract — nothing here is persisted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Stage a live session is waiting on. Credentials precede any session;
/// final success destroys it, so neither appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingFace,
    AwaitingSecondaryFactor,
}

#[derive(Debug, Clone)]
pub struct LoginSession {
    pub user: String,
    pub stage: Stage,
    created: Instant,
}

/// Registry keyed by server-issued opaque session ids.
pub struct SessionStore {
    ttl: Duration,
    sessions: HashMap<String, LoginSession>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: HashMap::new(),
        }
    }

    /// Create a session in the face stage, bound to one user identity.
    pub fn create(&mut self, user: &str) -> String {
        self.purge_expired();
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            LoginSession {
                user: user.to_string(),
                stage: Stage::AwaitingFace,
                created: Instant::now(),
            },
        );
        id
    }

    /// Look up a live session. Expired sessions are dropped on access.
    pub fn get(&mut self, id: &str) -> Option<&LoginSession> {
        self.purge_expired();
        self.sessions.get(id)
    }

    /// Move a face-stage session to the secondary-factor stage.
    /// Returns false if the session is gone or not in the face stage.
    pub fn advance(&mut self, id: &str) -> bool {
        self.purge_expired();
        match self.sessions.get_mut(id) {
            Some(session) if session.stage == Stage::AwaitingFace => {
                session.stage = Stage::AwaitingSecondaryFactor;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<LoginSession> {
        self.sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.sessions
            .retain(|_, session| session.created.elapsed() < ttl);
    }
}
