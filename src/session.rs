use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::RngCore;

use crate::models::Id;

pub const SESSION_COOKIE: &str = "pacepal.sid";

/// Upper bound on session lifetime (one year).
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Clone, Copy, Debug)]
struct SessionEntry {
    user_id: Id,
    expires_at: Instant,
}

/// Server-side session table keyed by an opaque id (process local).
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<DashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl` above [`MAX_SESSION_TTL`] is lowered to it.
    pub fn new(ttl: Duration) -> Self {
        Self { store: Arc::new(DashMap::new()), ttl: ttl.min(MAX_SESSION_TTL) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Opens a session for `user_id` and returns its id (32 random bytes, hex).
    pub fn create(&self, user_id: Id) -> String {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let sid = hex::encode(raw);
        let entry = SessionEntry { user_id, expires_at: Instant::now() + self.ttl };
        self.store.insert(sid.clone(), entry);
        sid
    }

    /// Returns the bound user, dropping the entry if it has expired.
    pub fn user_id(&self, sid: &str) -> Option<Id> {
        let entry = *self.store.get(sid)?;
        if Instant::now() >= entry.expires_at {
            self.store.remove(sid);
            return None;
        }
        Some(entry.user_id)
    }

    pub fn destroy(&self, sid: &str) {
        self.store.remove(sid);
    }

    /// Removes every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.store.len();
        self.store.retain(|_, e| now < e.expires_at);
        before.saturating_sub(self.store.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Periodic sweep on the current runtime.
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await; // first tick fires immediately
            loop {
                tick.tick().await;
                let dropped = sessions.purge_expired();
                tracing::debug!(dropped, remaining = sessions.len(), "expired sessions purged");
            }
        })
    }
}
