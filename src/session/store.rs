//! TTL+LRU-evicted in-memory cache of sessions. A single mutex covers the
//! map and its LRU order; entries beyond the TTL or past the size cap are
//! swept on every read/write.

use super::Session;
use crate::errors::ExecError;
use lru::LruCache;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct SessionEntry {
    session: Arc<Session>,
    last_used: Instant,
}

struct StoreInner {
    cache: LruCache<String, SessionEntry>,
    ttl: Duration,
    max_sessions: usize,
}

impl StoreInner {
    /// Evict expired entries, scanning from the LRU tail forward and
    /// stopping at the first entry still within the TTL (since LRU order
    /// tracks `last_used` order exactly: every touch both promotes to MRU
    /// and bumps `last_used`).
    fn evict_expired(&mut self) {
        if self.ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        loop {
            match self.cache.peek_lru() {
                Some((_, entry)) if now.duration_since(entry.last_used) > self.ttl => {
                    if let Some((_, entry)) = self.cache.pop_lru() {
                        entry.session.close();
                    }
                }
                _ => break,
            }
        }
    }

    fn evict_over_limit(&mut self) {
        if self.max_sessions == 0 {
            return;
        }
        while self.cache.len() > self.max_sessions {
            if let Some((_, entry)) = self.cache.pop_lru() {
                entry.session.close();
            } else {
                break;
            }
        }
    }
}

/// Generate a session ID: `sess_` followed by 16 random bytes, hex-encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    for byte in &mut bytes {
        *byte = fastrand::u8(..);
    }
    let mut hex = String::with_capacity(5 + bytes.len() * 2);
    hex.push_str("sess_");
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// TTL+LRU-evicted map of session ID -> [`Session`]. `ttl == 0` disables TTL
/// eviction; `max_sessions == 0` disables LRU eviction.
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                cache: LruCache::unbounded(),
                ttl,
                max_sessions,
            }),
        }
    }

    /// Create and register a new session, returning a handle to it.
    pub fn new_session(&self) -> Arc<Session> {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner.evict_expired();
        inner.evict_over_limit();

        let id = generate_session_id();
        let session = Arc::new(Session::new(id.clone()));
        inner.cache.put(
            id,
            SessionEntry {
                session: session.clone(),
                last_used: Instant::now(),
            },
        );
        inner.evict_over_limit();
        session
    }

    /// Fetch a session by ID, touching it (moving it to MRU, refreshing
    /// `last_used`). Returns `None` if unknown, expired, or closed.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner.evict_expired();
        let entry = inner.cache.get_mut(id)?;
        if entry.session.is_closed() {
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    /// Look up a session by ID, returning a structured error if unknown.
    pub fn require(&self, id: &str) -> Result<Arc<Session>, ExecError> {
        self.get(id).ok_or_else(|| ExecError::not_found(format!("unknown sessionID: {id}")))
    }

    /// Remove and close a session.
    pub fn delete(&self, id: &str) {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        if let Some(entry) = inner.cache.pop(id) {
            entry.session.close();
        }
    }

    /// Negative values are clamped to zero by the caller before reaching
    /// here (the wire-level type is unsigned); setting the TTL triggers an
    /// eviction pass immediately.
    pub fn set_ttl(&self, ttl: Duration) {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner.ttl = ttl;
        inner.evict_expired();
    }

    pub fn set_max_sessions(&self, max_sessions: usize) {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner.max_sessions = max_sessions;
        inner.evict_over_limit();
    }

    pub fn size(&self) -> usize {
        let mut inner = self.inner.lock().expect("session store mutex poisoned");
        inner.evict_expired();
        inner.cache.len()
    }
}
