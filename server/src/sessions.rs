//! In-memory browse sessions with idle expiry and a size cap.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use lookalike_core::{BrowseState, SessionStore};

struct SessionEntry {
    state: BrowseState,
    touched_at: Instant,
}

pub(crate) struct SessionMap {
    entries: DashMap<String, SessionEntry>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionMap {
    pub(crate) fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_sessions,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.duration_since(entry.touched_at) >= self.ttl
    }

    fn evict_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        before.saturating_sub(self.entries.len())
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().touched_at)
            .map(|entry| entry.key().clone());
        if let Some(token) = oldest {
            self.entries.remove(&token);
        }
    }
}

impl SessionStore for SessionMap {
    fn get(&self, token: &str) -> Option<BrowseState> {
        let now = Instant::now();
        let state = {
            let entry = self.entries.get(token)?;
            if self.is_expired(&entry, now) {
                None
            } else {
                Some(entry.state.clone())
            }
        };
        if state.is_none() {
            self.entries
                .remove_if(token, |_, entry| self.is_expired(entry, now));
        }
        state
    }

    fn put(&self, token: &str, state: BrowseState) {
        let now = Instant::now();
        if !self.entries.contains_key(token) && self.entries.len() >= self.max_sessions {
            let expired = self.evict_expired(now);
            if self.entries.len() >= self.max_sessions {
                self.evict_oldest();
            }
            tracing::debug!(
                expired,
                sessions = self.entries.len(),
                "session store at capacity"
            );
        }
        self.entries.insert(
            token.to_string(),
            SessionEntry {
                state,
                touched_at: now,
            },
        );
    }
}

pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
