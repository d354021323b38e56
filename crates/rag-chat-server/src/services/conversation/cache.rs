use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::MemoryConfig;
use crate::models::chat::{Role, SessionId};

use super::types::{ConversationState, MemoryLimits, Turn};

/// Shared handle to one session; the mutex serializes same-session access
pub type SessionHandle = Arc<Mutex<ConversationState>>;

/// Thread-safe in-memory conversation cache
/// Uses DashMap for concurrent access across sessions
#[derive(Clone)]
pub struct ConversationCache {
    /// Session storage: session_id -> ConversationState
    storage: Arc<DashMap<SessionId, SessionHandle>>,

    limits: MemoryLimits,
    max_sessions: usize,
    session_ttl: Duration,

    /// Serializes session creation so the capacity check and insert are atomic
    creation_lock: Arc<Mutex<()>>,
}

impl ConversationCache {
    pub fn new(limits: MemoryLimits, max_sessions: usize, session_ttl: Duration) -> Self {
        info!(
            "Initializing conversation cache (max_tokens: {}, max_turns: {:?}, max_sessions: {}, ttl: {:?})",
            limits.max_tokens, limits.max_turns, max_sessions, session_ttl
        );
        Self {
            storage: Arc::new(DashMap::new()),
            limits,
            max_sessions: max_sessions.max(1),
            session_ttl,
            creation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            MemoryLimits {
                max_tokens: config.max_tokens,
                max_turns: config.max_turns,
            },
            config.max_sessions,
            Duration::from_secs(config.session_ttl_seconds),
        )
    }

    /// Existing session or a new empty one. Reuse counts as activity, so a
    /// session cannot expire while a request holding it is in flight.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.live_handle(session_id) {
            handle.lock().touch();
            return handle;
        }

        let _guard = self.creation_lock.lock();

        // Another request may have created it while we waited
        if let Some(handle) = self.live_handle(session_id) {
            handle.lock().touch();
            return handle;
        }

        if self.len() >= self.max_sessions {
            self.evict_least_recent();
        }

        let handle = Arc::new(Mutex::new(ConversationState::new(session_id.to_string())));
        self.storage.insert(session_id.to_string(), handle.clone());
        debug!("Created session {}", session_id);
        handle
    }

    /// Handle for a stored, non-expired session. Expired entries are dropped.
    fn live_handle(&self, session_id: &str) -> Option<SessionHandle> {
        let handle = self.storage.get(session_id).map(|entry| entry.value().clone())?;

        let expired = handle.lock().is_expired(self.session_ttl);
        if expired {
            self.drop_expired(session_id, &handle);
            return None;
        }

        Some(handle)
    }

    /// Remove `handle` only if it is still the entry stored under the id.
    /// A session recreated under the same id in the meantime is left alone.
    fn drop_expired(&self, session_id: &str, handle: &SessionHandle) {
        if self
            .storage
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
        {
            debug!("Session {} expired, removed from cache", session_id);
        }
    }

    fn evict_least_recent(&self) {
        // Snapshot handles first so no session lock is taken while a shard is held
        let handles: Vec<(SessionId, SessionHandle)> = self
            .storage
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let oldest = handles
            .into_iter()
            .map(|(id, handle)| {
                let last_activity = handle.lock().last_activity;
                (id, last_activity)
            })
            .min_by_key(|(_, last_activity)| *last_activity);

        if let Some((id, _)) = oldest {
            self.storage.remove(&id);
            info!("Session capacity reached, evicted least recently active session {}", id);
        }
    }

    /// Last `n` turns, oldest first. Does not create the session.
    pub fn recent_turns(&self, session_id: &str, n: usize) -> Vec<Turn> {
        let handle = match self.storage.get(session_id) {
            Some(entry) => entry.value().clone(),
            None => return Vec::new(),
        };
        let state = handle.lock();
        state.recent(n)
    }

    /// Append one turn, creating the session if needed
    pub fn append(&self, session_id: &str, role: Role, content: String) -> Turn {
        let handle = self.get_or_create(session_id);
        let mut state = handle.lock();
        state.push(role, content, &self.limits)
    }

    /// Append a user turn and its reply under one lock so they stay adjacent
    pub fn append_exchange(
        &self,
        session_id: &str,
        user_message: String,
        assistant_message: String,
    ) -> (Turn, Turn) {
        let handle = self.get_or_create(session_id);
        let mut state = handle.lock();
        let user = state.push(Role::User, user_message, &self.limits);
        let assistant = state.push(Role::Assistant, assistant_message, &self.limits);
        (user, assistant)
    }

    /// Full stored history, or None for an unknown session
    pub fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        let handle = self.live_handle(session_id)?;
        let state = handle.lock();
        Some(state.turns.iter().cloned().collect())
    }

    /// Get number of active sessions
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Cleanup expired sessions
    /// Returns number of sessions removed
    pub fn cleanup_expired(&self) -> usize {
        let start_len = self.len();
        let ttl = self.session_ttl;
        self.storage
            .retain(|_, handle: &mut SessionHandle| !handle.lock().is_expired(ttl));
        let end_len = self.len();

        let count = start_len.saturating_sub(end_len);

        if count > 0 {
            info!("Cleaned up {} expired sessions", count);
        }

        count
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        let handles: Vec<SessionHandle> =
            self.storage.iter().map(|entry| entry.value().clone()).collect();
        let mut stats = CacheStats {
            active_sessions: handles.len(),
            ..CacheStats::default()
        };

        for handle in &handles {
            let state = handle.lock();
            stats.stored_turns += state.turns.len();
            stats.total_turns += state.metadata.total_turns;
            stats.evicted_turns += state.metadata.evicted_turns;
        }

        stats
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub active_sessions: usize,
    pub stored_turns: usize,

    /// Turns appended across live sessions, including evicted ones
    pub total_turns: usize,

    /// Turns dropped by the per-session memory bound
    pub evicted_turns: usize,
}
