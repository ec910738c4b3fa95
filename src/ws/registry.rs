//! Registry of live sessions

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Bookkeeping for one live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub connected_at: Instant,
}

/// Live sessions, keyed by session id.
///
/// Sessions never read each other's entries; this only feeds health reporting.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session; it is removed again when the guard drops
    pub fn register(self: &Arc<Self>, id: Uuid) -> SessionGuard {
        self.sessions.insert(
            id,
            SessionInfo {
                connected_at: Instant::now(),
            },
        );
        SessionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionInfo> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a session registered for as long as it lives
pub struct SessionGuard {
    id: Uuid,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// How long this session has been connected
    pub fn connected_for(&self) -> std::time::Duration {
        self.registry
            .get(&self.id)
            .map(|info| info.connected_at.elapsed())
            .unwrap_or_default()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.sessions.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_track_live_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register(Uuid::new_v4());
        let b = registry.register(Uuid::new_v4());
        assert_eq!(registry.active_sessions(), 2);
        assert!(registry.get(&a.id()).is_some());

        drop(a);
        assert_eq!(registry.active_sessions(), 1);
        assert!(registry.get(&b.id()).is_some());

        drop(b);
        assert_eq!(registry.active_sessions(), 0);
    }
}
