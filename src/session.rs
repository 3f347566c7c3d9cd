//! Conversation sessions
//!
//! One `ConversationSession` per external user, owned by the `SessionStore`.
//! Every access path locks the per-user mutex for the whole state transition,
//! so events for the same user apply in arrival order (tokio's mutex queues
//! waiters fairly) while distinct users proceed concurrently. Idle sessions
//! are evicted by a TTL sweep.

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::transport::ExternalUser;

/// Router-visible session states. An absent record is the implicit `NEW`
/// state: the next contact greets and starts department selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeted, department selection pending
    AwaitingDepartment,
    /// Department chosen, room resolved, messages relay
    Active,
}

/// Per-user router state, mutated only through state-machine transitions
#[derive(Debug)]
pub struct ConversationSession {
    pub external_user_id: String,
    pub display_name: String,
    pub handle: String,
    pub state: SessionState,
    pub selected_department_id: Option<String>,
    /// Room currently receiving this user's messages
    pub active_room_id: Option<String>,
    /// Every room provisioned in this session, keyed by department id.
    /// Re-selecting a department reuses its entry instead of creating a
    /// second room.
    pub rooms: HashMap<String, String>,
    /// Opaque short id, generated once, stable for the session's lifetime
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(user: &ExternalUser) -> Self {
        let now = Utc::now();
        Self {
            external_user_id: user.id.clone(),
            display_name: user.display(),
            handle: user.handle_or_id(),
            state: SessionState::AwaitingDepartment,
            selected_department_id: None,
            active_room_id: None,
            rooms: HashMap::new(),
            conversation_id: short_conversation_id(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Existing room for a department, if one was provisioned this session
    pub fn room_for(&self, department_id: &str) -> Option<&str> {
        self.rooms.get(department_id).map(String::as_str)
    }

    /// Record a provisioned room and make it the active relay target
    pub fn bind_room(&mut self, department_id: &str, room_id: &str) {
        self.rooms
            .insert(department_id.to_string(), room_id.to_string());
        self.selected_department_id = Some(department_id.to_string());
        self.active_room_id = Some(room_id.to_string());
        self.state = SessionState::Active;
    }
}

fn short_conversation_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

type SessionCell = Arc<Mutex<ConversationSession>>;

/// Owned table of sessions; all mutation goes through per-user locks
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionCell>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Session cell for `user`, creating a fresh record if absent.
    /// The second value is true when this call created the record.
    pub async fn entry(&self, user: &ExternalUser) -> (SessionCell, bool) {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(user.id.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(slot) => {
                let cell = Arc::new(Mutex::new(ConversationSession::new(user)));
                slot.insert(Arc::clone(&cell));
                (cell, true)
            }
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<SessionCell> {
        self.sessions.read().await.get(user_id).map(Arc::clone)
    }

    pub async fn remove(&self, user_id: &str) -> bool {
        self.sessions.write().await.remove(user_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle for at least `ttl`. Takes each session's lock
    /// before evicting, so an in-flight transition always completes first.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let snapshot: Vec<(String, SessionCell)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect();

        let mut evicted = 0;
        for (user_id, cell) in snapshot {
            let session = cell.lock().await;
            let idle = Utc::now() - session.last_activity;
            if idle.num_seconds() >= ttl.as_secs() as i64 {
                let mut sessions = self.sessions.write().await;
                // The entry may have been replaced since the snapshot.
                if sessions
                    .get(&user_id)
                    .map(|current| Arc::ptr_eq(current, &cell))
                    .unwrap_or(false)
                {
                    sessions.remove(&user_id);
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> ExternalUser {
        ExternalUser {
            id: id.to_string(),
            display_name: Some("Ada".to_string()),
            handle: Some("ada_l".to_string()),
        }
    }

    #[test]
    fn new_session_awaits_department() {
        let session = ConversationSession::new(&user("1"));
        assert_eq!(session.state, SessionState::AwaitingDepartment);
        assert!(session.active_room_id.is_none());
        assert!(session.rooms.is_empty());
        assert_eq!(session.conversation_id.len(), 8);
    }

    #[test]
    fn conversation_ids_are_unique() {
        let a = ConversationSession::new(&user("1"));
        let b = ConversationSession::new(&user("1"));
        assert_ne!(a.conversation_id, b.conversation_id);
    }

    #[test]
    fn bind_room_activates_and_switches() {
        let mut session = ConversationSession::new(&user("1"));
        session.bind_room("tech", "!r1:local");
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.active_room_id.as_deref(), Some("!r1:local"));

        session.bind_room("sales", "!r2:local");
        assert_eq!(session.active_room_id.as_deref(), Some("!r2:local"));
        // The first binding survives the switch.
        assert_eq!(session.room_for("tech"), Some("!r1:local"));
        assert_eq!(session.room_for("sales"), Some("!r2:local"));
    }

    #[tokio::test]
    async fn entry_creates_once() {
        let store = SessionStore::new();
        let (first, created) = store.entry(&user("1")).await;
        assert!(created);
        let (second, created_again) = store.entry(&user("1")).await;
        assert!(!created_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn remove_and_recreate_resets_conversation_id() {
        let store = SessionStore::new();
        let (cell, _) = store.entry(&user("1")).await;
        let original_id = cell.lock().await.conversation_id.clone();

        assert!(store.remove("1").await);
        assert!(!store.remove("1").await);

        let (fresh, created) = store.entry(&user("1")).await;
        assert!(created);
        assert_ne!(fresh.lock().await.conversation_id, original_id);
    }

    #[tokio::test]
    async fn evict_idle_drops_only_stale_sessions() {
        let store = SessionStore::new();
        store.entry(&user("stale")).await;
        store.entry(&user("fresh")).await;

        // Backdate one session past the TTL.
        {
            let cell = store.get("stale").await.unwrap();
            let mut session = cell.lock().await;
            session.last_activity = Utc::now() - chrono::Duration::hours(7);
        }

        let evicted = store.evict_idle(Duration::from_secs(21_600)).await;
        assert_eq!(evicted, 1);
        assert!(store.get("stale").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }
}
