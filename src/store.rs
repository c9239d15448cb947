//! Durable session store.
//!
//! Each session is serialized as JSON under `conversation:<id>` in a
//! [`KeyValueStorage`]. Entries that fail to parse are treated as absent and
//! deleted so a single corrupted write cannot wedge the history.

use tracing::{debug, warn};

use crate::observability::{STORE_HEALED, STORE_WRITE_ERRORS, STORE_WRITES};
use crate::storage::KeyValueStorage;
use crate::{Error, Result, Session, SessionId};

/// Prefix shared by every session key.
pub const SESSION_KEY_PREFIX: &str = "conversation:";

/// Storage key for a session id.
pub fn session_key(id: SessionId) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

/// Sessions persisted in a key-value backend.
#[derive(Debug)]
pub struct SessionStore<S: KeyValueStorage> {
    storage: S,
}

impl<S: KeyValueStorage> SessionStore<S> {
    /// Create a new `SessionStore` over `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Every readable session, most recently updated first.
    pub fn list(&self) -> Result<Vec<Session>> {
        let keys = self.storage.list_keys(SESSION_KEY_PREFIX)?;
        let mut sessions: Vec<Session> = keys
            .iter()
            .filter_map(|key| self.read_key(key))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Fetch one session; `None` when missing or unreadable.
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.read_key(&session_key(id))
    }

    /// Write `session`, replacing any stored copy with the same id.
    pub fn put(&self, session: &Session) -> Result<()> {
        let key = session_key(session.id);
        let json = serde_json::to_string(session).map_err(|err| {
            STORE_WRITE_ERRORS.click();
            Error::serialization(
                format!("failed to serialize session {}", session.id),
                Some(Box::new(err)),
            )
        })?;
        match self.storage.set(&key, &json) {
            Ok(()) => {
                STORE_WRITES.click();
                debug!(session = %session.id, bytes = json.len(), "stored session");
                Ok(())
            }
            Err(err) => {
                STORE_WRITE_ERRORS.click();
                Err(Error::storage(format!("failed to save session: {err}"), Some(key)))
            }
        }
    }

    /// Remove a session. Removing a missing session succeeds.
    pub fn delete(&self, id: SessionId) -> Result<()> {
        let key = session_key(id);
        self.storage
            .remove(&key)
            .map_err(|err| Error::storage(format!("failed to delete session: {err}"), Some(key)))
    }

    /// Remove every stored session.
    pub fn clear(&self) -> Result<()> {
        for key in self.storage.list_keys(SESSION_KEY_PREFIX)? {
            self.storage.remove(&key).map_err(|err| {
                Error::storage(format!("failed to delete session: {err}"), Some(key.clone()))
            })?;
        }
        Ok(())
    }

    fn read_key(&self, key: &str) -> Option<Session> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "failed to read stored session");
                return None;
            }
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(key, error = %err, "removing corrupted session entry");
                STORE_HEALED.click();
                if let Err(err) = self.storage.remove(key) {
                    warn!(key, error = %err, "failed to remove corrupted session entry");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::Message;
    use crate::storage::{MemoryStorage, NullStorage};

    fn session(id: u64, text: &str) -> Session {
        Session::new(
            SessionId::new(id),
            vec![Message::user(text), Message::assistant("Noted.")],
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = SessionStore::new(MemoryStorage::new());
        let original = session(1, "bench press tips");
        store.put(&original).unwrap();
        assert_eq!(store.get(original.id), Some(original));
    }

    #[test]
    fn put_overwrites_by_id() {
        let store = SessionStore::new(MemoryStorage::new());
        let mut s = session(1, "first");
        store.put(&s).unwrap();
        s.replace_messages(vec![Message::user("second")]);
        store.put(&s).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.get(s.id).unwrap().messages[0].text, "second");
    }

    #[test]
    fn list_is_most_recently_updated_first() {
        let store = SessionStore::new(MemoryStorage::new());
        let mut older = session(1, "older");
        let mut newer = session(2, "newer");
        older.updated_at = time::macros::datetime!(2024-01-01 00:00 UTC);
        older.created_at = older.updated_at;
        newer.updated_at = time::macros::datetime!(2024-02-01 00:00 UTC);
        newer.created_at = newer.updated_at;
        store.put(&older).unwrap();
        store.put(&newer).unwrap();
        let ids: Vec<SessionId> = store.list().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId::new(2), SessionId::new(1)]);
    }

    #[test]
    fn corrupted_entries_are_removed() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Arc::clone(&storage));
        store.put(&session(1, "good")).unwrap();
        storage.set("conversation:2", "{not json").unwrap();

        assert_eq!(store.get(SessionId::new(2)), None);
        assert_eq!(storage.get("conversation:2").unwrap(), None);

        storage.set("conversation:3", "[]").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(storage.get("conversation:3").unwrap(), None);
    }

    #[test]
    fn foreign_keys_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("lang", "ar").unwrap();
        let store = SessionStore::new(Arc::clone(&storage));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(storage.get("lang").unwrap().as_deref(), Some("ar"));
    }

    #[test]
    fn delete_and_clear() {
        let store = SessionStore::new(MemoryStorage::new());
        store.put(&session(1, "a")).unwrap();
        store.put(&session(2, "b")).unwrap();
        store.delete(SessionId::new(1)).unwrap();
        store.delete(SessionId::new(1)).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        store.clear().unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn null_backend_is_always_empty() {
        let store = SessionStore::new(NullStorage);
        tokio_test::assert_ok!(store.put(&session(1, "gone")));
        assert!(store.get(SessionId::new(1)).is_none());
    }
}
