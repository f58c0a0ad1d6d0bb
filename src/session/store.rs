use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Fixed keys the session occupies in client storage.
pub const KEY_USER_ID: &str = "auth.user_id";
pub const KEY_USER_NAME: &str = "auth.user_name";
pub const KEY_TOKEN: &str = "auth.token";
pub const KEY_EXPIRES_AT: &str = "auth.expires_at";

/// Durable key-value storage surviving restarts. The runtime's cross-tab
/// storage events are delivered by the embedder calling
/// `SessionStore::handle_storage_event`.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// The locally persisted identity, independent of the backend's native
/// session. Presence of a valid, unexpired token plus a user id means
/// "locally authenticated".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSession {
    pub user_id: String,
    pub user_name: String,
    pub auth_token: String,
    pub expires_at: OffsetDateTime,
}

impl LocalSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }
}

/// Session-changed notification. Carries only a timestamp: consumers must
/// re-read persisted state rather than trust event content.
#[derive(Debug, Clone, Copy)]
pub struct SessionEvent {
    pub at: OffsetDateTime,
}

type Subscriber = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Owner of the locally persisted session, with an explicit lifecycle
/// (load / get / set / clear / subscribe). Injected wherever auth state is
/// needed instead of being read from ambient storage.
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    ttl: Duration,
    current: Mutex<Option<LocalSession>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>, ttl_days: i64) -> Self {
        let store = Self {
            storage,
            ttl: Duration::days(ttl_days),
            current: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        };
        store.reload();
        store
    }

    /// Re-derive the in-memory session from storage. Corrupt state (token
    /// present but identity fields missing) and expired sessions are
    /// cleared rather than surfaced.
    fn reload(&self) {
        let token = self.storage.get(KEY_TOKEN);
        let user_id = self.storage.get(KEY_USER_ID);
        let user_name = self.storage.get(KEY_USER_NAME);

        let session = match (token, user_id, user_name) {
            (Some(auth_token), Some(user_id), Some(user_name))
                if !user_id.is_empty() && !user_name.is_empty() =>
            {
                let expires_at = self
                    .storage
                    .get(KEY_EXPIRES_AT)
                    .and_then(|v| v.parse::<i64>().ok())
                    .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
                match expires_at {
                    Some(expires_at) => Some(LocalSession {
                        user_id,
                        user_name,
                        auth_token,
                        expires_at,
                    }),
                    None => {
                        warn!("stored session has no usable expiry, clearing");
                        None
                    }
                }
            }
            (Some(_), _, _) => {
                warn!("stored session is missing identity fields, clearing");
                None
            }
            _ => None,
        };

        let session = session.filter(|s| {
            if s.is_expired() {
                debug!(user_id = %s.user_id, "stored session expired");
                false
            } else {
                true
            }
        });

        if session.is_none() {
            self.remove_keys();
        }
        *self.current.lock().unwrap() = session;
    }

    pub fn get(&self) -> Option<LocalSession> {
        self.current.lock().unwrap().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().map(|s| !s.is_expired()).unwrap_or(false)
    }

    /// Persist a fresh session under the fixed keys. Does not notify;
    /// callers announce the change once their own follow-up work is done.
    pub fn set(&self, user_id: &str, user_name: &str) -> LocalSession {
        let session = LocalSession {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            auth_token: Uuid::new_v4().to_string(),
            expires_at: OffsetDateTime::now_utc() + self.ttl,
        };
        self.storage.set(KEY_USER_ID, &session.user_id);
        self.storage.set(KEY_USER_NAME, &session.user_name);
        self.storage.set(KEY_TOKEN, &session.auth_token);
        self.storage.set(
            KEY_EXPIRES_AT,
            &session.expires_at.unix_timestamp().to_string(),
        );
        *self.current.lock().unwrap() = Some(session.clone());
        session
    }

    /// Remove the session. Idempotent; only touches the auth-owned keys.
    pub fn clear(&self) {
        self.remove_keys();
        *self.current.lock().unwrap() = None;
    }

    fn remove_keys(&self) {
        for key in [KEY_USER_ID, KEY_USER_NAME, KEY_TOKEN, KEY_EXPIRES_AT] {
            self.storage.remove(key);
        }
    }

    pub fn subscribe(&self, subscriber: impl Fn(SessionEvent) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Box::new(subscriber));
    }

    /// Synchronously dispatch a session-changed event to every subscriber.
    pub fn notify_changed(&self) {
        let event = SessionEvent {
            at: OffsetDateTime::now_utc(),
        };
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(event);
        }
    }

    /// Another tab/window mutated storage: re-derive state and re-announce.
    /// Concurrent writers are last-write-wins.
    pub fn handle_storage_event(&self) {
        self.reload();
        self.notify_changed();
    }
}

/// In-memory `SessionStorage` for tests and short-lived tools.
#[derive(Default)]
pub struct MemStorage {
    map: Mutex<HashMap<String, String>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }
}

/// `SessionStorage` persisted as a JSON object in a single file, the
/// localStorage equivalent for the console binary. Write failures are
/// logged, not raised: local storage problems must not break the flow.
pub struct FileStorage {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let map = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "session file unreadable, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            map: Mutex::new(map),
        }
    }

    fn flush(&self, map: &HashMap<String, String>) {
        match serde_json::to_string_pretty(map) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&self.path, contents) {
                    error!(error = %e, path = %self.path.display(), "session file write failed");
                }
            }
            Err(e) => error!(error = %e, "session serialization failed"),
        }
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.map.lock().unwrap();
        map.insert(key.to_string(), value.to_string());
        self.flush(&map);
    }

    fn remove(&self, key: &str) {
        let mut map = self.map.lock().unwrap();
        map.remove(key);
        self.flush(&map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_then_get_roundtrips() {
        let storage = Arc::new(MemStorage::new());
        let store = SessionStore::new(storage, 30);

        let session = store.set("u1", "Maria");
        assert_eq!(session.user_id, "u1");
        assert!(!session.auth_token.is_empty());
        assert_eq!(store.get().unwrap(), session);
        assert!(store.is_authenticated());
    }

    #[test]
    fn fresh_store_reads_what_a_previous_one_wrote() {
        let storage = Arc::new(MemStorage::new());
        SessionStore::new(storage.clone(), 30).set("u1", "Maria");

        let store = SessionStore::new(storage, 30);
        assert_eq!(store.get().unwrap().user_id, "u1");
    }

    #[test]
    fn clear_is_idempotent() {
        let storage = Arc::new(MemStorage::new());
        let store = SessionStore::new(storage, 30);
        store.set("u1", "Maria");

        store.clear();
        store.clear();
        assert!(store.get().is_none());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn token_without_identity_is_corruption_and_gets_cleared() {
        let storage = Arc::new(MemStorage::new());
        storage.set(KEY_TOKEN, "tok-abc");

        let store = SessionStore::new(storage.clone(), 30);
        assert!(store.get().is_none());
        assert!(storage.get(KEY_TOKEN).is_none());
    }

    #[test]
    fn expired_session_is_not_authenticated() {
        let storage = Arc::new(MemStorage::new());
        storage.set(KEY_USER_ID, "u1");
        storage.set(KEY_USER_NAME, "Maria");
        storage.set(KEY_TOKEN, "tok-abc");
        let past = OffsetDateTime::now_utc() - Duration::days(1);
        storage.set(KEY_EXPIRES_AT, &past.unix_timestamp().to_string());

        let store = SessionStore::new(storage, 30);
        assert!(store.get().is_none());
    }

    #[test]
    fn last_write_wins_across_stores_sharing_storage() {
        let storage = Arc::new(MemStorage::new());
        let tab_a = SessionStore::new(storage.clone(), 30);
        let tab_b = SessionStore::new(storage.clone(), 30);

        tab_a.set("u1", "Maria");
        tab_b.set("u2", "Joao");

        // a third, freshly opened tab observes the last write
        let tab_c = SessionStore::new(storage, 30);
        assert_eq!(tab_c.get().unwrap().user_id, "u2");
    }

    #[test]
    fn storage_event_rederives_state_and_notifies() {
        let storage = Arc::new(MemStorage::new());
        let store = SessionStore::new(storage.clone(), 30);

        let fired = Arc::new(AtomicUsize::new(0));
        let observed = fired.clone();
        store.subscribe(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        // another tab writes a session directly into shared storage
        SessionStore::new(storage, 30).set("u9", "Ana");
        assert!(store.get().is_none());

        store.handle_storage_event();
        assert_eq!(store.get().unwrap().user_id, "u9");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("carteira-auth-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.json");

        {
            let storage = FileStorage::new(&path);
            storage.set(KEY_USER_ID, "u1");
            storage.set(KEY_USER_NAME, "Maria");
        }
        let storage = FileStorage::new(&path);
        assert_eq!(storage.get(KEY_USER_ID).as_deref(), Some("u1"));
        storage.remove(KEY_USER_ID);
        assert!(storage.get(KEY_USER_ID).is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
