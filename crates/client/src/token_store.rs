//! Process-wide session holder with persistence.
//!
//! The store is the single source of truth for "is a session present". Anyone
//! may read it; only [`crate::SessionClient`] writes it, which is why the
//! write API is crate-private.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use changa_shared::{Session, User};
use chrono::{DateTime, Utc};

use crate::storage::{self, KeyValueStore, MemoryStore};

const TOKEN_KEY: &str = "changa_token";
const USER_KEY: &str = "changa_user";
const ISSUED_AT_KEY: &str = "changa_issued_at";

pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    session: RwLock<Option<Session>>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl TokenStore {
    /// Hydrate the store from persisted keys.
    ///
    /// A token without a user (or a user without a token) is purged.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let token = storage.load_raw(TOKEN_KEY).filter(|t| !t.trim().is_empty());
        let user: Option<User> = storage::load(storage.as_ref(), USER_KEY);

        let session = match (token, user) {
            (Some(token), Some(user)) => {
                let issued_at: DateTime<Utc> =
                    storage::load(storage.as_ref(), ISSUED_AT_KEY).unwrap_or_else(Utc::now);
                Some(Session {
                    token,
                    user,
                    issued_at,
                })
            }
            (None, None) => None,
            _ => {
                tracing::warn!("purging partial persisted session");
                remove_persisted(storage.as_ref());
                None
            }
        };

        if let Some(s) = &session {
            tracing::debug!(user_id = %s.user.id, "restored persisted session");
        }

        Self {
            storage,
            session: RwLock::new(session),
        }
    }

    /// An empty store that persists nothing beyond the process.
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryStore::new()))
    }

    pub fn session(&self) -> Option<Session> {
        self.read().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.read().as_ref().map(|s| s.user.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.user.id.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    /// Replace the whole session.
    pub(crate) fn set(&self, session: Session) {
        persist(self.storage.as_ref(), &session);
        *self.write() = Some(session);
    }

    /// Swap the token of the present session. Returns `false` (and changes
    /// nothing) when no session is present.
    pub(crate) fn set_token(&self, token: &str) -> bool {
        let mut guard = self.write();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if session.token == token {
            return true;
        }
        session.token = token.to_string();
        session.issued_at = Utc::now();
        persist(self.storage.as_ref(), session);
        true
    }

    /// Evict the session. Returns whether one was present.
    pub(crate) fn clear(&self) -> bool {
        let previous = self.write().take();
        remove_persisted(self.storage.as_ref());
        previous.is_some()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn persist(storage: &dyn KeyValueStore, session: &Session) {
    let ok = storage.save_raw(TOKEN_KEY, &session.token)
        && storage::save(storage, USER_KEY, &session.user)
        && storage::save(storage, ISSUED_AT_KEY, &session.issued_at);
    if !ok {
        tracing::warn!("session could not be persisted; it will not survive a restart");
    }
}

fn remove_persisted(storage: &dyn KeyValueStore) {
    storage.remove_raw(TOKEN_KEY);
    storage.remove_raw(USER_KEY);
    storage.remove_raw(ISSUED_AT_KEY);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use changa_shared::Role;

    pub(crate) fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: id.to_uppercase(),
            role: Role::User,
        }
    }

    /// In-memory store holding a session for `user_id` with `token`.
    pub(crate) fn signed_in(user_id: &str, token: &str) -> Arc<TokenStore> {
        let store = TokenStore::in_memory();
        store.set(Session::new(token, user(user_id)));
        Arc::new(store)
    }

    #[test]
    fn session_survives_reload() {
        let backing: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = TokenStore::load(backing.clone());
        assert!(!store.is_authenticated());

        store.set(Session::new("T1", user("u1")));

        let reloaded = TokenStore::load(backing);
        let session = reloaded.session().unwrap();
        assert_eq!(session.token, "T1");
        assert_eq!(session.user.id, "u1");
        assert_eq!(session.issued_at, store.session().unwrap().issued_at);
    }

    #[test]
    fn partial_session_is_purged() {
        let backing: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        backing.save_raw(TOKEN_KEY, "orphan");

        let store = TokenStore::load(backing.clone());
        assert!(!store.is_authenticated());
        assert_eq!(backing.load_raw(TOKEN_KEY), None);

        storage::save(backing.as_ref(), USER_KEY, &user("u1"));
        let store = TokenStore::load(backing.clone());
        assert!(!store.is_authenticated());
        assert_eq!(backing.load_raw(USER_KEY), None);
    }

    #[test]
    fn set_token_requires_a_session() {
        let store = TokenStore::in_memory();
        assert!(!store.set_token("T2"));
        assert_eq!(store.token(), None);

        store.set(Session::new("T1", user("u1")));
        assert!(store.set_token("T2"));
        assert_eq!(store.token().as_deref(), Some("T2"));
        assert_eq!(store.user_id().as_deref(), Some("u1"));
    }

    #[test]
    fn clear_removes_everything() {
        let backing: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = TokenStore::load(backing.clone());
        store.set(Session::new("T1", user("u1")));

        assert!(store.clear());
        assert!(!store.clear());
        assert!(!store.is_authenticated());
        assert!(!TokenStore::load(backing).is_authenticated());
    }
}
