//! Session store: who is logged in right now, in this tab.
//!
//! The in-memory copy is an `ArcSwap` so the transport and the live channel
//! always read the current token without taking a lock. The persisted copy
//! lives behind `SessionStorage`; one storage instance is one independent
//! tab, so two users can be logged in side by side.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use campuslink_protocol::{PersistedSession, Session, User, UserPatch};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Session storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw key/value slot holding the serialized session
pub trait SessionStorage: Send + Sync {
    fn read_raw(&self) -> Result<Option<String>, StorageError>;
    fn write_raw(&self, raw: &str) -> Result<(), StorageError>;
    fn remove(&self) -> Result<(), StorageError>;
}

/// Lives as long as the process. The default tab-scoped backend.
#[derive(Default)]
pub struct MemoryStorage {
    slot: ArcSwapOption<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn read_raw(&self) -> Result<Option<String>, StorageError> {
        Ok(self.slot.load_full().map(|raw| raw.as_ref().clone()))
    }

    fn write_raw(&self, raw: &str) -> Result<(), StorageError> {
        self.slot.store(Some(Arc::new(raw.to_string())));
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        self.slot.store(None);
        Ok(())
    }
}

/// JSON file on disk. Each file acts as its own tab.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn read_raw(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_raw(&self, raw: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_persisted(storage: &dyn SessionStorage) -> Result<Option<Session>, StorageError> {
    let Some(raw) = storage.read_raw()? else {
        return Ok(None);
    };
    let persisted: PersistedSession = serde_json::from_str(&raw)?;
    Ok(Some(persisted.state))
}

/// Shared handle to the tab's session (cheap to Clone).
#[derive(Clone)]
pub struct SessionStore {
    current: Arc<ArcSwap<Session>>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Load the persisted session before anything else reads it.
    ///
    /// Unreadable or corrupt storage starts the tab logged out.
    pub fn hydrate(storage: Arc<dyn SessionStorage>) -> Self {
        let session = match parse_persisted(storage.as_ref()) {
            Ok(Some(session)) => session,
            Ok(None) => Session::default(),
            Err(e) => {
                debug!(
                    component = "session",
                    event = "session.hydrate.unreadable",
                    error = %e,
                    "Ignoring unreadable persisted session"
                );
                Session::default()
            }
        };

        Self {
            current: Arc::new(ArcSwap::from_pointee(session)),
            storage,
        }
    }

    /// A fresh tab with nothing persisted
    pub fn in_memory() -> Self {
        Self::hydrate(Arc::new(MemoryStorage::new()))
    }

    /// Lock-free read of the in-memory session
    pub fn current(&self) -> Arc<Session> {
        self.current.load_full()
    }

    pub fn user(&self) -> Option<User> {
        self.current().user.clone()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.current().user.as_ref().map(|u| u.id)
    }

    /// Replace the session unconditionally and persist it.
    pub fn login(&self, user: User, token: String) -> Result<(), StorageError> {
        let session = Session::new(user, token);
        info!(
            component = "session",
            event = "session.login",
            user_id = session.user.as_ref().map(|u| u.id),
            "Session established"
        );
        self.current.store(Arc::new(session.clone()));
        self.persist(session)
    }

    /// Clear the session and its persisted copy.
    pub fn logout(&self) -> Result<(), StorageError> {
        info!(
            component = "session",
            event = "session.logout",
            "Session cleared"
        );
        self.current.store(Arc::new(Session::default()));
        self.storage.remove()
    }

    /// Shallow-merge `patch` into the current user. Returns false, changing
    /// nothing, when nobody is logged in.
    pub fn update_user(&self, patch: &UserPatch) -> Result<bool, StorageError> {
        let session = self.current();
        let (Some(user), Some(token)) = (session.user.as_ref(), session.token.as_ref()) else {
            return Ok(false);
        };

        let mut user = user.clone();
        apply_patch(&mut user, patch);
        let updated = Session::new(user, token.clone());
        self.current.store(Arc::new(updated.clone()));
        self.persist(updated)?;
        Ok(true)
    }

    /// True iff both a user and a token are present.
    ///
    /// When memory says no, the persisted copy is consulted directly; a
    /// session written there by another path is adopted into memory.
    pub fn is_authenticated(&self) -> bool {
        if self.current().is_authenticated() {
            return true;
        }
        match self.read_persisted() {
            Some(session) if session.is_authenticated() => {
                self.current.store(Arc::new(session));
                true
            }
            _ => false,
        }
    }

    /// Bearer token for outgoing calls, read from memory with the persisted
    /// copy as fallback.
    pub fn token(&self) -> Option<String> {
        let session = self.current();
        if let Some(token) = session.token.as_deref().filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
        self.read_persisted()
            .and_then(|s| s.token)
            .filter(|t| !t.is_empty())
    }

    /// Persisted session, with read and parse failures treated as absent.
    pub fn read_persisted(&self) -> Option<Session> {
        match parse_persisted(self.storage.as_ref()) {
            Ok(session) => session,
            Err(e) => {
                debug!(
                    component = "session",
                    event = "session.storage.unreadable",
                    error = %e,
                    "Persisted session unreadable, treating as logged out"
                );
                None
            }
        }
    }

    fn persist(&self, session: Session) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&PersistedSession { state: session })?;
        self.storage.write_raw(&raw)
    }
}

fn apply_patch(user: &mut User, patch: &UserPatch) {
    if let Some(name) = &patch.name {
        user.name = name.clone();
    }
    if let Some(email) = &patch.email {
        user.email = email.clone();
    }
    if let Some(username) = &patch.username {
        user.username = username.clone();
    }
    if let Some(department) = &patch.department {
        user.department = Some(department.clone());
    }
    if let Some(phone) = &patch.phone {
        user.phone = Some(phone.clone());
    }
    if let Some(location) = &patch.location {
        user.location = Some(location.clone());
    }
    if let Some(path) = &patch.profile_image_path {
        user.profile_image_path = Some(path.clone());
    }
}

#[cfg(test)]
pub(crate) fn test_user(id: i64) -> User {
    User {
        id,
        name: "Asha Raman".into(),
        email: "asha@gct.ac.in".into(),
        username: "asha".into(),
        role: campuslink_protocol::Role::Student,
        department: Some("CSE".into()),
        phone: None,
        location: None,
        profile_image_path: None,
        is_verified: Some(true),
    }
}
