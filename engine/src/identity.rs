//! # Session identity
//!
//! The identity record is written by the auth flow and only ever read here.
//! Reads are parse-or-null: a missing key, unreadable storage, or malformed
//! JSON all come back as an anonymous session, never an error.

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use serde::Deserialize;
use tracing::debug;

/// Storage key the auth flow writes the signed-in user under.
pub const IDENTITY_KEY: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

/// Derived identity, reconstructed from storage on every read. `role` is
/// only meaningful while `present` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    pub present: bool,
    pub role: Option<Role>,
}

impl SessionIdentity {
    pub fn anonymous() -> Self {
        Self {
            present: false,
            role: None,
        }
    }

    /// Whether this audience ever sees the recommendation rail.
    pub fn eligible(&self) -> bool {
        self.present && self.role != Some(Role::Admin)
    }
}

/// The persisted user record, as much of it as this subsystem cares about.
/// Profile fields beyond these are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoredUser {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub role: Option<String>,
}

impl StoredUser {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

/// Read access to the persisted client storage. Writes happen only in the
/// auth flow, so the trait is deliberately read-only.
pub trait IdentityStore: Send + Sync {
    /// Raw value stored under `key`, or `None` when absent or unreadable.
    fn load(&self, key: &str) -> Option<String>;
}

pub fn read_stored_user(store: &dyn IdentityStore) -> Option<StoredUser> {
    let raw = store.load(IDENTITY_KEY)?;
    match serde_json::from_str(&raw) {
        Ok(user) => Some(user),
        Err(e) => {
            debug!("Malformed identity record, treating as anonymous: {e}");
            None
        }
    }
}

/// Derive the current identity. Anything signed-in that is not an admin
/// counts as a customer; only the literal `"admin"` role is special-cased.
pub fn read_session(store: &dyn IdentityStore) -> SessionIdentity {
    match read_stored_user(store) {
        Some(user) => SessionIdentity {
            present: true,
            role: Some(if user.is_admin() {
                Role::Admin
            } else {
                Role::Customer
            }),
        },
        None => SessionIdentity::anonymous(),
    }
}

/// Storage keys as files under a state directory.
pub struct FileIdentityStore {
    root: PathBuf,
}

impl FileIdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.root.join(key)).ok()
    }
}

/// In-memory storage, shared by cloning. Hosts and tests mutate it to stand
/// in for the auth flow (and for other tabs).
#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: impl Into<String>) {
        self.inner
            .lock()
            .expect("identity store lock poisoned")
            .insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.inner
            .lock()
            .expect("identity store lock poisoned")
            .remove(key);
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("identity store lock poisoned")
            .clear();
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("identity store lock poisoned")
            .get(key)
            .cloned()
    }
}
