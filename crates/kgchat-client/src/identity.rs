//! Durable session identity.
//!
//! The identity is generated once per user profile, written to a file under
//! `~/.kgchat/`, and reused by every later connection and every other
//! process sharing the profile. The backend uses it to bind a fresh
//! transport to the prior conversation.
//!
//! [`SessionIdentityStore::get_or_create_session_id`] never fails: if the
//! file cannot be read or written the generated value is kept in memory for
//! the life of the store and a warning is logged.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use kgchat_settings::SessionSettings;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// File name of the persisted identity inside the kgchat home directory.
pub const IDENTITY_FILE_NAME: &str = "browser_session_id";

/// Generate a new identity: `session_` followed by a UUID v7
/// (millisecond timestamp plus random bits).
pub fn generate_session_id() -> String {
    format!("session_{}", Uuid::now_v7().simple())
}

/// File-backed store for the durable session identity.
pub struct SessionIdentityStore {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl SessionIdentityStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Store at `~/.kgchat/browser_session_id`.
    pub fn at_default_location() -> Self {
        Self::new(kgchat_settings::kgchat_home().join(IDENTITY_FILE_NAME))
    }

    /// Store at the configured path, or the default location.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        match &settings.identity_path {
            Some(path) => Self::new(path.clone()),
            None => Self::at_default_location(),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the persisted identity, creating and persisting one on first use.
    pub fn get_or_create_session_id(&self) -> String {
        let mut cached = self.cached.lock();
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = match read_identity(&self.path) {
            Some(id) => {
                debug!(path = %self.path.display(), "loaded session identity");
                id
            }
            None => self.create(),
        };
        *cached = Some(id.clone());
        id
    }

    fn create(&self) -> String {
        let id = generate_session_id();
        match persist_new(&self.path, &id) {
            Ok(()) => {
                debug!(path = %self.path.display(), "persisted new session identity");
                id
            }
            // Another process won the race; adopt its value.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                read_identity(&self.path).unwrap_or(id)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "could not persist session identity; using in-memory value"
                );
                id
            }
        }
    }
}

fn read_identity(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let id = content.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Write `id` to `path`, failing with `AlreadyExists` if the file is there.
fn persist_new(path: &Path, id: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        // An empty file left by an interrupted write is not a valid identity.
        Err(e) if e.kind() == ErrorKind::AlreadyExists && read_identity(path).is_none() => {
            OpenOptions::new().write(true).truncate(true).open(path)?
        }
        Err(e) => return Err(e),
    };
    file.write_all(id.as_bytes())?;
    file.sync_all()
}
