//! Durable visitor identity, namespaced per site.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use innchat_core::{ConversationId, SessionId, SiteKey};

use crate::error::StorageError;

const SESSION_ENTRY: &str = "session_id";
const CONVERSATION_ENTRY: &str = "conversation_id";

/// Durable string key/value storage.
pub trait Storage: Send {
    /// Read an entry.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write an entry.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-memory storage. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file holding a flat string map.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Use the file at `path`; it is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

/// Session and conversation identifiers for each site.
///
/// When the backing storage fails, identifiers live in memory for the rest
/// of the process instead; callers never see the failure.
pub struct IdentityStore {
    storage: Box<dyn Storage>,
    ephemeral: HashMap<String, String>,
}

impl IdentityStore {
    /// Create a store over `storage`.
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self {
            storage,
            ephemeral: HashMap::new(),
        }
    }

    /// Return the site's session id, creating and persisting it on first use.
    pub fn get_or_create_session(&mut self, site: &SiteKey) -> SessionId {
        let key = site.scoped(SESSION_ENTRY);
        if let Some(existing) = self.read(&key) {
            return SessionId::new(existing);
        }

        let session_id = SessionId::generate(Utc::now().timestamp_millis());
        info!(site = %site, session_id = %session_id, "Created visitor session");
        self.write(&key, session_id.as_str());
        session_id
    }

    /// Return the site's conversation id, if one was assigned.
    pub fn get_conversation(&self, site: &SiteKey) -> Option<ConversationId> {
        self.read(&site.scoped(CONVERSATION_ENTRY))
            .map(ConversationId::new)
    }

    /// Persist the site's conversation id.
    pub fn set_conversation(&mut self, site: &SiteKey, id: &ConversationId) {
        self.write(&site.scoped(CONVERSATION_ENTRY), id.as_str());
    }

    fn read(&self, key: &str) -> Option<String> {
        if let Some(value) = self.ephemeral.get(key) {
            return Some(value.clone());
        }
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = %key, error = %e, "Identity storage unreadable, using memory");
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(key = %key, error = %e, "Identity storage unwritable, using memory");
            self.ephemeral.insert(key.to_string(), value.to_string());
        }
    }
}
