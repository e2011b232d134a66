//! Credential storage
//!
//! Only Argon2 PHC strings are ever written here, never PIN plaintext.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::types::{Result, WayguardError};

/// Key of the hash of the everyday PIN
pub const REAL_PIN_KEY: &str = "real_pin";

/// Key of the hash of the duress PIN
pub const COERCION_PIN_KEY: &str = "coercion_pin";

/// Secure key/value storage for credential hashes
pub trait SecretStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Write several entries at once. Either all of them land or none do.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store
#[derive(Default)]
pub struct MemorySecretStore {
    entries: DashMap<String, String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON file store, readable by the owner only
pub struct FileSecretStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileSecretStore {
    /// Open `path`, starting empty if the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                WayguardError::Storage(format!("Corrupt secret store {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        write_private(&tmp, &raw)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Secret store written to {}", self.path.display());
        Ok(())
    }

    /// Apply `f` to a copy, persist it, and only then swap it in
    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| WayguardError::Internal("secret store lock poisoned".into()))?;
        let mut next = entries.clone();
        f(&mut next);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| WayguardError::Internal("secret store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn set_many(&self, batch: &[(&str, &str)]) -> Result<()> {
        self.update(|entries| {
            for (key, value) in batch {
                entries.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}
