use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Keychain service name for the CLI
pub const DEFAULT_SERVICE_NAME: &str = "phatso-admin";

/// Keychain account holding the bearer credential
const CREDENTIAL_ACCOUNT: &str = "bearer-token";

/// Credential file name in the cache directory
const CREDENTIAL_FILE: &str = "credential.json";

/// Single-slot storage for the current bearer credential.
///
/// `get` never fails: a slot that cannot be read is reported as empty, which
/// the session treats the same as a missing credential.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, credential: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-process slot. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            slot: RwLock::new(Some(credential.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, credential: &str) -> Result<()> {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// OS keychain slot via `keyring`. The entry is created once and reused, so
/// every read sees what the last write stored.
#[derive(Debug)]
pub struct KeyringCredentialStore {
    entry: Entry,
}

impl KeyringCredentialStore {
    pub fn new(service: &str) -> Result<Self> {
        let entry = Entry::new(service, CREDENTIAL_ACCOUNT).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Option<String> {
        match self.entry.get_password() {
            Ok(token) => Some(token),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read credential from keychain");
                None
            }
        }
    }

    fn set(&self, credential: &str) -> Result<()> {
        self.entry
            .set_password(credential)
            .context("Failed to store credential in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    token: String,
    stored_at: DateTime<Utc>,
}

/// JSON file slot in the cache directory. Survives restarts on machines
/// without a usable keychain.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    cache_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIAL_FILE)
    }

    fn load(path: &Path) -> Result<StoredCredential> {
        let contents = std::fs::read_to_string(path).context("Failed to read credential file")?;
        serde_json::from_str(&contents).context("Failed to parse credential file")
    }

    /// Write readable by the owner only (0600 on Unix)
    fn write_private(path: &Path, contents: &str) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        #[cfg(unix)]
        {
            // `mode` only applies to newly created files
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents.as_bytes())?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        let path = self.path();
        if !path.exists() {
            return None;
        }

        match Self::load(&path) {
            Ok(stored) => {
                debug!(stored_at = %stored.stored_at, "Loaded credential from disk");
                Some(stored.token)
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable credential file");
                None
            }
        }
    }

    fn set(&self, credential: &str) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredCredential {
            token: credential.to_string(),
            stored_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        Self::write_private(&path, &contents).context("Failed to write credential file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove credential file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_slot() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get(), None);

        store.set("first").unwrap();
        store.set("second").unwrap();
        assert_eq!(store.get().as_deref(), Some("second"));

        store.clear().unwrap();
        assert_eq!(store.get(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested"));
        assert_eq!(store.get(), None);

        store.set("abc.def.ghi").unwrap();
        let reopened = FileCredentialStore::new(dir.path().join("nested"));
        assert_eq!(reopened.get().as_deref(), Some("abc.def.ghi"));

        reopened.clear().unwrap();
        assert_eq!(store.get(), None);
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

        store.set("abc.def.ghi").unwrap();
        assert_eq!(mode(&store.path()), 0o600);

        // An existing world-readable file is tightened on the next write
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        store.set("jkl.mno.pqr").unwrap();
        assert_eq!(mode(&store.path()), 0o600);
        assert_eq!(store.get().as_deref(), Some("jkl.mno.pqr"));
    }

    #[test]
    fn test_keyring_store_round_trip() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());

        let store = KeyringCredentialStore::new("phatso-admin-test").unwrap();
        assert_eq!(store.get(), None);

        store.set("a.b.c").unwrap();
        assert_eq!(store.get().as_deref(), Some("a.b.c"));
        store.set("d.e.f").unwrap();
        assert_eq!(store.get().as_deref(), Some("d.e.f"));

        store.clear().unwrap();
        assert_eq!(store.get(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.get(), None);
    }
}
