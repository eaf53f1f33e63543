use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;

use super::SessionData;

/// Fixed name the session record is stored under, in every backend.
pub const SESSION_STORAGE_KEY: &str = "auth-storage";

/// Durable home for the session record.
pub trait SessionStorage: Send + Sync {
    /// Read the record back, `None` if nothing was persisted
    fn load(&self) -> Result<Option<SessionData>>;

    fn save(&self, data: &SessionData) -> Result<()>;

    /// Erase the record. Erasing a missing record is not an error.
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File
// ============================================================================

/// JSON file in the cache directory.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", SESSION_STORAGE_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        let data = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        // Written aside and renamed so the record is never world-readable or half-written
        let staging = self.staging_path();
        write_private(&staging, contents.as_bytes())
            .context("Failed to write session file")?;
        std::fs::rename(&staging, &self.path)
            .context("Failed to replace session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// The record holds a bearer credential, so the file is owner-only from the
/// moment it exists.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs::{OpenOptions, Permissions};
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies when the file is created
    file.set_permissions(Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)?;
    Ok(())
}

// ============================================================================
// OS keychain
// ============================================================================

/// Session record kept as the secret of an OS keychain entry.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, SESSION_STORAGE_KEY).context("Failed to create keyring entry")
    }
}

impl SessionStorage for KeyringStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let data = serde_json::from_str(&secret)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(data))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let secret = serde_json::to_string(data)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local storage, for sessions that must not outlive the process.
#[derive(Default)]
pub struct MemoryStorage {
    record: Mutex<Option<SessionData>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(data: SessionData) -> Self {
        Self {
            record: Mutex::new(Some(data)),
        }
    }

    /// Currently stored record
    pub fn record(&self) -> Option<SessionData> {
        self.record.lock().clone()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        Ok(self.record())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        *self.record.lock() = Some(data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.record.lock() = None;
        Ok(())
    }
}
