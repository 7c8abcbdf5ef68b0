//! Storage configuration and backend selection.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::StorageError;
use crate::storage::{MemoryStorage, Storage, USERNAME_TTL};

/// File extension of on-disk sessions.
pub const SESSION_EXTENSION: &str = "session";

/// How [`open_storage`] picks and configures a backend.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Directory holding `<name>.session`.
    pub workdir:        PathBuf,
    /// Run from this session string, in memory.
    pub session_string: Option<String>,
    /// Keep the session in memory only, starting empty.
    pub in_memory:      bool,
    /// How long a cached username stays resolvable.
    pub username_ttl:   Duration,
    /// Written to a freshly created session so it targets the test DCs.
    pub test_mode:      bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workdir:        PathBuf::from("."),
            session_string: None,
            in_memory:      false,
            username_ttl:   USERNAME_TTL,
            test_mode:      false,
        }
    }
}

impl StorageConfig {
    /// Where the on-disk session named `name` lives.
    pub fn session_path(&self, name: &str) -> PathBuf {
        self.workdir.join(format!("{name}.{SESSION_EXTENSION}"))
    }
}

/// Build the backend `config` asks for and open it.
///
/// A session string wins over `in_memory`, which wins over the on-disk file.
/// The on-disk backend is SQLite when the `sqlite-session` feature is enabled
/// and the binary file format otherwise.
pub fn open_storage(name: &str, config: &StorageConfig) -> Result<Box<dyn Storage>, StorageError> {
    let storage: Box<dyn Storage> = if let Some(s) = &config.session_string {
        Box::new(MemoryStorage::from_session_string(s.clone()).with_username_ttl(config.username_ttl))
    } else if config.in_memory {
        Box::new(MemoryStorage::new().with_username_ttl(config.username_ttl))
    } else {
        on_disk(name, config)
    };

    storage.open()?;
    if config.session_string.is_none() && storage.auth_key()?.is_none() {
        storage.set_test_mode(config.test_mode)?;
    }
    tracing::info!("[storage] Opened {} ({})", name, storage.name());
    Ok(storage)
}

#[cfg(feature = "sqlite-session")]
fn on_disk(name: &str, config: &StorageConfig) -> Box<dyn Storage> {
    let path = config.session_path(name);
    Box::new(crate::storage::SqliteStorage::new(path).with_username_ttl(config.username_ttl))
}

#[cfg(not(feature = "sqlite-session"))]
fn on_disk(name: &str, config: &StorageConfig) -> Box<dyn Storage> {
    let path = config.session_path(name);
    Box::new(crate::storage::FileStorage::new(path).with_username_ttl(config.username_ttl))
}
