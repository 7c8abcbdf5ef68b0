//! Ephemeral storage backend.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::StorageError;
use crate::record::{AUTH_KEY_LEN, PeerRecord, UpdateState};

use super::{
    Lifecycle, SessionState, Storage, USERNAME_TTL, cache_operations, decode_for_import, state_accessors,
    unix_now,
};

/// A session backend that stores nothing on disk.
///
/// Useful for tests, for bots that should always start fresh, or for running
/// from a session string: when seeded with one, [`Storage::open`] imports it.
pub struct MemoryStorage {
    session_string: Option<String>,
    username_ttl:   Duration,
    inner:          Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    lifecycle: Lifecycle,
    state:     SessionState,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            session_string: None,
            username_ttl:   USERNAME_TTL,
            inner:          Mutex::new(Inner::default()),
        }
    }

    /// A backend whose `open` imports `session_string`.
    pub fn from_session_string(session_string: impl Into<String>) -> Self {
        Self { session_string: Some(session_string.into()), ..Self::new() }
    }

    pub fn with_username_ttl(mut self, ttl: Duration) -> Self {
        self.username_ttl = ttl;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<T>(&self, f: impl FnOnce(&SessionState) -> T) -> Result<T, StorageError> {
        let inner = self.lock();
        inner.lifecycle.ensure_open()?;
        Ok(f(&inner.state))
    }

    fn with_state_mut<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> Result<T, StorageError> {
        let mut inner = self.lock();
        inner.lifecycle.ensure_open()?;
        Ok(f(&mut inner.state))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self { Self::new() }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str { "in-memory" }

    fn open(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        match inner.lifecycle {
            Lifecycle::Deleted => return Err(StorageError::Deleted),
            Lifecycle::Open    => return Ok(()),
            Lifecycle::Closed  => {}
            Lifecycle::Created => {
                if let Some(s) = &self.session_string {
                    let (record, layout) = decode_for_import(s)?;
                    inner.state.apply_record(&record);
                    tracing::info!("[storage] Imported {layout:?} session string");
                }
            }
        }
        inner.lifecycle = Lifecycle::Open;
        Ok(())
    }

    fn save(&self) -> Result<(), StorageError> {
        let now = unix_now();
        self.with_state_mut(|s| s.date = now)
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.lifecycle == Lifecycle::Open {
            inner.lifecycle = Lifecycle::Closed;
            tracing::info!("[storage] Closed in-memory session");
        }
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.state = SessionState::default();
        inner.lifecycle = Lifecycle::Deleted;
        tracing::info!("[storage] Deleted in-memory session");
        Ok(())
    }

    state_accessors! {
        dc_id, set_dc_id: u8;
        api_id, set_api_id: u32;
        test_mode, set_test_mode: bool;
        auth_key, set_auth_key: Option<[u8; AUTH_KEY_LEN]>;
        date, set_date: i32;
        user_id, set_user_id: Option<u64>;
        is_bot, set_is_bot: bool;
        server_address, set_server_address: String;
        server_address_v6, set_server_address_v6: String;
        server_port, set_server_port: u32;
        media_address, set_media_address: String;
        media_address_v6, set_media_address_v6: String;
        media_port, set_media_port: u32;
    }

    cache_operations!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_storage_rejects_access() {
        let s = MemoryStorage::new();
        assert!(matches!(s.dc_id(), Err(StorageError::NotOpen)));
        s.open().unwrap();
        s.close().unwrap();
        s.close().unwrap();
        assert!(matches!(s.api_id(), Err(StorageError::NotOpen)));
    }

    #[test]
    fn failed_import_leaves_storage_closed() {
        let s = MemoryStorage::from_session_string("not a session");
        assert!(matches!(s.open(), Err(StorageError::Session(_))));
        assert!(matches!(s.open(), Err(StorageError::Session(_))));
        assert!(matches!(s.dc_id(), Err(StorageError::NotOpen)));
    }

    #[test]
    fn reopening_keeps_state() {
        let s = MemoryStorage::new();
        s.open().unwrap();
        s.set_api_id(42).unwrap();
        s.close().unwrap();
        s.open().unwrap();
        assert_eq!(s.api_id().unwrap(), 42);
    }
}
