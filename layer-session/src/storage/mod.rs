//! Pluggable session storage.
//!
//! The [`Storage`] trait is the contract every backend satisfies: a
//! lifecycle (`open` / `save` / `close` / `delete`), a getter and setter for
//! each scalar session field, a peer cache, and the update-state tuple.
//!
//! Built-in backends:
//! * [`MemoryStorage`] — nothing touches disk; optionally seeded from a
//!   session string.
//! * [`FileStorage`] — a compact binary snapshot file.
//! * [`SqliteStorage`] — SQLite (requires the `sqlite-session` Cargo feature).

use std::time::Duration;

use crate::errors::StorageError;
use crate::record::{AUTH_KEY_LEN, PeerRecord, SessionRecord, UpdateState};
use crate::session_string::{self, DecodedSession, SessionLayout};

mod cache;
mod file;
mod memory;
#[cfg(feature = "sqlite-session")]
mod sqlite;

pub use file::FileStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "sqlite-session")]
pub use sqlite::SqliteStorage;

/// Cached usernames older than this are not trusted by
/// [`Storage::get_peer_by_username`].
pub const USERNAME_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// DC a fresh session starts on.
pub const DEFAULT_DC_ID: u8 = 2;

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Where and how a client session is persisted.
///
/// Lifecycle methods and scalar accessors are required. The peer cache and
/// update-state operations default to [`StorageError::NotImplemented`], so a
/// backend that only cares about credentials can leave them out.
///
/// Every method takes `&self`; backends synchronize internally, so each call
/// is atomic with respect to the others and `save` never observes a
/// half-applied mutation.
pub trait Storage: Send + Sync {
    /// Human-readable name of this backend (for log messages).
    fn name(&self) -> &str;

    /// Load (or create) the stored session. Must precede every other call.
    fn open(&self) -> Result<(), StorageError>;

    /// Persist everything mutated since the previous `save`. Repeatable.
    fn save(&self) -> Result<(), StorageError>;

    /// Persist and release the store. Closing twice is a no-op.
    fn close(&self) -> Result<(), StorageError>;

    /// Remove all persisted state. The backend is unusable afterwards.
    fn delete(&self) -> Result<(), StorageError>;

    // ── Scalar fields ──────────────────────────────────────────────────────

    fn dc_id(&self) -> Result<u8, StorageError>;
    fn set_dc_id(&self, value: u8) -> Result<(), StorageError>;

    fn api_id(&self) -> Result<u32, StorageError>;
    fn set_api_id(&self, value: u32) -> Result<(), StorageError>;

    fn test_mode(&self) -> Result<bool, StorageError>;
    fn set_test_mode(&self, value: bool) -> Result<(), StorageError>;

    fn auth_key(&self) -> Result<Option<[u8; AUTH_KEY_LEN]>, StorageError>;
    fn set_auth_key(&self, value: Option<[u8; AUTH_KEY_LEN]>) -> Result<(), StorageError>;

    /// Unix time of the last `save`.
    fn date(&self) -> Result<i32, StorageError>;
    fn set_date(&self, value: i32) -> Result<(), StorageError>;

    fn user_id(&self) -> Result<Option<u64>, StorageError>;
    fn set_user_id(&self, value: Option<u64>) -> Result<(), StorageError>;

    fn is_bot(&self) -> Result<bool, StorageError>;
    fn set_is_bot(&self, value: bool) -> Result<(), StorageError>;

    fn server_address(&self) -> Result<String, StorageError>;
    fn set_server_address(&self, value: String) -> Result<(), StorageError>;

    fn server_address_v6(&self) -> Result<String, StorageError>;
    fn set_server_address_v6(&self, value: String) -> Result<(), StorageError>;

    fn server_port(&self) -> Result<u32, StorageError>;
    fn set_server_port(&self, value: u32) -> Result<(), StorageError>;

    fn media_address(&self) -> Result<String, StorageError>;
    fn set_media_address(&self, value: String) -> Result<(), StorageError>;

    fn media_address_v6(&self) -> Result<String, StorageError>;
    fn set_media_address_v6(&self, value: String) -> Result<(), StorageError>;

    fn media_port(&self) -> Result<u32, StorageError>;
    fn set_media_port(&self, value: u32) -> Result<(), StorageError>;

    // ── Peer cache ─────────────────────────────────────────────────────────

    /// Insert or replace a batch of peers. All of them become visible, or
    /// none do.
    ///
    /// A peer's `username`, when present, replaces every username known for
    /// it; `None` leaves them alone.
    fn update_peers(&self, peers: &[PeerRecord]) -> Result<(), StorageError> {
        let _ = peers;
        Err(StorageError::NotImplemented("update_peers"))
    }

    /// For every id in the batch, its usernames become exactly the ones listed
    /// for it.
    fn update_usernames(&self, usernames: &[(i64, String)]) -> Result<(), StorageError> {
        let _ = usernames;
        Err(StorageError::NotImplemented("update_usernames"))
    }

    fn get_peer_by_id(&self, id: i64) -> Result<Option<PeerRecord>, StorageError> {
        let _ = id;
        Err(StorageError::NotImplemented("get_peer_by_id"))
    }

    /// Case-insensitive, leading `@` ignored. Entries older than the
    /// backend's username TTL count as missing.
    fn get_peer_by_username(&self, username: &str) -> Result<Option<PeerRecord>, StorageError> {
        let _ = username;
        Err(StorageError::NotImplemented("get_peer_by_username"))
    }

    /// Matches on digits only, so `+1 555-0100` finds `15550100`.
    fn get_peer_by_phone_number(&self, phone_number: &str) -> Result<Option<PeerRecord>, StorageError> {
        let _ = phone_number;
        Err(StorageError::NotImplemented("get_peer_by_phone_number"))
    }

    // ── Update state ───────────────────────────────────────────────────────

    fn update_state(&self) -> Result<Option<UpdateState>, StorageError> {
        Err(StorageError::NotImplemented("update_state"))
    }

    /// Overwrite the stored update state.
    fn set_update_state(&self, state: UpdateState) -> Result<(), StorageError> {
        let _ = state;
        Err(StorageError::NotImplemented("set_update_state"))
    }

    // ── Session strings ────────────────────────────────────────────────────

    /// Snapshot every scalar field into a [`SessionRecord`].
    fn session_record(&self) -> Result<SessionRecord, StorageError> {
        let auth_key = self.auth_key()?.ok_or(StorageError::MissingAuthKey)?;
        Ok(SessionRecord {
            dc_id:             self.dc_id()?,
            api_id:            self.api_id()?,
            test_mode:         self.test_mode()?,
            auth_key,
            user_id:           self.user_id()?.unwrap_or(0),
            is_bot:            self.is_bot()?,
            server_address:    self.server_address()?,
            server_address_v6: self.server_address_v6()?,
            server_port:       self.server_port()?,
            media_address:     self.media_address()?,
            media_address_v6:  self.media_address_v6()?,
            media_port:        self.media_port()?,
        })
    }

    /// Export the stored session as a portable session string.
    fn export_session_string(&self) -> Result<String, StorageError> {
        let record = self.session_record()?;
        Ok(session_string::encode(&record)?)
    }

    /// Overwrite every field a session string carries in one step.
    ///
    /// A zero `api_id` keeps the stored one and a zero `user_id` clears it.
    /// The default writes field by field; built-in backends override it so
    /// the record lands atomically.
    fn set_session_record(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.set_dc_id(record.dc_id)?;
        if record.api_id != 0 {
            self.set_api_id(record.api_id)?;
        }
        self.set_test_mode(record.test_mode)?;
        self.set_auth_key(Some(record.auth_key))?;
        self.set_user_id((record.user_id != 0).then_some(record.user_id))?;
        self.set_is_bot(record.is_bot)?;
        self.set_server_address(record.server_address.clone())?;
        self.set_server_address_v6(record.server_address_v6.clone())?;
        self.set_server_port(record.server_port)?;
        self.set_media_address(record.media_address.clone())?;
        self.set_media_address_v6(record.media_address_v6.clone())?;
        self.set_media_port(record.media_port)
    }

    /// Overwrite the stored session with the one in `session_string`.
    ///
    /// Legacy strings carry no endpoints; those are taken from the built-in
    /// DC table. Nothing is written unless the string decodes. Returns the
    /// layout that was decoded.
    fn import_session_string(&self, session_string: &str) -> Result<SessionLayout, StorageError> {
        let (record, layout) = decode_for_import(session_string)?;
        self.set_session_record(&record)?;
        Ok(layout)
    }
}

/// Decode `session_string` and fill the endpoints legacy layouts lack.
pub(crate) fn decode_for_import(session_string: &str) -> Result<(SessionRecord, SessionLayout), StorageError> {
    let DecodedSession { mut record, layout } = session_string::decode(session_string)?;
    if !layout.has_endpoints() {
        tracing::warn!(
            "[storage] {layout:?} session string has no endpoints, using DC{} defaults",
            record.dc_id
        );
        record.fill_default_endpoints();
    }
    Ok((record, layout))
}

/// Unix time as stored in the `date` field, saturating at the `i32` range.
pub(crate) fn clamp_unix_time(ts: i64) -> i32 {
    i32::try_from(ts).unwrap_or(if ts < 0 { i32::MIN } else { i32::MAX })
}

pub(crate) fn unix_now() -> i32 {
    clamp_unix_time(chrono::Utc::now().timestamp())
}

// ─── Shared in-process state ─────────────────────────────────────────────────

/// Where a backend is in its `open` → `close` / `delete` lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    #[default]
    Created,
    Open,
    Closed,
    Deleted,
}

impl Lifecycle {
    pub(crate) fn ensure_open(self) -> Result<(), StorageError> {
        match self {
            Self::Open    => Ok(()),
            Self::Deleted => Err(StorageError::Deleted),
            _             => Err(StorageError::NotOpen),
        }
    }
}

/// Scalar fields plus caches, as held by the in-process backends.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SessionState {
    pub(crate) dc_id:             u8,
    pub(crate) api_id:            u32,
    pub(crate) test_mode:         bool,
    pub(crate) auth_key:          Option<[u8; AUTH_KEY_LEN]>,
    pub(crate) date:              i32,
    pub(crate) user_id:           Option<u64>,
    pub(crate) is_bot:            bool,
    pub(crate) server_address:    String,
    pub(crate) server_address_v6: String,
    pub(crate) server_port:       u32,
    pub(crate) media_address:     String,
    pub(crate) media_address_v6:  String,
    pub(crate) media_port:        u32,
    pub(crate) update_state:      Option<UpdateState>,
    pub(crate) peers:             cache::PeerCache,
}

impl SessionState {
    /// In-process counterpart of [`Storage::set_session_record`].
    pub(crate) fn apply_record(&mut self, record: &SessionRecord) {
        self.dc_id = record.dc_id;
        if record.api_id != 0 {
            self.api_id = record.api_id;
        }
        self.test_mode         = record.test_mode;
        self.auth_key          = Some(record.auth_key);
        self.user_id           = (record.user_id != 0).then_some(record.user_id);
        self.is_bot            = record.is_bot;
        self.server_address    = record.server_address.clone();
        self.server_address_v6 = record.server_address_v6.clone();
        self.server_port       = record.server_port;
        self.media_address     = record.media_address.clone();
        self.media_address_v6  = record.media_address_v6.clone();
        self.media_port        = record.media_port;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            dc_id:             DEFAULT_DC_ID,
            api_id:            0,
            test_mode:         false,
            auth_key:          None,
            date:              0,
            user_id:           None,
            is_bot:            false,
            server_address:    String::new(),
            server_address_v6: String::new(),
            server_port:       0,
            media_address:     String::new(),
            media_address_v6:  String::new(),
            media_port:        0,
            update_state:      None,
            peers:             cache::PeerCache::default(),
        }
    }
}

/// Implements the scalar accessors of [`Storage`], plus the bulk
/// `set_session_record`, for a backend that exposes `with_state` /
/// `with_state_mut` over a [`SessionState`].
macro_rules! state_accessors {
    ($( $get:ident, $set:ident: $ty:ty; )*) => {
        $(
            fn $get(&self) -> Result<$ty, StorageError> {
                self.with_state(|s| s.$get.clone())
            }

            fn $set(&self, value: $ty) -> Result<(), StorageError> {
                self.with_state_mut(|s| s.$get = value)
            }
        )*

        fn set_session_record(
            &self,
            record: &$crate::record::SessionRecord,
        ) -> Result<(), StorageError> {
            self.with_state_mut(|s| s.apply_record(record))
        }
    };
}

/// Implements the peer-cache and update-state operations of [`Storage`] on top
/// of `with_state` / `with_state_mut` and a `username_ttl` field.
macro_rules! cache_operations {
    () => {
        fn update_peers(&self, peers: &[PeerRecord]) -> Result<(), StorageError> {
            let now = chrono::Utc::now().timestamp();
            self.with_state_mut(|s| s.peers.upsert(peers, now))
        }

        fn update_usernames(&self, usernames: &[(i64, String)]) -> Result<(), StorageError> {
            self.with_state_mut(|s| s.peers.set_usernames(usernames))
        }

        fn get_peer_by_id(&self, id: i64) -> Result<Option<PeerRecord>, StorageError> {
            self.with_state(|s| s.peers.by_id(id))
        }

        fn get_peer_by_username(&self, username: &str) -> Result<Option<PeerRecord>, StorageError> {
            let now = chrono::Utc::now().timestamp();
            self.with_state(|s| s.peers.by_username(username, self.username_ttl, now))
        }

        fn get_peer_by_phone_number(&self, phone_number: &str) -> Result<Option<PeerRecord>, StorageError> {
            self.with_state(|s| s.peers.by_phone_number(phone_number))
        }

        fn update_state(&self) -> Result<Option<UpdateState>, StorageError> {
            self.with_state(|s| s.update_state)
        }

        fn set_update_state(&self, state: UpdateState) -> Result<(), StorageError> {
            self.with_state_mut(|s| s.update_state = Some(state))
        }
    };
}

pub(crate) use {cache_operations, state_accessors};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_time_saturates() {
        assert_eq!(clamp_unix_time(1_700_000_000), 1_700_000_000);
        assert_eq!(clamp_unix_time(i64::from(i32::MAX) + 1), i32::MAX);
        assert_eq!(clamp_unix_time(i64::MIN), i32::MIN);
        assert!(unix_now() > 1_600_000_000);
    }

    #[test]
    fn applying_a_record_keeps_a_known_api_id() {
        let mut state = SessionState { api_id: 777, user_id: Some(5), ..SessionState::default() };
        let mut record = SessionRecord::new(4, [1; AUTH_KEY_LEN]);
        record.server_address = "149.154.167.91".into();
        record.server_port = 443;
        state.apply_record(&record);

        assert_eq!(state.api_id, 777);
        assert_eq!(state.user_id, None);
        assert_eq!(state.dc_id, 4);
        assert_eq!(state.auth_key, Some([1; AUTH_KEY_LEN]));
        assert_eq!(state.server_address, "149.154.167.91");
    }
}
