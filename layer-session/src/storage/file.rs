//! Binary-file storage backend.
//!
//! The whole [`SessionState`] is snapshotted into one little-endian file:
//!
//! ```text
//! magic "LSS1"
//! dc_id:u8 api_id:u32 test_mode:u8 [has_key:u8 auth_key:256] date:i32
//! [has_user:u8 user_id:u64] is_bot:u8
//! server_address server_address_v6 server_port:u32
//! media_address  media_address_v6  media_port:u32
//! [has_state:u8 entity_id:i64 pts:i32 qts:i32 date:i32 seq:i32]
//! peer_count:u32 { id:i64 access_hash:i64 type last_update_on:i64
//!                  username_count:u8 usernames… [has_phone:u8 phone] }
//! ```
//!
//! Strings are a `u8` length followed by UTF-8 bytes. Saves go to a `.tmp`
//! sibling first and are renamed into place, so a failed save never clobbers
//! the previous file.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::StorageError;
use crate::record::{AUTH_KEY_LEN, PeerRecord, PeerType, UpdateState};

use super::cache::{CachedPeer, PeerCache};
use super::{
    Lifecycle, SessionState, Storage, USERNAME_TTL, cache_operations, state_accessors, unix_now,
};

const MAGIC: &[u8; 4] = b"LSS1";

/// Session backend persisting to a single binary file.
pub struct FileStorage {
    path:         PathBuf,
    username_ttl: Duration,
    inner:        Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    lifecycle: Lifecycle,
    state:     SessionState,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path:         path.into(),
            username_ttl: USERNAME_TTL,
            inner:        Mutex::new(Inner::default()),
        }
    }

    pub fn with_username_ttl(mut self, ttl: Duration) -> Self {
        self.username_ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path { &self.path }

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

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn write_snapshot(&self, state: &SessionState) -> io::Result<()> {
        let bytes = encode_state(state)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, bytes)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .inspect_err(|_| {
                let _ = std::fs::remove_file(&tmp);
            })
    }

    /// Stamp `date` and write a snapshot; `inner` only changes on success.
    fn save_locked(&self, inner: &mut Inner) -> Result<(), StorageError> {
        inner.lifecycle.ensure_open()?;
        let mut snapshot = inner.state.clone();
        snapshot.date = unix_now();
        self.write_snapshot(&snapshot)?;
        inner.state = snapshot;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str { "binary-file" }

    fn open(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        match inner.lifecycle {
            Lifecycle::Deleted => return Err(StorageError::Deleted),
            Lifecycle::Open    => return Ok(()),
            Lifecycle::Created | Lifecycle::Closed => {}
        }
        if self.path.exists() {
            inner.state = decode_state(&std::fs::read(&self.path)?)?;
            tracing::info!("[file] Loaded session {} (DC{})", self.path.display(), inner.state.dc_id);
        } else {
            inner.state = SessionState::default();
            self.write_snapshot(&inner.state)?;
            tracing::info!("[file] Created session {}", self.path.display());
        }
        inner.lifecycle = Lifecycle::Open;
        Ok(())
    }

    fn save(&self) -> Result<(), StorageError> {
        self.save_locked(&mut self.lock())?;
        tracing::debug!("[file] Saved session {}", self.path.display());
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Open {
            return Ok(());
        }
        self.save_locked(&mut inner)?;
        inner.lifecycle = Lifecycle::Closed;
        tracing::info!("[file] Closed session {}", self.path.display());
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        for path in [self.path.clone(), self.tmp_path()] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        inner.state = SessionState::default();
        inner.lifecycle = Lifecycle::Deleted;
        tracing::info!("[file] Deleted session {}", self.path.display());
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

// ─── Encoding ─────────────────────────────────────────────────────────────────

fn put_str(b: &mut Vec<u8>, s: &str) -> io::Result<()> {
    let len = u8::try_from(s.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("string too long: {s:?}")))?;
    b.push(len);
    b.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_state(s: &SessionState) -> io::Result<Vec<u8>> {
    let mut b = Vec::with_capacity(512);
    b.extend_from_slice(MAGIC);
    b.push(s.dc_id);
    b.extend_from_slice(&s.api_id.to_le_bytes());
    b.push(s.test_mode as u8);
    match &s.auth_key {
        Some(k) => { b.push(1); b.extend_from_slice(k); }
        None    => { b.push(0); }
    }
    b.extend_from_slice(&s.date.to_le_bytes());
    match s.user_id {
        Some(id) => { b.push(1); b.extend_from_slice(&id.to_le_bytes()); }
        None     => { b.push(0); }
    }
    b.push(s.is_bot as u8);
    put_str(&mut b, &s.server_address)?;
    put_str(&mut b, &s.server_address_v6)?;
    b.extend_from_slice(&s.server_port.to_le_bytes());
    put_str(&mut b, &s.media_address)?;
    put_str(&mut b, &s.media_address_v6)?;
    b.extend_from_slice(&s.media_port.to_le_bytes());
    match &s.update_state {
        Some(u) => {
            b.push(1);
            b.extend_from_slice(&u.entity_id.to_le_bytes());
            for v in [u.pts, u.qts, u.date, u.seq] {
                b.extend_from_slice(&v.to_le_bytes());
            }
        }
        None => b.push(0),
    }

    let mut peers: Vec<&CachedPeer> = s.peers.peers.values().collect();
    peers.sort_by_key(|p| p.id);
    b.extend_from_slice(&(peers.len() as u32).to_le_bytes());
    for p in peers {
        b.extend_from_slice(&p.id.to_le_bytes());
        b.extend_from_slice(&p.access_hash.to_le_bytes());
        put_str(&mut b, p.peer_type.as_str())?;
        b.extend_from_slice(&p.last_update_on.to_le_bytes());
        let count = u8::try_from(p.usernames.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many usernames"))?;
        b.push(count);
        for u in &p.usernames {
            put_str(&mut b, u)?;
        }
        match &p.phone_number {
            Some(phone) => { b.push(1); put_str(&mut b, phone)?; }
            None        => b.push(0),
        }
    }
    Ok(b)
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

fn decode_state(buf: &[u8]) -> io::Result<SessionState> {
    let mut p = 0usize;
    macro_rules! r {
        ($n:expr) => {{
            if p + $n > buf.len() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated session"));
            }
            let s = &buf[p..p + $n];
            p += $n;
            s
        }};
    }
    macro_rules! int {
        ($t:ty) => {{
            let mut raw = [0u8; std::mem::size_of::<$t>()];
            raw.copy_from_slice(r!(std::mem::size_of::<$t>()));
            <$t>::from_le_bytes(raw)
        }};
    }
    macro_rules! string {
        () => {{
            let len = r!(1)[0] as usize;
            String::from_utf8(r!(len).to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        }};
    }

    if r!(4) != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a layer session file"));
    }
    let dc_id     = int!(u8);
    let api_id    = int!(u32);
    let test_mode = int!(u8) != 0;
    let auth_key  = if int!(u8) == 1 {
        let mut k = [0u8; AUTH_KEY_LEN];
        k.copy_from_slice(r!(AUTH_KEY_LEN));
        Some(k)
    } else {
        None
    };
    let date    = int!(i32);
    let user_id = if int!(u8) == 1 { Some(int!(u64)) } else { None };
    let is_bot  = int!(u8) != 0;
    let server_address    = string!();
    let server_address_v6 = string!();
    let server_port       = int!(u32);
    let media_address     = string!();
    let media_address_v6  = string!();
    let media_port        = int!(u32);
    let update_state = if int!(u8) == 1 {
        Some(UpdateState {
            entity_id: int!(i64),
            pts:       int!(i32),
            qts:       int!(i32),
            date:      int!(i32),
            seq:       int!(i32),
        })
    } else {
        None
    };

    let peer_count = int!(u32) as usize;
    let mut peers = PeerCache::default();
    for _ in 0..peer_count {
        let id          = int!(i64);
        let access_hash = int!(i64);
        let peer_type: PeerType = string!()
            .parse()
            .map_err(|e: String| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let last_update_on = int!(i64);
        let count = int!(u8) as usize;
        let mut usernames = Vec::with_capacity(count);
        for _ in 0..count {
            usernames.push(string!());
        }
        let phone_number = if int!(u8) == 1 { Some(string!()) } else { None };
        peers.peers.insert(id, CachedPeer {
            id,
            access_hash,
            peer_type,
            usernames,
            phone_number,
            last_update_on,
        });
    }

    Ok(SessionState {
        dc_id,
        api_id,
        test_mode,
        auth_key,
        date,
        user_id,
        is_bot,
        server_address,
        server_address_v6,
        server_port,
        media_address,
        media_address_v6,
        media_port,
        update_state,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let mut state = SessionState {
            api_id:         777,
            auth_key:       Some([3u8; AUTH_KEY_LEN]),
            user_id:        Some(42),
            server_address: "149.154.167.51".into(),
            server_port:    443,
            update_state:   Some(UpdateState::from((0, 1, 2, 3, 4))),
            ..SessionState::default()
        };
        state.peers.upsert(&[PeerRecord {
            id:           5,
            access_hash:  6,
            peer_type:    PeerType::Channel,
            username:     Some("news".into()),
            phone_number: None,
        }], 1_700_000_000);

        let bytes = encode_state(&state).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(decode_state(&bytes).unwrap(), state);
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let bytes = encode_state(&SessionState::default()).unwrap();
        let err = decode_state(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let err = decode_state(b"SQLite format 3\0").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
