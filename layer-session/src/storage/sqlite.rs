//! SQLite storage backend.
//!
//! Enable with the `sqlite-session` Cargo feature:
//! ```toml
//! [dependencies]
//! layer-session = { version = "*", features = ["sqlite-session"] }
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::{FromSql, ToSql};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::StorageError;
use crate::record::{
    AUTH_KEY_LEN, PeerRecord, PeerType, SessionRecord, UpdateState, normalize_phone, normalize_username,
};

use super::cache::is_stale;
use super::{DEFAULT_DC_ID, Lifecycle, Storage, USERNAME_TTL, clamp_unix_time, unix_now};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE sessions (
    dc_id             INTEGER PRIMARY KEY,
    api_id            INTEGER NOT NULL DEFAULT 0,
    test_mode         INTEGER NOT NULL DEFAULT 0,
    auth_key          BLOB,
    date              INTEGER NOT NULL DEFAULT 0,
    user_id           INTEGER,
    is_bot            INTEGER NOT NULL DEFAULT 0,
    server_address    TEXT    NOT NULL DEFAULT '',
    server_address_v6 TEXT    NOT NULL DEFAULT '',
    server_port       INTEGER NOT NULL DEFAULT 0,
    media_address     TEXT    NOT NULL DEFAULT '',
    media_address_v6  TEXT    NOT NULL DEFAULT '',
    media_port        INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE peers (
    id             INTEGER PRIMARY KEY,
    access_hash    INTEGER NOT NULL,
    type           TEXT    NOT NULL,
    phone_number   TEXT,
    last_update_on INTEGER NOT NULL
);
CREATE TABLE usernames (
    id       INTEGER NOT NULL REFERENCES peers(id),
    username TEXT    NOT NULL
);
CREATE TABLE update_state (
    id   INTEGER PRIMARY KEY,
    pts  INTEGER NOT NULL,
    qts  INTEGER NOT NULL,
    date INTEGER NOT NULL,
    seq  INTEGER NOT NULL
);
CREATE TABLE version (
    number INTEGER PRIMARY KEY
);
CREATE INDEX idx_peers_phone_number ON peers (phone_number);
CREATE INDEX idx_usernames_username ON usernames (username);
CREATE INDEX idx_usernames_id ON usernames (id);
";

fn sql(e: rusqlite::Error) -> StorageError {
    StorageError::Io(io::Error::other(e))
}

/// SQLite-backed session store.
///
/// Scalar setters write straight through (autocommit); `set_session_record`,
/// `update_peers` and `update_usernames` each run in one transaction.
pub struct SqliteStorage {
    path:         PathBuf,
    username_ttl: Duration,
    inner:        Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    lifecycle: Lifecycle,
    conn:      Option<Connection>,
}

impl SqliteStorage {
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

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let mut inner = self.lock();
        inner.lifecycle.ensure_open()?;
        let conn = inner.conn.as_mut().ok_or(StorageError::NotOpen)?;
        f(conn).map_err(sql)
    }

    fn get<T: FromSql>(&self, column: &'static str) -> Result<T, StorageError> {
        self.with_conn(|c| c.query_row(&format!("SELECT {column} FROM sessions"), [], |r| r.get(0)))
    }

    fn set<T: ToSql>(&self, column: &'static str, value: T) -> Result<(), StorageError> {
        self.with_conn(|c| c.execute(&format!("UPDATE sessions SET {column} = ?1"), [value]).map(drop))
    }

    fn peer_from_row(
        conn: &Connection,
        id: i64,
        access_hash: i64,
        peer_type: String,
        phone_number: Option<String>,
    ) -> rusqlite::Result<PeerRecord> {
        let peer_type: PeerType = peer_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;
        let username = conn
            .query_row(
                "SELECT username FROM usernames WHERE id = ?1 ORDER BY rowid LIMIT 1",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(PeerRecord { id, access_hash, peer_type, username, phone_number })
    }

    fn find_peer(&self, filter: &str, key: &dyn ToSql) -> Result<Option<(PeerRecord, i64)>, StorageError> {
        let query = format!(
            "SELECT p.id, p.access_hash, p.type, p.phone_number, p.last_update_on
             FROM peers p {filter} LIMIT 1"
        );
        self.with_conn(|c| {
            let row = c
                .query_row(&query, [key], |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, i64>(4)?,
                    ))
                })
                .optional()?;
            match row {
                Some((id, hash, ty, phone, updated)) => {
                    Ok(Some((Self::peer_from_row(c, id, hash, ty, phone)?, updated)))
                }
                None => Ok(None),
            }
        })
    }
}

impl Storage for SqliteStorage {
    fn name(&self) -> &str { "sqlite" }

    fn open(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        match inner.lifecycle {
            Lifecycle::Deleted => return Err(StorageError::Deleted),
            Lifecycle::Open    => return Ok(()),
            Lifecycle::Created | Lifecycle::Closed => {}
        }
        let conn = Connection::open(&self.path).map_err(sql)?;
        let has_schema: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sessions')",
                [],
                |r| r.get(0),
            )
            .map_err(sql)?;
        if has_schema {
            let version: Option<i64> = conn
                .query_row("SELECT number FROM version", [], |r| r.get(0))
                .optional()
                .map_err(sql)?;
            tracing::info!("[sqlite] Opened {} (schema v{})", self.path.display(), version.unwrap_or(0));
        } else {
            conn.execute_batch(SCHEMA).map_err(sql)?;
            conn.execute("INSERT INTO version (number) VALUES (?1)", [SCHEMA_VERSION]).map_err(sql)?;
            conn.execute("INSERT INTO sessions (dc_id) VALUES (?1)", [DEFAULT_DC_ID]).map_err(sql)?;
            tracing::info!("[sqlite] Created {}", self.path.display());
        }
        inner.conn = Some(conn);
        inner.lifecycle = Lifecycle::Open;
        Ok(())
    }

    fn save(&self) -> Result<(), StorageError> {
        self.set("date", unix_now())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Open {
            return Ok(());
        }
        if let Some(conn) = &inner.conn {
            conn.execute("UPDATE sessions SET date = ?1", [unix_now()]).map_err(sql)?;
        }
        if let Some(conn) = inner.conn.take() {
            conn.close().map_err(|(_, e)| sql(e))?;
        }
        inner.lifecycle = Lifecycle::Closed;
        tracing::info!("[sqlite] Closed {}", self.path.display());
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        drop(inner.conn.take());
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        inner.lifecycle = Lifecycle::Deleted;
        tracing::info!("[sqlite] Deleted {}", self.path.display());
        Ok(())
    }

    fn dc_id(&self) -> Result<u8, StorageError> { self.get("dc_id") }
    fn set_dc_id(&self, value: u8) -> Result<(), StorageError> { self.set("dc_id", value) }

    fn api_id(&self) -> Result<u32, StorageError> { self.get("api_id") }
    fn set_api_id(&self, value: u32) -> Result<(), StorageError> { self.set("api_id", value) }

    fn test_mode(&self) -> Result<bool, StorageError> { self.get("test_mode") }
    fn set_test_mode(&self, value: bool) -> Result<(), StorageError> { self.set("test_mode", value) }

    fn auth_key(&self) -> Result<Option<[u8; AUTH_KEY_LEN]>, StorageError> {
        let blob: Option<Vec<u8>> = self.get("auth_key")?;
        Ok(blob.and_then(|k| <[u8; AUTH_KEY_LEN]>::try_from(k.as_slice()).ok()))
    }
    fn set_auth_key(&self, value: Option<[u8; AUTH_KEY_LEN]>) -> Result<(), StorageError> {
        self.set("auth_key", value.map(|k| k.to_vec()))
    }

    fn date(&self) -> Result<i32, StorageError> {
        let date: i64 = self.get("date")?;
        Ok(clamp_unix_time(date))
    }
    fn set_date(&self, value: i32) -> Result<(), StorageError> { self.set("date", value) }

    fn user_id(&self) -> Result<Option<u64>, StorageError> {
        let id: Option<i64> = self.get("user_id")?;
        Ok(id.map(|id| id as u64))
    }
    fn set_user_id(&self, value: Option<u64>) -> Result<(), StorageError> {
        self.set("user_id", value.map(|id| id as i64))
    }

    fn is_bot(&self) -> Result<bool, StorageError> { self.get("is_bot") }
    fn set_is_bot(&self, value: bool) -> Result<(), StorageError> { self.set("is_bot", value) }

    fn server_address(&self) -> Result<String, StorageError> { self.get("server_address") }
    fn set_server_address(&self, value: String) -> Result<(), StorageError> { self.set("server_address", value) }

    fn server_address_v6(&self) -> Result<String, StorageError> { self.get("server_address_v6") }
    fn set_server_address_v6(&self, value: String) -> Result<(), StorageError> { self.set("server_address_v6", value) }

    fn server_port(&self) -> Result<u32, StorageError> { self.get("server_port") }
    fn set_server_port(&self, value: u32) -> Result<(), StorageError> { self.set("server_port", value) }

    fn media_address(&self) -> Result<String, StorageError> { self.get("media_address") }
    fn set_media_address(&self, value: String) -> Result<(), StorageError> { self.set("media_address", value) }

    fn media_address_v6(&self) -> Result<String, StorageError> { self.get("media_address_v6") }
    fn set_media_address_v6(&self, value: String) -> Result<(), StorageError> { self.set("media_address_v6", value) }

    fn media_port(&self) -> Result<u32, StorageError> { self.get("media_port") }
    fn set_media_port(&self, value: u32) -> Result<(), StorageError> { self.set("media_port", value) }

    fn set_session_record(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.with_conn(|c| {
            let tx = c.transaction()?;
            tx.execute(
                "UPDATE sessions SET
                    dc_id = ?1,
                    api_id = CASE WHEN ?2 = 0 THEN api_id ELSE ?2 END,
                    test_mode = ?3,
                    auth_key = ?4,
                    user_id = ?5,
                    is_bot = ?6,
                    server_address = ?7,
                    server_address_v6 = ?8,
                    server_port = ?9,
                    media_address = ?10,
                    media_address_v6 = ?11,
                    media_port = ?12",
                params![
                    record.dc_id,
                    record.api_id,
                    record.test_mode,
                    &record.auth_key[..],
                    (record.user_id != 0).then_some(record.user_id as i64),
                    record.is_bot,
                    record.server_address,
                    record.server_address_v6,
                    record.server_port,
                    record.media_address,
                    record.media_address_v6,
                    record.media_port,
                ],
            )?;
            tx.commit()
        })
    }

    fn update_peers(&self, peers: &[PeerRecord]) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp();
        self.with_conn(|c| {
            let tx = c.transaction()?;
            for p in peers {
                let phone = p.phone_number.as_deref().map(normalize_phone).filter(|s| !s.is_empty());
                tx.execute(
                    "INSERT INTO peers (id, access_hash, type, phone_number, last_update_on)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (id) DO UPDATE SET
                        access_hash = excluded.access_hash,
                        type = excluded.type,
                        phone_number = excluded.phone_number,
                        last_update_on = excluded.last_update_on",
                    params![p.id, p.access_hash, p.peer_type.as_str(), phone, now],
                )?;
                if let Some(username) = &p.username {
                    tx.execute("DELETE FROM usernames WHERE id = ?1", [p.id])?;
                    tx.execute(
                        "INSERT INTO usernames (id, username) VALUES (?1, ?2)",
                        params![p.id, username],
                    )?;
                }
            }
            tx.commit()
        })
    }

    fn update_usernames(&self, usernames: &[(i64, String)]) -> Result<(), StorageError> {
        self.with_conn(|c| {
            let tx = c.transaction()?;
            let mut cleared = std::collections::HashSet::new();
            for (id, username) in usernames {
                let known: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM peers WHERE id = ?1)",
                    [id],
                    |r| r.get(0),
                )?;
                if !known {
                    tracing::debug!("[sqlite] usernames for unknown peer {id} ignored");
                    continue;
                }
                if cleared.insert(*id) {
                    tx.execute("DELETE FROM usernames WHERE id = ?1", [id])?;
                }
                tx.execute(
                    "INSERT INTO usernames (id, username) VALUES (?1, ?2)",
                    params![id, username],
                )?;
            }
            tx.commit()
        })
    }

    fn get_peer_by_id(&self, id: i64) -> Result<Option<PeerRecord>, StorageError> {
        let found = self.find_peer("WHERE p.id = ?1", &id)?;
        Ok(found.map(|(peer, _)| peer))
    }

    fn get_peer_by_username(&self, username: &str) -> Result<Option<PeerRecord>, StorageError> {
        let wanted = normalize_username(username);
        let found = self.find_peer(
            "JOIN usernames u ON u.id = p.id WHERE lower(ltrim(u.username, '@')) = ?1",
            &wanted,
        )?;
        match found {
            Some((_, updated)) if is_stale(updated, self.username_ttl, chrono::Utc::now().timestamp()) => {
                tracing::warn!("[sqlite] cached username @{wanted} expired");
                Ok(None)
            }
            other => Ok(other.map(|(peer, _)| peer)),
        }
    }

    fn get_peer_by_phone_number(&self, phone_number: &str) -> Result<Option<PeerRecord>, StorageError> {
        let wanted = normalize_phone(phone_number);
        if wanted.is_empty() {
            return Ok(None);
        }
        let found = self.find_peer("WHERE p.phone_number = ?1", &wanted)?;
        Ok(found.map(|(peer, _)| peer))
    }

    fn update_state(&self) -> Result<Option<UpdateState>, StorageError> {
        self.with_conn(|c| {
            c.query_row(
                "SELECT id, pts, qts, date, seq FROM update_state LIMIT 1",
                [],
                |r| Ok(UpdateState {
                    entity_id: r.get(0)?,
                    pts:       r.get(1)?,
                    qts:       r.get(2)?,
                    date:      r.get(3)?,
                    seq:       r.get(4)?,
                }),
            )
            .optional()
        })
    }

    fn set_update_state(&self, state: UpdateState) -> Result<(), StorageError> {
        self.with_conn(|c| {
            let tx = c.transaction()?;
            tx.execute("DELETE FROM update_state", [])?;
            tx.execute(
                "INSERT INTO update_state (id, pts, qts, date, seq) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![state.entity_id, state.pts, state.qts, state.date, state.seq],
            )?;
            tx.commit()
        })
    }
}
