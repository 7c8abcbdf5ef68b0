//! # layer-session
//!
//! Session persistence for Telegram clients.
//!
//! ## Features
//! - Portable session strings: export the current session as one URL-safe
//!   token, import it anywhere (three historical layouts decode, the newest is
//!   written)
//! - Pluggable [`Storage`] backends: in-memory, binary file, SQLite
//!   (`sqlite-session` feature)
//! - Peer cache: resolve previously seen peers by id, username or phone
//! - Update-state persistence
//!
//! ```
//! use layer_session::{MemoryStorage, Storage, session_string};
//!
//! let storage = MemoryStorage::new();
//! storage.open()?;
//! storage.set_auth_key(Some([0u8; 256]))?;
//! storage.set_server_address("149.154.167.51".into())?;
//! storage.set_server_port(443)?;
//!
//! let token = storage.export_session_string()?;
//! let decoded = session_string::decode(&token)?;
//! assert_eq!(decoded.record.server_port, 443);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]

mod config;
mod errors;
pub mod dc;
pub mod padding;
pub mod record;
pub mod session_string;
pub mod storage;

pub use config::{SESSION_EXTENSION, StorageConfig, open_storage};
pub use errors::{SessionError, StorageError};
pub use record::{AUTH_KEY_LEN, PeerRecord, PeerType, SessionRecord, UpdateState, auth_key_id};
pub use session_string::{DecodedSession, SessionLayout};
pub use storage::{FileStorage, MemoryStorage, Storage, USERNAME_TTL};
#[cfg(feature = "sqlite-session")]
pub use storage::SqliteStorage;
