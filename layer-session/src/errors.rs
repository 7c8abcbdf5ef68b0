//! Error types for layer-session.

use std::{fmt, io};

// ─── SessionError ─────────────────────────────────────────────────────────────

/// An error produced while encoding or decoding a session string.
///
/// Encoding and decoding are deterministic, so none of these are worth
/// retrying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// An address group or port does not fit its fixed-width field.
    ///
    /// `FieldTooWide { field: "server_port", value: "100000", width: 5 }`
    FieldTooWide {
        field: &'static str,
        value: String,
        width: usize,
    },
    /// A field holds something that cannot be represented at all
    /// (non-digit octet, non-ASCII text, out-of-range DC id, …).
    InvalidField {
        field:  &'static str,
        reason: String,
    },
    /// The input is not valid URL-safe base64, even after restoring padding.
    MalformedSessionString(String),
    /// The decoded byte length matches none of the known layouts.
    UnknownSessionFormat { len: usize },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldTooWide { field, value, width } => {
                write!(f, "{field}: {value:?} does not fit in {width} characters")
            }
            Self::InvalidField { field, reason } => write!(f, "{field}: {reason}"),
            Self::MalformedSessionString(e) => write!(f, "malformed session string: {e}"),
            Self::UnknownSessionFormat { len } => {
                write!(f, "unknown session string format ({len} bytes)")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }
}

// ─── StorageError ─────────────────────────────────────────────────────────────

/// The error type returned by every [`crate::Storage`] operation.
#[derive(Debug)]
pub enum StorageError {
    /// The backend does not provide this operation. A programming error:
    /// surface it, don't retry it.
    NotImplemented(&'static str),
    /// Encoding or decoding the session string failed.
    Session(SessionError),
    /// The underlying store failed.
    Io(io::Error),
    /// The backend was used before [`crate::Storage::open`] (or after `close`).
    NotOpen,
    /// The backend was deleted and can no longer be used.
    Deleted,
    /// A session string was requested but no auth key has been stored yet.
    MissingAuthKey,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotImplemented(op) => write!(f, "storage operation not implemented: {op}"),
            Self::Session(e)         => write!(f, "{e}"),
            Self::Io(e)              => write!(f, "I/O error: {e}"),
            Self::NotOpen            => write!(f, "storage is not open"),
            Self::Deleted            => write!(f, "storage has been deleted"),
            Self::MissingAuthKey     => write!(f, "no auth key stored"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(e) => Some(e),
            Self::Io(e)      => Some(e),
            _                => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<SessionError> for StorageError {
    fn from(e: SessionError) -> Self { Self::Session(e) }
}
