//! Session data model — the record carried by a session string, the update
//! state tuple and cached peers.

use std::fmt;
use std::str::FromStr;

use sha1::{Digest, Sha1};

/// Length of a Telegram authorization key.
pub const AUTH_KEY_LEN: usize = 256;

/// 8-byte identifier of an auth key: SHA-1(key)[12..20], little-endian.
///
/// Safe to log; the key itself never is.
pub fn auth_key_id(key: &[u8; AUTH_KEY_LEN]) -> u64 {
    let sha: [u8; 20] = Sha1::digest(key).into();
    let mut id = [0u8; 8];
    id.copy_from_slice(&sha[12..20]);
    u64::from_le_bytes(id)
}

// ─── SessionRecord ────────────────────────────────────────────────────────────

/// Everything needed to resume an authorized session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub dc_id:             u8,
    pub api_id:            u32,
    pub test_mode:         bool,
    pub auth_key:          [u8; AUTH_KEY_LEN],
    /// `0` until the account has signed in.
    pub user_id:           u64,
    pub is_bot:            bool,
    pub server_address:    String,
    pub server_address_v6: String,
    pub server_port:       u32,
    pub media_address:     String,
    pub media_address_v6:  String,
    pub media_port:        u32,
}

impl SessionRecord {
    /// A record with the given DC and key and every other field zeroed/empty.
    pub fn new(dc_id: u8, auth_key: [u8; AUTH_KEY_LEN]) -> Self {
        Self {
            dc_id,
            api_id:            0,
            test_mode:         false,
            auth_key,
            user_id:           0,
            is_bot:            false,
            server_address:    String::new(),
            server_address_v6: String::new(),
            server_port:       0,
            media_address:     String::new(),
            media_address_v6:  String::new(),
            media_port:        0,
        }
    }

    pub fn auth_key_id(&self) -> u64 { auth_key_id(&self.auth_key) }

    /// `true` once a server endpoint is known (legacy strings carry none).
    pub fn has_endpoints(&self) -> bool {
        (!self.server_address.is_empty() || !self.server_address_v6.is_empty())
            && self.server_port != 0
    }

    /// Fill empty endpoint fields from the built-in DC table.
    ///
    /// Fields that already hold a value are left untouched.
    pub fn fill_default_endpoints(&mut self) {
        let Some(dc) = crate::dc::lookup(self.dc_id, self.test_mode) else {
            return;
        };
        let fill = |slot: &mut String, value: &str| {
            if slot.is_empty() { *slot = value.to_owned(); }
        };
        fill(&mut self.server_address,    dc.ipv4);
        fill(&mut self.server_address_v6, dc.ipv6);
        fill(&mut self.media_address,     dc.media_ipv4);
        fill(&mut self.media_address_v6,  dc.media_ipv6);
        if self.server_port == 0 { self.server_port = dc.port; }
        if self.media_port  == 0 { self.media_port  = dc.port; }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("dc_id", &self.dc_id)
            .field("api_id", &self.api_id)
            .field("test_mode", &self.test_mode)
            .field("auth_key", &format_args!("AuthKey(id={})", self.auth_key_id()))
            .field("user_id", &self.user_id)
            .field("is_bot", &self.is_bot)
            .field("server_address", &self.server_address)
            .field("server_address_v6", &self.server_address_v6)
            .field("server_port", &self.server_port)
            .field("media_address", &self.media_address)
            .field("media_address_v6", &self.media_address_v6)
            .field("media_port", &self.media_port)
            .finish()
    }
}

// ─── UpdateState ──────────────────────────────────────────────────────────────

/// Opaque update-sequence tuple `(entity_id, pts, qts, date, seq)`.
///
/// Stored and returned verbatim; never part of a session string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UpdateState {
    pub entity_id: i64,
    pub pts:       i32,
    pub qts:       i32,
    pub date:      i32,
    pub seq:       i32,
}

impl From<(i64, i32, i32, i32, i32)> for UpdateState {
    fn from((entity_id, pts, qts, date, seq): (i64, i32, i32, i32, i32)) -> Self {
        Self { entity_id, pts, qts, date, seq }
    }
}

// ─── Peers ────────────────────────────────────────────────────────────────────

/// What kind of chat a cached peer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PeerType {
    User,
    Bot,
    Group,
    Channel,
    Supergroup,
    Forum,
}

impl PeerType {
    /// Stable name used by persistent backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User       => "user",
            Self::Bot        => "bot",
            Self::Group      => "group",
            Self::Channel    => "channel",
            Self::Supergroup => "supergroup",
            Self::Forum      => "forum",
        }
    }
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user"       => Self::User,
            "bot"        => Self::Bot,
            "group"      => Self::Group,
            "channel"    => Self::Channel,
            "supergroup" => Self::Supergroup,
            "forum"      => Self::Forum,
            other        => return Err(format!("unknown peer type {other:?}")),
        })
    }
}

/// A peer previously seen by the client, cached so it can be resolved again
/// without asking the server.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerRecord {
    pub id:           i64,
    pub access_hash:  i64,
    pub peer_type:    PeerType,
    pub username:     Option<String>,
    pub phone_number: Option<String>,
}

/// Canonical form used to match usernames: no leading `@`, lowercase.
pub(crate) fn normalize_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_ascii_lowercase()
}

/// Canonical form used to match phone numbers: digits only.
pub(crate) fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_key_bytes() {
        let rec = SessionRecord::new(2, [0xAB; AUTH_KEY_LEN]);
        let dbg = format!("{rec:?}");
        assert!(dbg.contains("AuthKey(id="));
        assert!(!dbg.contains("171, 171"), "raw key bytes leaked: {dbg}");
    }

    #[test]
    fn peer_type_names_round_trip() {
        for ty in [PeerType::User, PeerType::Bot, PeerType::Group,
                   PeerType::Channel, PeerType::Supergroup, PeerType::Forum] {
            assert_eq!(ty.as_str().parse::<PeerType>().unwrap(), ty);
        }
        assert!("robot".parse::<PeerType>().is_err());
    }

    #[test]
    fn lookup_keys_are_normalized() {
        assert_eq!(normalize_username(" @Durov "), "durov");
        assert_eq!(normalize_phone("+1 555-0100"), "15550100");
    }

    #[test]
    fn default_endpoints_fill_only_gaps() {
        let mut rec = SessionRecord::new(2, [0; AUTH_KEY_LEN]);
        rec.media_port = 8443;
        rec.fill_default_endpoints();
        assert_eq!(rec.server_address, "149.154.167.51");
        assert_eq!(rec.server_port, 443);
        assert_eq!(rec.media_port, 8443);
        assert!(rec.has_endpoints());
    }
}
