//! In-process peer cache shared by the memory and file backends.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::record::{PeerRecord, PeerType, normalize_phone, normalize_username};

/// One cached peer plus everything known about how to find it again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CachedPeer {
    pub(crate) id:             i64,
    pub(crate) access_hash:    i64,
    pub(crate) peer_type:      PeerType,
    /// First entry is the primary username.
    pub(crate) usernames:      Vec<String>,
    /// Digits only.
    pub(crate) phone_number:   Option<String>,
    /// Unix time of the last upsert.
    pub(crate) last_update_on: i64,
}

impl CachedPeer {
    fn to_record(&self) -> PeerRecord {
        PeerRecord {
            id:           self.id,
            access_hash:  self.access_hash,
            peer_type:    self.peer_type,
            username:     self.usernames.first().cloned(),
            phone_number: self.phone_number.clone(),
        }
    }
}

/// Peers keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PeerCache {
    pub(crate) peers: HashMap<i64, CachedPeer>,
}

impl PeerCache {
    pub(crate) fn upsert(&mut self, records: &[PeerRecord], now: i64) {
        for r in records {
            let usernames = match (&r.username, self.peers.get(&r.id)) {
                (Some(u), _)         => vec![u.clone()],
                (None, Some(known))  => known.usernames.clone(),
                (None, None)         => Vec::new(),
            };
            self.peers.insert(r.id, CachedPeer {
                id:             r.id,
                access_hash:    r.access_hash,
                peer_type:      r.peer_type,
                usernames,
                phone_number:   r.phone_number.as_deref().map(normalize_phone).filter(|p| !p.is_empty()),
                last_update_on: now,
            });
        }
    }

    /// Ids not yet cached are skipped; there is no access hash to pair them
    /// with.
    pub(crate) fn set_usernames(&mut self, usernames: &[(i64, String)]) {
        let mut grouped: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for (id, username) in usernames {
            grouped.entry(*id).or_default().push(username.clone());
        }
        for (id, names) in grouped {
            match self.peers.get_mut(&id) {
                Some(peer) => peer.usernames = names,
                None => tracing::debug!("[storage] usernames for unknown peer {id} ignored"),
            }
        }
    }

    pub(crate) fn by_id(&self, id: i64) -> Option<PeerRecord> {
        self.peers.get(&id).map(CachedPeer::to_record)
    }

    pub(crate) fn by_username(&self, username: &str, ttl: Duration, now: i64) -> Option<PeerRecord> {
        let wanted = normalize_username(username);
        let peer = self.peers.values().find(|p| {
            p.usernames.iter().any(|u| normalize_username(u) == wanted)
        })?;
        if is_stale(peer.last_update_on, ttl, now) {
            tracing::warn!("[storage] cached username @{wanted} expired");
            return None;
        }
        Some(peer.to_record())
    }

    pub(crate) fn by_phone_number(&self, phone_number: &str) -> Option<PeerRecord> {
        let wanted = normalize_phone(phone_number);
        if wanted.is_empty() {
            return None;
        }
        self.peers
            .values()
            .find(|p| p.phone_number.as_deref() == Some(wanted.as_str()))
            .map(CachedPeer::to_record)
    }
}

pub(crate) fn is_stale(last_update_on: i64, ttl: Duration, now: i64) -> bool {
    now.saturating_sub(last_update_on).unsigned_abs() > ttl.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: i64, username: Option<&str>, phone: Option<&str>) -> PeerRecord {
        PeerRecord {
            id,
            access_hash:  id * 10,
            peer_type:    PeerType::User,
            username:     username.map(str::to_owned),
            phone_number: phone.map(str::to_owned),
        }
    }

    #[test]
    fn upsert_replaces_existing_peer() {
        let mut cache = PeerCache::default();
        cache.upsert(&[peer(1, Some("alice"), None)], 100);
        let mut updated = peer(1, None, Some("+1 555"));
        updated.access_hash = 99;
        cache.upsert(&[updated], 200);

        let got = cache.by_id(1).unwrap();
        assert_eq!(got.access_hash, 99);
        assert_eq!(got.username.as_deref(), Some("alice"));
        assert_eq!(got.phone_number.as_deref(), Some("1555"));
        assert_eq!(cache.peers[&1].last_update_on, 200);
    }

    #[test]
    fn usernames_are_replaced_per_id() {
        let mut cache = PeerCache::default();
        cache.upsert(&[peer(1, Some("old"), None), peer(2, Some("bob"), None)], 0);
        cache.set_usernames(&[(1, "first".into()), (1, "second".into()), (3, "ghost".into())]);

        assert!(cache.by_username("old", Duration::from_secs(60), 0).is_none());
        assert_eq!(cache.by_username("@SECOND", Duration::from_secs(60), 0).unwrap().id, 1);
        assert_eq!(cache.by_id(1).unwrap().username.as_deref(), Some("first"));
        assert_eq!(cache.by_username("bob", Duration::from_secs(60), 0).unwrap().id, 2);
        assert!(cache.by_id(3).is_none());
    }

    #[test]
    fn stale_usernames_are_not_resolved() {
        let mut cache = PeerCache::default();
        cache.upsert(&[peer(1, Some("alice"), None)], 1_000);
        let ttl = Duration::from_secs(100);
        assert!(cache.by_username("alice", ttl, 1_100).is_some());
        assert!(cache.by_username("alice", ttl, 1_101).is_none());
        assert!(cache.by_id(1).is_some());
    }

    #[test]
    fn phone_lookup_ignores_formatting() {
        let mut cache = PeerCache::default();
        cache.upsert(&[peer(7, None, Some("+44 20 7946 0000"))], 0);
        assert_eq!(cache.by_phone_number("442079460000").unwrap().id, 7);
        assert!(cache.by_phone_number("").is_none());
    }
}
