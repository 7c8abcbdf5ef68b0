//! Bootstrap DC address table.
//!
//! Legacy session strings carry only a DC id; the endpoints are filled in from
//! here when such a string is imported.

/// Well-known endpoints of one data center.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DcAddress {
    pub dc_id:      u8,
    pub ipv4:       &'static str,
    pub ipv6:       &'static str,
    pub media_ipv4: &'static str,
    pub media_ipv6: &'static str,
    pub port:       u32,
}

const fn dc(dc_id: u8, ipv4: &'static str, ipv6: &'static str) -> DcAddress {
    DcAddress { dc_id, ipv4, ipv6, media_ipv4: ipv4, media_ipv6: ipv6, port: 443 }
}

const fn media(base: DcAddress, media_ipv4: &'static str, media_ipv6: &'static str) -> DcAddress {
    DcAddress { media_ipv4, media_ipv6, ..base }
}

const PRODUCTION: [DcAddress; 5] = [
    dc(1, "149.154.175.53", "2001:b28:f23d:f001::a"),
    media(
        dc(2, "149.154.167.51", "2001:67c:4e8:f002::a"),
        "149.154.167.151", "2001:67c:4e8:f002::b",
    ),
    dc(3, "149.154.175.100", "2001:b28:f23d:f003::a"),
    media(
        dc(4, "149.154.167.91", "2001:67c:4e8:f004::a"),
        "149.154.164.250", "2001:67c:4e8:f004::b",
    ),
    dc(5, "91.108.56.130", "2001:b28:f23f:f005::a"),
];

const TEST: [DcAddress; 3] = [
    dc(1, "149.154.175.10", "2001:b28:f23d:f001::e"),
    dc(2, "149.154.167.40", "2001:67c:4e8:f002::e"),
    dc(3, "149.154.175.117", "2001:b28:f23d:f003::e"),
];

/// Endpoints of `dc_id` on the production or test network.
pub fn lookup(dc_id: u8, test_mode: bool) -> Option<&'static DcAddress> {
    let table: &'static [DcAddress] = if test_mode { &TEST } else { &PRODUCTION };
    table.iter().find(|d| d.dc_id == dc_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_media_dcs_differ() {
        let dc2 = lookup(2, false).unwrap();
        assert_eq!(dc2.media_ipv4, "149.154.167.151");
        let dc1 = lookup(1, false).unwrap();
        assert_eq!(dc1.media_ipv4, dc1.ipv4);
    }

    #[test]
    fn test_network_has_three_dcs() {
        assert!(lookup(3, true).is_some());
        assert!(lookup(4, true).is_none());
        assert!(lookup(0, false).is_none());
    }

    #[test]
    fn every_default_endpoint_fits_a_session_string() {
        use crate::padding::{AddressKind, pad_address};
        for d in PRODUCTION.iter().chain(TEST.iter()) {
            pad_address("ipv4", d.ipv4, AddressKind::V4).unwrap();
            pad_address("ipv6", d.ipv6, AddressKind::V6).unwrap();
            pad_address("ipv4", d.media_ipv4, AddressKind::V4).unwrap();
            pad_address("ipv6", d.media_ipv6, AddressKind::V6).unwrap();
        }
    }
}
