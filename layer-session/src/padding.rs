//! Fixed-width text fields for addresses and ports.
//!
//! The current session layout stores endpoints as ASCII text of a constant
//! width, so every group of an address is left-padded with `'0'`
//! (`149.154.167.50` → `149.154.167.050`) and every port is padded to five
//! digits (`443` → `00443`). The inverse strips the padding again.

use std::net::Ipv6Addr;

use crate::errors::SessionError;

/// Width of a padded port field.
pub const PORT_WIDTH: usize = 5;

// ─── AddressKind ──────────────────────────────────────────────────────────────

/// The two address families stored in a session string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    /// Dotted decimal, three digits per octet.
    V4,
    /// Colon-separated hex, four digits per group.
    V6,
}

impl AddressKind {
    /// Characters per group once padded.
    pub const fn group_width(self) -> usize {
        match self { Self::V4 => 3, Self::V6 => 4 }
    }

    pub const fn separator(self) -> char {
        match self { Self::V4 => '.', Self::V6 => ':' }
    }

    /// Size of the fixed field reserved for the padded address.
    pub const fn field_width(self) -> usize {
        match self { Self::V4 => 15, Self::V6 => 39 }
    }

    fn accepts(self, c: char) -> bool {
        match self {
            Self::V4 => c.is_ascii_digit(),
            Self::V6 => c.is_ascii_hexdigit(),
        }
    }
}

// ─── Addresses ────────────────────────────────────────────────────────────────

/// Left-pad every group of `text` to [`AddressKind::group_width`].
///
/// Empty groups (the pieces around an IPv6 `::`) become all-zero groups. When
/// that would make the `::` placement ambiguous on the way back, the IPv6
/// address is written fully expanded instead. An empty address stays empty.
pub fn pad_address(field: &'static str, text: &str, kind: AddressKind) -> Result<String, SessionError> {
    if text.is_empty() {
        return Ok(String::new());
    }
    let width = kind.group_width();
    let mut groups = Vec::new();
    for group in text.split(kind.separator()) {
        if group.len() > width {
            return Err(SessionError::FieldTooWide { field, value: group.to_owned(), width });
        }
        if let Some(c) = group.chars().find(|&c| !kind.accepts(c)) {
            return Err(SessionError::invalid(field, format!("unexpected character {c:?} in {text:?}")));
        }
        groups.push(format!("{group:0>width$}"));
    }
    let mut padded = groups.join(&kind.separator().to_string());
    if kind == AddressKind::V6 && text.contains("::") {
        if let Ok(addr) = text.parse::<Ipv6Addr>() {
            let restored = unpad_address(field, &padded, kind).ok().and_then(|r| r.parse().ok());
            if restored != Some(addr) {
                padded = expand_v6(addr);
            }
        }
    }
    if padded.len() > kind.field_width() {
        return Err(SessionError::FieldTooWide {
            field,
            value: text.to_owned(),
            width: kind.field_width(),
        });
    }
    Ok(padded)
}

/// Strip the zero padding added by [`pad_address`].
pub fn unpad_address(field: &'static str, text: &str, kind: AddressKind) -> Result<String, SessionError> {
    if text.is_empty() {
        return Ok(String::new());
    }
    let mut groups = Vec::new();
    for group in text.split(kind.separator()) {
        if group.is_empty() || group.chars().any(|c| !kind.accepts(c)) {
            return Err(SessionError::invalid(field, format!("malformed padded address {text:?}")));
        }
        groups.push(strip_group(group));
    }
    Ok(match kind {
        AddressKind::V4 => groups.join("."),
        AddressKind::V6 => restore_compression(&groups),
    })
}

/// All eight groups, four digits each; decodes without any `::` guessing.
fn expand_v6(addr: Ipv6Addr) -> String {
    addr.segments()
        .iter()
        .map(|g| format!("{g:04x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn strip_group(group: &str) -> &str {
    let s = group.trim_start_matches('0');
    if s.is_empty() { "0" } else { s }
}

/// Put the `::` back into an IPv6 address whose compressed run was padded
/// into a single all-zero group (or two, at either end).
///
/// [`pad_address`] never produces an ambiguous field; for hand-made input the
/// canonical placement wins, then the rightmost valid one.
fn restore_compression(groups: &[&str]) -> String {
    let plain = groups.join(":");
    let n = groups.len();
    if !(3..8).contains(&n) {
        return plain;
    }
    let zero = |i: usize| groups[i] == "0";

    let mut candidates = Vec::new();
    if zero(n - 2) && zero(n - 1) {
        candidates.push(format!("{}::", groups[..n - 2].join(":")));
    }
    for i in (1..n - 1).rev() {
        if zero(i) {
            candidates.push(format!("{}::{}", groups[..i].join(":"), groups[i + 1..].join(":")));
        }
    }
    if zero(0) && zero(1) {
        candidates.push(format!("::{}", groups[2..].join(":")));
    }
    if n == 3 && zero(0) && zero(1) && zero(2) {
        candidates.push("::".to_owned());
    }

    let valid: Vec<(String, Ipv6Addr)> = candidates
        .into_iter()
        .filter_map(|c| c.parse().ok().map(|addr| (c, addr)))
        .collect();
    valid
        .iter()
        .find(|(c, addr)| addr.to_string().eq_ignore_ascii_case(c))
        .or_else(|| valid.first())
        .map(|(c, _)| c.clone())
        .unwrap_or(plain)
}

// ─── Ports ────────────────────────────────────────────────────────────────────

/// Format `port` as decimal, left-padded with `'0'` to `width` digits.
pub fn pad_port(field: &'static str, port: u32, width: usize) -> Result<String, SessionError> {
    let digits = port.to_string();
    if digits.len() > width {
        return Err(SessionError::FieldTooWide { field, value: digits, width });
    }
    Ok(format!("{digits:0>width$}"))
}

pub fn unpad_port(field: &'static str, text: &str) -> Result<u32, SessionError> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SessionError::invalid(field, format!("malformed padded port {text:?}")));
    }
    let digits = text.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse()
        .map_err(|e| SessionError::invalid(field, format!("{e}")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_pads_each_octet() {
        let padded = pad_address("a", "149.154.167.50", AddressKind::V4).unwrap();
        assert_eq!(padded, "149.154.167.050");
        let padded = pad_address("a", "10.0.0.1", AddressKind::V4).unwrap();
        assert_eq!(padded, "010.000.000.001");
        assert_eq!(unpad_address("a", &padded, AddressKind::V4).unwrap(), "10.0.0.1");
    }

    #[test]
    fn ipv4_octet_boundary() {
        assert_eq!(pad_address("a", "999.1.1.1", AddressKind::V4).unwrap(), "999.001.001.001");
        let err = pad_address("a", "1000.1.1.1", AddressKind::V4).unwrap_err();
        assert!(matches!(err, SessionError::FieldTooWide { width: 3, .. }));
    }

    #[test]
    fn ipv4_too_many_octets() {
        let err = pad_address("a", "1.2.3.4.5", AddressKind::V4).unwrap_err();
        assert!(matches!(err, SessionError::FieldTooWide { width: 15, .. }));
    }

    #[test]
    fn ipv4_rejects_letters() {
        let err = pad_address("a", "1.2.x.4", AddressKind::V4).unwrap_err();
        assert!(matches!(err, SessionError::InvalidField { field: "a", .. }));
    }

    #[test]
    fn ipv6_compressed_run_round_trips() {
        for addr in [
            "2001:67c:4e8:f002::a",
            "2001:b28:f23d:f001::e",
            "::1",
            "fe80::",
            "::",
            "2001:db8:1:2:3:4:5:6",
        ] {
            let padded = pad_address("a", addr, AddressKind::V6).unwrap();
            assert_eq!(unpad_address("a", &padded, AddressKind::V6).unwrap(), addr, "{padded}");
        }
    }

    #[test]
    fn ipv6_with_second_zero_group_is_written_expanded() {
        let padded = pad_address("a", "1::2:0:3", AddressKind::V6).unwrap();
        assert_eq!(padded, "0001:0000:0000:0000:0000:0002:0000:0003");
        let back: Ipv6Addr = unpad_address("a", &padded, AddressKind::V6).unwrap().parse().unwrap();
        assert_eq!(back, "1::2:0:3".parse::<Ipv6Addr>().unwrap());

        let padded = pad_address("a", "2001:db8:0:1::1", AddressKind::V6).unwrap();
        let back: Ipv6Addr = unpad_address("a", &padded, AddressKind::V6).unwrap().parse().unwrap();
        assert_eq!(back, "2001:db8:0:1::1".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn ipv6_padded_form() {
        let padded = pad_address("a", "2001:67c:4e8:f002::a", AddressKind::V6).unwrap();
        assert_eq!(padded, "2001:067c:04e8:f002:0000:000a");
    }

    #[test]
    fn ipv6_group_boundary() {
        assert!(pad_address("a", "ffff::1", AddressKind::V6).is_ok());
        let err = pad_address("a", "10000::1", AddressKind::V6).unwrap_err();
        assert!(matches!(err, SessionError::FieldTooWide { width: 4, .. }));
    }

    #[test]
    fn empty_address_stays_empty() {
        assert_eq!(pad_address("a", "", AddressKind::V6).unwrap(), "");
        assert_eq!(unpad_address("a", "", AddressKind::V4).unwrap(), "");
    }

    #[test]
    fn port_boundary() {
        assert_eq!(pad_port("p", 443, PORT_WIDTH).unwrap(), "00443");
        assert_eq!(pad_port("p", 99_999, PORT_WIDTH).unwrap(), "99999");
        let err = pad_port("p", 100_000, PORT_WIDTH).unwrap_err();
        assert!(matches!(err, SessionError::FieldTooWide { field: "p", width: 5, .. }));
    }

    #[test]
    fn port_unpad() {
        assert_eq!(unpad_port("p", "00443").unwrap(), 443);
        assert_eq!(unpad_port("p", "00000").unwrap(), 0);
        assert!(unpad_port("p", "0a443").is_err());
    }
}
