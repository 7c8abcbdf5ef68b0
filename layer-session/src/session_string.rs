//! Session strings — a whole [`SessionRecord`] packed into one URL-safe token.
//!
//! Three binary layouts exist. They are told apart by their decoded size, so
//! every field is fixed-width; only [`SessionLayout::Current`] is ever written.
//!
//! ```text
//! Legacy32  version:u8 test_mode:u8 auth_key:[256] dc_id:u32 is_bot:u8            263 B
//! Legacy64  version:u8 test_mode:u8 auth_key:[256] dc_id:u64 is_bot:u8            267 B
//! Current   dc_id:u8 api_id:u32 test_mode:u8 auth_key:[256] user_id:u64 is_bot:u8
//!           server_address:[15] server_address_v6:[39] server_port:[5]
//!           media_address:[15]  media_address_v6:[39]  media_port:[5]          389 B
//! ```
//!
//! Integers are big-endian. Text fields are ASCII, zero-padded per group by
//! [`crate::padding`] and NUL-filled up to the field width.

use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};

use crate::errors::SessionError;
use crate::padding::{self, AddressKind, PORT_WIDTH};
use crate::record::{AUTH_KEY_LEN, SessionRecord};

// ─── Layouts ──────────────────────────────────────────────────────────────────

/// The binary layout a session string was decoded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionLayout {
    /// 32-bit DC id, no endpoints.
    Legacy32,
    /// 64-bit DC id, no endpoints.
    Legacy64,
    /// Credentials, identity and both endpoints.
    Current,
}

impl SessionLayout {
    pub const ALL: [SessionLayout; 3] = [Self::Legacy32, Self::Legacy64, Self::Current];

    /// Decoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Legacy32 => 1 + 1 + AUTH_KEY_LEN + 4 + 1,
            Self::Legacy64 => 1 + 1 + AUTH_KEY_LEN + 8 + 1,
            Self::Current  => 1 + 4 + 1 + AUTH_KEY_LEN + 8 + 1
                + 2 * (AddressKind::V4.field_width() + AddressKind::V6.field_width() + PORT_WIDTH),
        }
    }

    pub fn from_size(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.size() == len)
    }

    /// Whether strings of this layout carry server/media endpoints. When they
    /// don't, the caller has to supply defaults before connecting.
    pub const fn has_endpoints(self) -> bool {
        matches!(self, Self::Current)
    }
}

/// Result of [`decode`]: the record plus the layout it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedSession {
    pub record: SessionRecord,
    pub layout: SessionLayout,
}

// ─── Encode ───────────────────────────────────────────────────────────────────

/// Encode `record` into a session string using the current layout.
///
/// The output uses the URL-safe base64 alphabet without `=` padding.
pub fn encode(record: &SessionRecord) -> Result<String, SessionError> {
    let packed = pack(record)?;
    Ok(URL_SAFE_NO_PAD.encode(packed))
}

/// Pack `record` into the current binary layout.
///
/// Every address and port is validated before anything is written.
pub fn pack(record: &SessionRecord) -> Result<Vec<u8>, SessionError> {
    let server_address    = padding::pad_address("server_address", &record.server_address, AddressKind::V4)?;
    let server_address_v6 = padding::pad_address("server_address_v6", &record.server_address_v6, AddressKind::V6)?;
    let server_port       = padding::pad_port("server_port", record.server_port, PORT_WIDTH)?;
    let media_address     = padding::pad_address("media_address", &record.media_address, AddressKind::V4)?;
    let media_address_v6  = padding::pad_address("media_address_v6", &record.media_address_v6, AddressKind::V6)?;
    let media_port        = padding::pad_port("media_port", record.media_port, PORT_WIDTH)?;

    let mut b = Vec::with_capacity(SessionLayout::Current.size());
    b.push(record.dc_id);
    b.extend_from_slice(&record.api_id.to_be_bytes());
    b.push(record.test_mode as u8);
    b.extend_from_slice(&record.auth_key);
    b.extend_from_slice(&record.user_id.to_be_bytes());
    b.push(record.is_bot as u8);
    put_text(&mut b, &server_address,    AddressKind::V4.field_width());
    put_text(&mut b, &server_address_v6, AddressKind::V6.field_width());
    put_text(&mut b, &server_port,       PORT_WIDTH);
    put_text(&mut b, &media_address,     AddressKind::V4.field_width());
    put_text(&mut b, &media_address_v6,  AddressKind::V6.field_width());
    put_text(&mut b, &media_port,        PORT_WIDTH);
    debug_assert_eq!(b.len(), SessionLayout::Current.size());

    tracing::debug!("[session] packed DC{} session ({} bytes)", record.dc_id, b.len());
    Ok(b)
}

/// Write `text` and NUL-fill the rest of a `width`-byte field.
fn put_text(b: &mut Vec<u8>, text: &str, width: usize) {
    b.extend_from_slice(text.as_bytes());
    b.resize(b.len() + width.saturating_sub(text.len()), 0);
}

// ─── Decode ───────────────────────────────────────────────────────────────────

/// Decode a session string of any known layout.
///
/// `=` padding is optional; surrounding whitespace is ignored.
pub fn decode(session_string: &str) -> Result<DecodedSession, SessionError> {
    let bytes = decode_base64(session_string)?;
    let layout = SessionLayout::from_size(bytes.len())
        .ok_or(SessionError::UnknownSessionFormat { len: bytes.len() })?;
    let record = unpack(&bytes, layout)?;
    tracing::debug!("[session] decoded {layout:?} session for DC{}", record.dc_id);
    Ok(DecodedSession { record, layout })
}

fn decode_base64(session_string: &str) -> Result<Vec<u8>, SessionError> {
    let mut text = session_string.trim().trim_end_matches('=').to_owned();
    let missing = (4 - text.len() % 4) % 4;
    text.extend(std::iter::repeat_n('=', missing));
    URL_SAFE
        .decode(text.as_bytes())
        .map_err(|e| SessionError::MalformedSessionString(e.to_string()))
}

/// Unpack raw bytes laid out as `layout`.
pub fn unpack(bytes: &[u8], layout: SessionLayout) -> Result<SessionRecord, SessionError> {
    if bytes.len() != layout.size() {
        return Err(SessionError::UnknownSessionFormat { len: bytes.len() });
    }
    let mut r = Reader::new(bytes);
    match layout {
        SessionLayout::Legacy32 | SessionLayout::Legacy64 => {
            let _version  = r.u8()?;
            let test_mode = r.bool()?;
            let auth_key  = r.array::<AUTH_KEY_LEN>()?;
            let dc_id = if layout == SessionLayout::Legacy32 {
                u64::from(r.u32()?)
            } else {
                r.u64()?
            };
            let dc_id = u8::try_from(dc_id)
                .map_err(|_| SessionError::invalid("dc_id", format!("{dc_id} is out of range")))?;
            let is_bot = r.bool()?;

            let mut record = SessionRecord::new(dc_id, auth_key);
            record.test_mode = test_mode;
            record.is_bot = is_bot;
            Ok(record)
        }
        SessionLayout::Current => {
            let dc_id     = r.u8()?;
            let api_id    = r.u32()?;
            let test_mode = r.bool()?;
            let auth_key  = r.array::<AUTH_KEY_LEN>()?;
            let user_id   = r.u64()?;
            let is_bot    = r.bool()?;
            let server_address    = r.address("server_address", AddressKind::V4)?;
            let server_address_v6 = r.address("server_address_v6", AddressKind::V6)?;
            let server_port       = r.port("server_port")?;
            let media_address     = r.address("media_address", AddressKind::V4)?;
            let media_address_v6  = r.address("media_address_v6", AddressKind::V6)?;
            let media_port        = r.port("media_port")?;
            Ok(SessionRecord {
                dc_id,
                api_id,
                test_mode,
                auth_key,
                user_id,
                is_bot,
                server_address,
                server_address_v6,
                server_port,
                media_address,
                media_address_v6,
                media_port,
            })
        }
    }
}

// ─── Reader ───────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SessionError> {
        let s = self.buf
            .get(self.pos..self.pos + n)
            .ok_or(SessionError::UnknownSessionFormat { len: self.buf.len() })?;
        self.pos += n;
        Ok(s)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SessionError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SessionError> { Ok(self.array::<1>()?[0]) }

    fn bool(&mut self) -> Result<bool, SessionError> { Ok(self.u8()? != 0) }

    fn u32(&mut self) -> Result<u32, SessionError> { Ok(u32::from_be_bytes(self.array()?)) }

    fn u64(&mut self) -> Result<u64, SessionError> { Ok(u64::from_be_bytes(self.array()?)) }

    /// A NUL-filled ASCII field.
    fn text(&mut self, field: &'static str, width: usize) -> Result<&'a str, SessionError> {
        let raw = self.take(width)?;
        let end = raw.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
        let raw = &raw[..end];
        if !raw.is_ascii() {
            return Err(SessionError::invalid(field, "non-ASCII bytes"));
        }
        std::str::from_utf8(raw).map_err(|e| SessionError::invalid(field, e.to_string()))
    }

    fn address(&mut self, field: &'static str, kind: AddressKind) -> Result<String, SessionError> {
        let text = self.text(field, kind.field_width())?;
        padding::unpad_address(field, text, kind)
    }

    fn port(&mut self, field: &'static str) -> Result<u32, SessionError> {
        let text = self.text(field, PORT_WIDTH)?;
        padding::unpad_port(field, text)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionRecord {
        SessionRecord {
            dc_id:             2,
            api_id:            12345,
            test_mode:         false,
            auth_key:          [0u8; AUTH_KEY_LEN],
            user_id:           987_654_321,
            is_bot:            false,
            server_address:    "149.154.167.50".into(),
            server_address_v6: "2001:67c:4e8:f002::a".into(),
            server_port:       443,
            media_address:     "149.154.167.51".into(),
            media_address_v6:  "2001:67c:4e8:f002::b".into(),
            media_port:        443,
        }
    }

    fn legacy_bytes(layout: SessionLayout, dc_id: u64, test_mode: bool, is_bot: bool) -> Vec<u8> {
        let mut b = vec![1u8, test_mode as u8];
        b.extend_from_slice(&[7u8; AUTH_KEY_LEN]);
        match layout {
            SessionLayout::Legacy32 => b.extend_from_slice(&(dc_id as u32).to_be_bytes()),
            _                       => b.extend_from_slice(&dc_id.to_be_bytes()),
        }
        b.push(is_bot as u8);
        b
    }

    #[test]
    fn layout_sizes_are_distinct() {
        assert_eq!(SessionLayout::Legacy32.size(), 263);
        assert_eq!(SessionLayout::Legacy64.size(), 267);
        assert_eq!(SessionLayout::Current.size(), 389);
        for a in SessionLayout::ALL {
            assert_eq!(SessionLayout::from_size(a.size()), Some(a));
        }
    }

    #[test]
    fn current_layout_round_trip() {
        let rec = sample();
        let s = encode(&rec).unwrap();
        assert!(!s.contains('='));
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        let decoded = decode(&s).unwrap();
        assert_eq!(decoded.layout, SessionLayout::Current);
        assert_eq!(decoded.record, rec);
    }

    #[test]
    fn packed_fields_are_big_endian_and_in_order() {
        let b = pack(&sample()).unwrap();
        assert_eq!(b.len(), 389);
        assert_eq!(b[0], 2);
        assert_eq!(&b[1..5], &12345u32.to_be_bytes());
        assert_eq!(b[5], 0);
        assert_eq!(&b[262..270], &987_654_321u64.to_be_bytes());
        assert_eq!(&b[271..286], b"149.154.167.050");
        assert_eq!(&b[286..315], b"2001:067c:04e8:f002:0000:000a");
        assert!(b[315..325].iter().all(|&c| c == 0));
        assert_eq!(&b[325..330], b"00443");
    }

    #[test]
    fn padding_is_optional() {
        let unpadded = encode(&sample()).unwrap();
        let padded = URL_SAFE.encode(pack(&sample()).unwrap());
        assert!(padded.ends_with('='));
        assert_eq!(decode(&padded).unwrap(), decode(&unpadded).unwrap());
    }

    #[test]
    fn legacy_32_populates_only_core_fields() {
        let s = URL_SAFE_NO_PAD.encode(legacy_bytes(SessionLayout::Legacy32, 1, false, true));
        let decoded = decode(&s).unwrap();
        assert_eq!(decoded.layout, SessionLayout::Legacy32);
        assert!(!decoded.layout.has_endpoints());

        let rec = decoded.record;
        assert_eq!(rec.dc_id, 1);
        assert!(rec.is_bot);
        assert!(!rec.test_mode);
        assert_eq!(rec.auth_key, [7u8; AUTH_KEY_LEN]);
        assert_eq!(rec.api_id, 0);
        assert_eq!(rec.user_id, 0);
        assert!(rec.server_address.is_empty());
        assert!(rec.media_address_v6.is_empty());
        assert_eq!(rec.server_port, 0);
        assert!(!rec.has_endpoints());
    }

    #[test]
    fn legacy_64_uses_wide_dc_id() {
        let s = URL_SAFE_NO_PAD.encode(legacy_bytes(SessionLayout::Legacy64, 4, true, false));
        let decoded = decode(&s).unwrap();
        assert_eq!(decoded.layout, SessionLayout::Legacy64);
        assert_eq!(decoded.record.dc_id, 4);
        assert!(decoded.record.test_mode);
        assert!(!decoded.record.is_bot);
    }

    #[test]
    fn legacy_dc_id_out_of_range() {
        let s = URL_SAFE_NO_PAD.encode(legacy_bytes(SessionLayout::Legacy64, 1 << 40, false, false));
        let err = decode(&s).unwrap_err();
        assert!(matches!(err, SessionError::InvalidField { field: "dc_id", .. }));
    }

    #[test]
    fn unknown_length_is_rejected() {
        let s = URL_SAFE_NO_PAD.encode([0u8; 300]);
        assert_eq!(decode(&s).unwrap_err(), SessionError::UnknownSessionFormat { len: 300 });
    }

    #[test]
    fn invalid_base64_is_malformed() {
        assert!(matches!(decode("not*base64!"), Err(SessionError::MalformedSessionString(_))));
        assert!(matches!(decode("abcde"), Err(SessionError::MalformedSessionString(_))));
    }

    #[test]
    fn boundary_values_encode() {
        let mut rec = sample();
        rec.server_address = "999.999.999.999".into();
        rec.media_port = 99_999;
        let decoded = decode(&encode(&rec).unwrap()).unwrap();
        assert_eq!(decoded.record, rec);
    }

    #[test]
    fn over_wide_fields_fail() {
        let mut rec = sample();
        rec.server_address = "1000.1.1.1".into();
        assert!(matches!(
            encode(&rec),
            Err(SessionError::FieldTooWide { field: "server_address", .. })
        ));

        let mut rec = sample();
        rec.server_port = 100_000;
        assert!(matches!(
            encode(&rec),
            Err(SessionError::FieldTooWide { field: "server_port", .. })
        ));
    }

    #[test]
    fn empty_endpoints_round_trip() {
        let mut rec = sample();
        rec.server_address_v6.clear();
        rec.media_address.clear();
        rec.media_port = 0;
        assert_eq!(decode(&encode(&rec).unwrap()).unwrap().record, rec);
    }
}
