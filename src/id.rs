//! Content-addressed object identifiers and the Crockford Base32 codec used
//! to render them externally.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{FormatErrorKind, IcechunkError};

/// Crockford's Base32 alphabet: `0-9A-HJ-NP-TV-Z` (no `I`, `L`, `O`, `U`).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Number of Base32 symbols needed to render 12 raw bytes (`ceil(8*12/5)`).
const OBJECT_ID12_SYMBOLS: usize = 20;

fn symbol_value(c: u8) -> Option<u8> {
    let upper = c.to_ascii_uppercase();
    match upper {
        b'O' => Some(0),
        b'I' | b'L' => Some(1),
        _ => ALPHABET.iter().position(|&s| s == upper).map(|p| p as u8),
    }
}

/// Encode raw bytes as Crockford Base32, MSB-first, no padding.
///
/// The last symbol is produced from the remaining bits, zero-padded on the
/// low end. Output length is `ceil(8 * bytes.len() / 5)`.
#[must_use]
pub fn crockford_base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;

        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            out.push(ALPHABET[index] as char);
        }
    }

    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        out.push(ALPHABET[index] as char);
    }

    out
}

/// Decode a Crockford Base32 string into raw bytes.
///
/// Case-insensitive; `O` maps to `0`, `I`/`L` map to `1`. Any other unknown
/// symbol is a [`FormatErrorKind::InvalidIdSymbol`].
pub fn crockford_base32_decode(input: &str) -> Result<Vec<u8>, IcechunkError> {
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);

    for c in input.bytes() {
        let value = symbol_value(c).ok_or(IcechunkError::Format(FormatErrorKind::InvalidIdSymbol))?;
        buffer = (buffer << 5) | u32::from(value);
        bits += 5;

        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }

    Ok(out)
}

/// `true` iff `s` matches `^[0-9A-HJ-NP-TV-Z]{20}$`, case-insensitively.
///
/// This is a cheap shape check; it does not attempt to decode.
#[must_use]
pub fn is_valid_snapshot_id(s: &str) -> bool {
    s.len() == OBJECT_ID12_SYMBOLS && s.bytes().all(|c| symbol_value(c).is_some())
}

/// A 12-byte content-addressed object id (snapshots, manifests, chunks).
///
/// Serialised externally as a 20-character Crockford Base32 string.
#[derive(Clone, Copy, Eq, PartialEq, Hash, FromBytes, IntoBytes, Unaligned, KnownLayout, Immutable)]
#[repr(C)]
pub struct ObjectId12(pub [u8; 12]);

impl ObjectId12 {
    /// Parse a 20-character Base32 string into an id.
    pub fn from_base32(s: &str) -> Result<Self, IcechunkError> {
        let bytes = crockford_base32_decode(s)?;
        let array: [u8; 12] = bytes
            .get(..12)
            .and_then(|b| b.try_into().ok())
            .ok_or(IcechunkError::Format(FormatErrorKind::InvalidIdSymbol))?;
        Ok(Self(array))
    }

    /// Render as a 20-character Base32 string.
    #[must_use]
    pub fn to_base32(&self) -> String {
        crockford_base32_encode(&self.0)
    }
}

impl fmt::Debug for ObjectId12 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId12({})", self.to_base32())
    }
}

impl fmt::Display for ObjectId12 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base32())
    }
}

/// An 8-byte node identifier. Compared and keyed by its raw bytes; hex
/// rendering is a convenience for logging/debugging only.
#[derive(Clone, Copy, Eq, PartialEq, Hash, FromBytes, IntoBytes, Unaligned, KnownLayout, Immutable)]
#[repr(C)]
pub struct ObjectId8(pub [u8; 8]);

impl ObjectId8 {
    /// Render as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ObjectId8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId8({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_known_vector() {
        let bytes: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        let encoded = crockford_base32_encode(&bytes);
        assert_eq!(encoded.len(), 20);
        assert!(encoded.chars().all(|c| ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn encode_all_ones() {
        let bytes = [0xFFu8; 12];
        let encoded = crockford_base32_encode(&bytes);
        assert_eq!(encoded.len(), 20);
        assert!(is_valid_snapshot_id(&encoded));
    }

    #[test]
    fn decode_maps_ambiguous_symbols() {
        // "I" and "L" both decode as 1, "O" decodes as 0.
        let with_i = crockford_base32_decode("I").unwrap();
        let with_l = crockford_base32_decode("L").unwrap();
        let with_one = crockford_base32_decode("1").unwrap();
        assert_eq!(with_i, with_l);
        assert_eq!(with_i, with_one);

        let with_o = crockford_base32_decode("O").unwrap();
        let with_zero = crockford_base32_decode("0").unwrap();
        assert_eq!(with_o, with_zero);
    }

    #[test]
    fn decode_rejects_unknown_symbol() {
        let err = crockford_base32_decode("U").unwrap_err();
        assert!(matches!(
            err,
            IcechunkError::Format(FormatErrorKind::InvalidIdSymbol)
        ));
    }

    #[test]
    fn snapshot_id_validation() {
        assert!(is_valid_snapshot_id("1CECHNKREP0F1RSTCMT0"));
        assert!(!is_valid_snapshot_id("too-short"));
        assert!(!is_valid_snapshot_id("1CECHNKREP0F1RSTCMTU")); // contains U
    }

    proptest! {
        #[test]
        fn roundtrip_object_id12(bytes in proptest::array::uniform12(0u8..=255)) {
            let id = ObjectId12(bytes);
            let decoded = ObjectId12::from_base32(&id.to_base32()).unwrap();
            prop_assert_eq!(decoded.0, bytes);
        }

        #[test]
        fn encoded_length_matches_formula(len in 1usize..64) {
            let bytes = vec![0xABu8; len];
            let encoded = crockford_base32_encode(&bytes);
            prop_assert_eq!(encoded.len(), (8 * len).div_ceil(5));
            prop_assert!(encoded.bytes().all(|c| symbol_value(c).is_some()));
        }
    }
}
