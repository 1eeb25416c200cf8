//! Envelope framing shared by every binary file in an Icechunk repository:
//! a fixed 39-byte header (magic, version, file type, compression) followed
//! by an optionally zstd-compressed FlatBuffers payload.

use tracing::{debug, instrument, warn};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{FormatErrorKind, IcechunkError};

/// `"ICE" + 0xF0 0x9F 0xA7 0x8A + "CHUNK"`.
const MAGIC: [u8; 12] = *b"ICE\xF0\x9F\xA7\x8ACHUNK";

/// Highest spec version this client understands.
const LATEST_SPEC_VERSION: u8 = 1;

/// FlatBuffers file identifier required at bytes 4..8 of every decompressed
/// payload.
const FILE_ID: [u8; 4] = *b"Ichk";

/// Byte length of the fixed header.
pub const HEADER_LEN: usize = 39;

/// File type byte, distinguishing the four binary file kinds.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FileType {
    /// `snapshots/{id}`
    Snapshot,
    /// `manifests/{id}`
    Manifest,
    /// Transaction log (unused by the read path; decoded for completeness
    /// of the file-type contract).
    TxLog,
    /// Attribute file.
    Attr,
}

impl FileType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Snapshot),
            1 => Some(Self::Manifest),
            2 => Some(Self::TxLog),
            3 => Some(Self::Attr),
            _ => None,
        }
    }
}

/// Compression scheme byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Compression {
    None,
    Zstd,
}

impl Compression {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// The fixed-layout portion of the header: 12B magic, 24B space-padded
/// version string, then three single-byte fields. Read with `zerocopy`,
/// the same way the teacher crate reads its trailing footer struct.
#[derive(Clone, Copy, FromBytes, IntoBytes, Unaligned, KnownLayout, Immutable)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 12],
    version_string: [u8; 24],
    spec_version: u8,
    file_type: u8,
    compression: u8,
}

/// A parsed envelope header plus the raw decompressed FlatBuffers payload.
#[derive(Debug)]
pub struct Envelope {
    /// Space-trimmed version string from the header (e.g. `"ic-0.3.16"`).
    pub version_string: String,
    /// Spec version byte.
    pub spec_version: u8,
    /// File type this envelope claims to carry.
    pub file_type: FileType,
    /// Decompressed FlatBuffers payload, with the `"Ichk"` identifier still
    /// at bytes 4..8.
    pub payload: Vec<u8>,
}

/// Parse and validate an envelope, decompressing its payload.
///
/// `expected` restricts acceptance to a single file type (callers know
/// whether they're opening a snapshot or a manifest); pass `None` to accept
/// any type.
#[instrument(level = "debug", skip(data))]
pub fn decode_envelope(data: &[u8], expected: Option<FileType>) -> Result<Envelope, IcechunkError> {
    if data.len() < HEADER_LEN {
        return Err(IcechunkError::Format(FormatErrorKind::Magic));
    }

    let (header_bytes, rest) = data.split_at(HEADER_LEN);
    let header =
        RawHeader::ref_from_bytes(header_bytes).map_err(|_| IcechunkError::Format(FormatErrorKind::Magic))?;

    if header.magic != MAGIC {
        return Err(IcechunkError::Format(FormatErrorKind::Magic));
    }

    if header.spec_version > LATEST_SPEC_VERSION {
        return Err(IcechunkError::Format(FormatErrorKind::Version));
    }

    let file_type =
        FileType::from_byte(header.file_type).ok_or(IcechunkError::Format(FormatErrorKind::FileType))?;

    if let Some(expected) = expected {
        if expected != file_type {
            warn!(?file_type, ?expected, "envelope file type mismatch");
            return Err(IcechunkError::Format(FormatErrorKind::FileType));
        }
    }

    let compression = Compression::from_byte(header.compression)
        .ok_or(IcechunkError::Format(FormatErrorKind::Compression))?;

    let payload = match compression {
        Compression::None => rest.to_vec(),
        Compression::Zstd => zstd::decode_all(rest).map_err(|e| {
            warn!(error = %e, "zstd decompression failed");
            IcechunkError::Format(FormatErrorKind::Compression)
        })?,
    };

    if payload.len() < 8 || payload[4..8] != FILE_ID {
        return Err(IcechunkError::Format(FormatErrorKind::FileId));
    }

    let version_string = String::from_utf8_lossy(&header.version_string)
        .trim_end()
        .to_string();

    debug!(%version_string, spec_version = header.spec_version, ?file_type, payload_len = payload.len(), "decoded envelope");

    Ok(Envelope {
        version_string,
        spec_version: header.spec_version,
        file_type,
        payload,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn build_envelope(file_type: u8, compression: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        let mut version = [b' '; 24];
        version[..9].copy_from_slice(b"ic-0.3.16");
        out.extend_from_slice(&version);
        out.push(1); // spec version
        out.push(file_type);
        out.push(compression);
        out.extend_from_slice(payload);
        out
    }

    fn flatbuffers_stub_payload() -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&FILE_ID);
        payload.extend_from_slice(&[0u8; 4]);
        payload
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = build_envelope(0, 0, &flatbuffers_stub_payload());
        data[0] = 0xFF;
        let err = decode_envelope(&data, None).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::Magic)));
    }

    #[test]
    fn rejects_future_spec_version() {
        let mut data = build_envelope(0, 0, &flatbuffers_stub_payload());
        data[12 + 24] = LATEST_SPEC_VERSION + 1;
        let err = decode_envelope(&data, None).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::Version)));
    }

    #[test]
    fn rejects_unknown_compression() {
        let data = build_envelope(0, 0xAA, &flatbuffers_stub_payload());
        let err = decode_envelope(&data, None).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::Compression)));
    }

    #[test]
    fn rejects_missing_file_id() {
        let data = build_envelope(0, 0, &[0u8; 8]);
        let err = decode_envelope(&data, None).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::FileId)));
    }

    #[test]
    fn accepts_uncompressed_snapshot() {
        let data = build_envelope(0, 0, &flatbuffers_stub_payload());
        let envelope = decode_envelope(&data, Some(FileType::Snapshot)).unwrap();
        assert_eq!(envelope.version_string, "ic-0.3.16");
        assert_eq!(envelope.file_type, FileType::Snapshot);
    }

    #[test]
    fn rejects_wrong_expected_type() {
        let data = build_envelope(0, 0, &flatbuffers_stub_payload());
        let err = decode_envelope(&data, Some(FileType::Manifest)).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(_)));
    }

    #[test]
    fn roundtrips_zstd_payload() {
        let inner = flatbuffers_stub_payload();
        let compressed = zstd::encode_all(&inner[..], 0).unwrap();
        let data = build_envelope(1, 1, &compressed);
        let envelope = decode_envelope(&data, Some(FileType::Manifest)).unwrap();
        assert_eq!(envelope.payload, inner);
    }
}
