//! Error taxonomy.
//!
//! Kinds, not type names: every fallible operation in this crate returns
//! one of the variants below, matching the taxonomy of spec-level
//! recovery policy -- absence is not an error (see `store`), only genuine
//! corruption or I/O failure raises.

use thiserror::Error;

/// Subkinds of [`IcechunkError::Format`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum FormatErrorKind {
    /// The envelope's 12-byte magic did not match.
    #[error("envelope magic mismatch")]
    Magic,
    /// The envelope's spec-version byte exceeds what this client supports.
    #[error("unsupported envelope spec version")]
    Version,
    /// The envelope's compression byte names an unknown scheme.
    #[error("unknown envelope compression scheme")]
    Compression,
    /// The envelope's file-type byte is unrecognised, or does not match
    /// what the caller expected to decode.
    #[error("unexpected or unknown envelope file type")]
    FileType,
    /// The decompressed payload is missing the `"Ichk"` FlatBuffers file
    /// identifier.
    #[error("missing or incorrect FlatBuffers file identifier")]
    FileId,
    /// A required FlatBuffers field was absent from a vtable.
    #[error("missing required field")]
    MissingField,
    /// A `ref.json` document had the wrong shape (not a single `snapshot`
    /// key, or a malformed id value).
    #[error("malformed ref document")]
    Ref,
    /// A Crockford Base32 string contained a symbol outside the alphabet.
    #[error("invalid object id symbol")]
    InvalidIdSymbol,
}

/// The crate's error type.
#[derive(Debug, Error)]
pub enum IcechunkError {
    /// Fatal, non-retriable decode/parse failure. See [`FormatErrorKind`].
    #[error("format error: {0}")]
    Format(FormatErrorKind),

    /// Transport-layer failure. Surfaced verbatim from the [`crate::transport::Transport`]
    /// implementation.
    #[error("io error fetching {url}: {message}")]
    Io {
        /// HTTP-ish status code, when the transport has one.
        status: Option<u16>,
        /// The URL that was being fetched.
        url: String,
        /// A human-readable description of the failure.
        message: String,
    },

    /// A Zarr key could not be parsed (e.g. a non-numeric chunk coordinate).
    #[error("bad key: {0}")]
    BadKey(String),

    /// The operation was cancelled via its [`tokio_util::sync::CancellationToken`].
    #[error("operation cancelled")]
    Cancelled,

    /// `get`/`resolve`/etc. called before `open` completed.
    #[error("store not initialised")]
    NotInitialised,
}

impl IcechunkError {
    /// Build an [`IcechunkError::Io`] from a transport failure.
    pub fn io(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Io {
            status,
            url: url.into(),
            message: message.into(),
        }
    }
}
