//! The transport interface (spec §6): HTTP itself is an external
//! collaborator, out of scope for this crate. What's in scope is the
//! narrow byte-fetching contract the core depends on, plus an in-memory
//! test double standing in for a real HTTP client.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::IcechunkError;

/// Per-request options: pass-through headers and a cooperative
/// cancellation token (spec §5).
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Headers forwarded verbatim to the backing store. No auth logic
    /// lives in this crate (spec Non-goals); callers set what they need.
    pub headers: HashMap<String, String>,
    /// Cancellation token checked before, and ideally during, the fetch.
    pub cancel: Option<CancellationToken>,
}

/// Byte-fetching interface the core depends on. A real implementation
/// wraps an HTTP client and is expected to live outside this crate; see
/// `memory::MemoryTransport` for the in-repo test double.
pub trait Transport: Send + Sync {
    /// Full-object GET. Errors on non-2xx.
    fn fetch(
        &self,
        url: &str,
        options: Option<FetchOptions>,
    ) -> impl Future<Output = Result<Vec<u8>, IcechunkError>> + Send;

    /// Ranged GET: `Range: bytes={offset}-{offset+length-1}`. Accepts
    /// HTTP 200 and 206.
    fn fetch_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        options: Option<FetchOptions>,
    ) -> impl Future<Output = Result<Vec<u8>, IcechunkError>> + Send;
}

/// Check a cancellation token, if any, before doing I/O.
pub(crate) fn check_cancelled(options: &Option<FetchOptions>) -> Result<(), IcechunkError> {
    if let Some(FetchOptions { cancel: Some(token), .. }) = options {
        if token.is_cancelled() {
            return Err(IcechunkError::Cancelled);
        }
    }
    Ok(())
}

/// An in-memory `Transport` used by tests: a flat `path → bytes` map,
/// range-sliced on request. Stands in for the out-of-scope HTTP transport
/// the same way the teacher's `ref_from_slice` stands in for a real
/// network fetch in its `extract.rs` example.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::{check_cancelled, FetchOptions, Transport};
    use crate::error::IcechunkError;

    /// An in-memory byte store keyed by full URL.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryTransport {
        objects: Arc<HashMap<String, Vec<u8>>>,
    }

    impl MemoryTransport {
        /// Build a transport from a fixed set of `url -> bytes` entries.
        #[must_use]
        pub fn new(objects: HashMap<String, Vec<u8>>) -> Self {
            Self { objects: Arc::new(objects) }
        }
    }

    impl Transport for MemoryTransport {
        async fn fetch(&self, url: &str, options: Option<FetchOptions>) -> Result<Vec<u8>, IcechunkError> {
            check_cancelled(&options)?;
            self.objects
                .get(url)
                .cloned()
                .ok_or_else(|| IcechunkError::io(url, Some(404), "not found"))
        }

        async fn fetch_range(
            &self,
            url: &str,
            offset: u64,
            length: u64,
            options: Option<FetchOptions>,
        ) -> Result<Vec<u8>, IcechunkError> {
            check_cancelled(&options)?;
            let data = self
                .objects
                .get(url)
                .ok_or_else(|| IcechunkError::io(url, Some(404), "not found"))?;

            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            let end = start.saturating_add(usize::try_from(length).unwrap_or(usize::MAX));
            data.get(start..end.min(data.len()))
                .map(<[u8]>::to_vec)
                .ok_or_else(|| IcechunkError::io(url, Some(416), "range out of bounds"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;

    #[tokio::test]
    async fn fetch_range_slices_exact_bounds() {
        let mut objects = HashMap::new();
        objects.insert("http://x/chunks/abc".to_string(), (0u8..20).collect::<Vec<_>>());
        let transport = MemoryTransport::new(objects);

        let bytes = transport.fetch_range("http://x/chunks/abc", 5, 4, None).await.unwrap();
        assert_eq!(bytes, vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn fetch_missing_object_errors() {
        let transport = MemoryTransport::new(HashMap::new());
        let err = transport.fetch("http://x/missing", None).await.unwrap_err();
        assert!(matches!(err, IcechunkError::Io { status: Some(404), .. }));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let mut objects = HashMap::new();
        objects.insert("http://x/a".to_string(), vec![1, 2, 3]);
        let transport = MemoryTransport::new(objects);

        let token = CancellationToken::new();
        token.cancel();
        let options = FetchOptions { cancel: Some(token), ..Default::default() };

        let err = transport.fetch("http://x/a", Some(options)).await.unwrap_err();
        assert!(matches!(err, IcechunkError::Cancelled));
    }
}
