//! Ref resolution: from a `(branch|tag|snapshot)` option, produce a
//! snapshot id (spec §4.5).

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{FormatErrorKind, IcechunkError};
use crate::id::is_valid_snapshot_id;
use crate::transport::{FetchOptions, Transport};
use crate::url::{branch_ref_path, tag_ref_path};

/// How the caller chose to resolve a snapshot.
#[derive(Debug, Clone)]
pub enum RefSpec {
    /// An explicit snapshot id (still validated for shape).
    Snapshot(String),
    /// A tag name.
    Tag(String),
    /// A branch name. The default is `"main"`.
    Branch(String),
}

impl Default for RefSpec {
    fn default() -> Self {
        Self::Branch("main".to_string())
    }
}

/// The wire shape of a `ref.json` document: a single-key object. `serde`
/// enforces the single recognised key (`snapshot`); any extra property is
/// rejected by `#[serde(deny_unknown_fields)]`, matching spec's "exactly
/// one key; any additional property is a parse error".
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefDocument {
    snapshot: String,
}

fn validate_ref_document(raw: &[u8]) -> Result<String, IcechunkError> {
    let doc: RefDocument =
        serde_json::from_slice(raw).map_err(|_| IcechunkError::Format(FormatErrorKind::Ref))?;

    if !is_valid_snapshot_id(&doc.snapshot) {
        return Err(IcechunkError::Format(FormatErrorKind::Ref));
    }

    Ok(doc.snapshot)
}

/// Resolve `spec` against `root_url` using `transport`, producing a
/// 20-character Base32 snapshot id.
///
/// `cancel`, when given, is forwarded to the ref-document fetch (spec §5);
/// an explicit snapshot id resolves without any I/O and so is never
/// cancellable.
#[instrument(level = "debug", skip(transport, cancel))]
pub async fn resolve_ref(
    transport: &impl Transport,
    root_url: &str,
    spec: &RefSpec,
    cancel: Option<CancellationToken>,
) -> Result<String, IcechunkError> {
    match spec {
        RefSpec::Snapshot(id) => {
            if is_valid_snapshot_id(id) {
                Ok(id.clone())
            } else {
                Err(IcechunkError::Format(FormatErrorKind::InvalidIdSymbol))
            }
        }
        RefSpec::Tag(name) => {
            let url = format!("{root_url}{}", tag_ref_path(name));
            let options = Some(FetchOptions { cancel, ..Default::default() });
            let raw = transport.fetch(&url, options).await?;
            validate_ref_document(&raw)
        }
        RefSpec::Branch(name) => {
            let url = format!("{root_url}{}", branch_ref_path(name));
            let options = Some(FetchOptions { cancel, ..Default::default() });
            let raw = transport.fetch(&url, options).await?;
            validate_ref_document(&raw)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const VALID_ID: &str = "1CECHNKREP0F1RSTCMT0";

    #[test]
    fn s1_valid_ref_document() {
        let raw = format!(r#"{{"snapshot":"{VALID_ID}"}}"#);
        assert_eq!(validate_ref_document(raw.as_bytes()).unwrap(), VALID_ID);
    }

    #[test]
    fn s1_invalid_snapshot_value() {
        let raw = br#"{"snapshot":"invalid"}"#;
        let err = validate_ref_document(raw).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::Ref)));
    }

    #[test]
    fn s1_wrong_key() {
        let raw = br#"{"other":"v"}"#;
        let err = validate_ref_document(raw).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::Ref)));
    }

    #[test]
    fn s1_extra_property() {
        let raw = format!(r#"{{"snapshot":"{VALID_ID}","extra":"x"}}"#);
        let err = validate_ref_document(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, IcechunkError::Format(FormatErrorKind::Ref)));
    }
}
