//! URL composition for the four file kinds, plus cloud-scheme rewriting
//! for virtual chunk locations (spec §4.8).

/// Normalise a root URL to end with exactly one `/`.
#[must_use]
pub fn normalise_root(root: &str) -> String {
    format!("{}/", root.trim_end_matches('/'))
}

/// `{root}/snapshots/{id}`
#[must_use]
pub fn snapshot_path(id: &str) -> String {
    format!("snapshots/{id}")
}

/// `{root}/manifests/{id}`
#[must_use]
pub fn manifest_path(id: &str) -> String {
    format!("manifests/{id}")
}

/// `{root}/chunks/{id}`
#[must_use]
pub fn chunk_path(id: &str) -> String {
    format!("chunks/{id}")
}

/// `refs/branch.{name}/ref.json`
#[must_use]
pub fn branch_ref_path(name: &str) -> String {
    format!("refs/branch.{name}/ref.json")
}

/// `refs/tag.{name}/ref.json`
#[must_use]
pub fn tag_ref_path(name: &str) -> String {
    format!("refs/tag.{name}/ref.json")
}

/// Default AWS region used when an `s3://` URL doesn't otherwise specify
/// one and the caller hasn't overridden it (see `StoreOptions::region`).
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Rewrite a `gs://bucket/key` URL to its `https://storage.googleapis.com`
/// equivalent. Returns `None` if `url` isn't a `gs://` URL.
#[must_use]
pub fn translate_gcs_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("gs://")?;
    Some(format!("https://storage.googleapis.com/{rest}"))
}

/// Rewrite an `s3://bucket/key` URL to its virtual-hosted-style
/// `https://{bucket}.s3.{region}.amazonaws.com` equivalent. Returns `None`
/// if `url` isn't an `s3://` URL.
#[must_use]
pub fn translate_s3_url(url: &str, region: &str) -> Option<String> {
    let rest = url.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    Some(format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"))
}

/// Translate a virtual chunk location: `gs://`/`s3://` are rewritten to
/// their `https://` equivalents; anything already `http(s)://` (or
/// otherwise unrecognised) passes through unchanged. Never applied to
/// `root_url` itself -- only to virtual chunk locations (spec §4.8).
#[must_use]
pub fn translate_url(url: &str, region: &str) -> String {
    translate_gcs_url(url)
        .or_else(|| translate_s3_url(url, region))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_translation() {
        assert_eq!(
            translate_url("gs://bucket/path/to/file", DEFAULT_S3_REGION),
            "https://storage.googleapis.com/bucket/path/to/file"
        );
        assert_eq!(
            translate_url("s3://bucket/file", "eu-west-1"),
            "https://bucket.s3.eu-west-1.amazonaws.com/file"
        );
        assert_eq!(
            translate_url("https://example.com/x", DEFAULT_S3_REGION),
            "https://example.com/x"
        );
    }

    #[test]
    fn ref_paths() {
        assert_eq!(branch_ref_path("main"), "refs/branch.main/ref.json");
        assert_eq!(tag_ref_path("v1.0.0"), "refs/tag.v1.0.0/ref.json");
    }

    #[test]
    fn root_normalisation_collapses_trailing_slashes() {
        assert_eq!(normalise_root("https://example.com/repo"), "https://example.com/repo/");
        assert_eq!(normalise_root("https://example.com/repo/"), "https://example.com/repo/");
        assert_eq!(normalise_root("https://example.com/repo///"), "https://example.com/repo/");
    }
}
