//! The store facade (spec §4.7): opens a repository, parses Zarr keys,
//! walks the hierarchy, selects manifests by extent, fetches chunk bytes,
//! and synthesises `zarr.json` documents.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value as Json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::cache::ManifestCache;
use crate::envelope::FileType;
use crate::error::IcechunkError;
use crate::manifest::{decode_manifest_payload, ChunkPayload, Manifest};
use crate::refs::{resolve_ref, RefSpec};
use crate::snapshot::{decode_snapshot_payload, find_node, ChunkKeyEncoding, Node, NodeData, Snapshot};
use crate::transport::{FetchOptions, Transport};
use crate::url::{chunk_path, manifest_path, normalise_root, snapshot_path, translate_url, DEFAULT_S3_REGION};

/// Options accepted by [`Store::open`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Which ref to resolve against the repository.
    pub ref_spec: RefSpec,
    /// Manifest LRU capacity.
    pub manifest_cache_capacity: usize,
    /// Headers forwarded to every fetch.
    pub headers: std::collections::HashMap<String, String>,
    /// Region used when translating `s3://` virtual chunk locations that
    /// don't otherwise specify one.
    pub region: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            ref_spec: RefSpec::default(),
            manifest_cache_capacity: crate::cache::DEFAULT_CAPACITY,
            headers: std::collections::HashMap::new(),
            region: DEFAULT_S3_REGION.to_string(),
        }
    }
}

/// A parsed Zarr key (spec §4.7 "Key parser").
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ParsedKey {
    /// `zarr.json` for the node at `prefix`.
    Metadata {
        /// Node path (root is `""`).
        prefix: String,
    },
    /// A chunk at `coords` under the array node at `prefix`.
    Chunk {
        /// Array node path.
        prefix: String,
        /// Chunk coordinates.
        coords: Vec<u32>,
    },
}

/// Parse a Zarr store key into a [`ParsedKey`].
///
/// `BadKeyError` only for a `.../c/...` key with a non-numeric coordinate
/// segment; anything else that doesn't look like a chunk key is treated
/// as a metadata lookup (which may simply miss).
pub fn parse_key(key: &str) -> Result<ParsedKey, IcechunkError> {
    if key == "zarr.json" {
        return Ok(ParsedKey::Metadata { prefix: String::new() });
    }

    if let Some(prefix) = key.strip_suffix("/zarr.json") {
        return Ok(ParsedKey::Metadata { prefix: prefix.to_string() });
    }

    // Root-array chunks have no prefix segment at all ("c/0/1"); nested
    // arrays are prefixed ("{prefix}/c/0/1").
    let chunk_split = if let Some(rest) = key.strip_prefix("c/") {
        Some((String::new(), rest))
    } else if key == "c" {
        Some((String::new(), ""))
    } else {
        key.find("/c/").map(|idx| (key[..idx].to_string(), &key[idx + 3..]))
    };

    if let Some((prefix, coord_str)) = chunk_split {
        let coords = if coord_str.is_empty() {
            Vec::new()
        } else {
            coord_str
                .split('/')
                .map(|segment| segment.parse::<u32>().map_err(|_| IcechunkError::BadKey(key.to_string())))
                .collect::<Result<Vec<_>, _>>()?
        };
        return Ok(ParsedKey::Chunk { prefix, coords });
    }

    Ok(ParsedKey::Metadata { prefix: key.to_string() })
}

fn synthesise_v3_group(node: &Node) -> Json {
    json!({
        "zarr_format": 3,
        "node_type": "group",
        "attributes": Json::Object(node.user_attributes.clone()),
    })
}

fn chunk_grid_json(chunk_shape: &[u64]) -> Json {
    json!({
        "name": "regular",
        "configuration": { "chunk_shape": chunk_shape },
    })
}

fn chunk_key_encoding_json(encoding: ChunkKeyEncoding) -> Json {
    match encoding {
        ChunkKeyEncoding::Slash => json!({ "name": "default", "configuration": { "separator": "/" } }),
        ChunkKeyEncoding::Dot => json!({ "name": "v2", "configuration": { "separator": "." } }),
    }
}

/// Synthesise (or pass through) a `zarr.json` document for `node`.
///
/// For an array node whose `userAttributes.zarr_format` is already `2` or
/// `3`, the attributes are emitted verbatim (they already *are* the
/// document). Otherwise a v3 document is built from the decoded
/// `ZarrMetadata`.
#[must_use]
pub fn encode_zarr_json(node: &Node) -> Json {
    match &node.node_data {
        NodeData::Group => synthesise_v3_group(node),
        NodeData::Array(array) => {
            if let Some(format) = node.user_attributes.get("zarr_format").and_then(Json::as_i64) {
                if format == 2 || format == 3 {
                    return Json::Object(node.user_attributes.clone());
                }
            }

            let mut doc = Map::new();
            doc.insert("zarr_format".to_string(), json!(3));
            doc.insert("node_type".to_string(), json!("array"));
            doc.insert("shape".to_string(), json!(array.zarr_metadata.shape));
            doc.insert("chunk_grid".to_string(), chunk_grid_json(&array.zarr_metadata.chunk_shape));
            doc.insert(
                "chunk_key_encoding".to_string(),
                chunk_key_encoding_json(array.zarr_metadata.chunk_key_encoding),
            );
            doc.insert(
                "fill_value".to_string(),
                array.zarr_metadata.fill_value.clone().unwrap_or(Json::Null),
            );
            doc.insert(
                "codecs".to_string(),
                array.zarr_metadata.codecs.clone().unwrap_or_else(|| json!([])),
            );
            if let Some(data_type) = &array.zarr_metadata.data_type {
                doc.insert("data_type".to_string(), data_type.clone());
            }
            if let Some(names) = &array.zarr_metadata.dimension_names {
                doc.insert("dimension_names".to_string(), json!(names));
            }
            doc.insert("attributes".to_string(), json!({}));

            Json::Object(doc)
        }
    }
}

/// A read-only view onto an Icechunk repository at a resolved snapshot.
///
/// Clones share the same snapshot, transport, and manifest cache -- the
/// cheap, `resolve`-friendly sharing spec §4.7/§9 calls for.
pub struct Store<T: Transport> {
    transport: Arc<T>,
    root_url: String,
    base_path: String,
    snapshot: Arc<Snapshot>,
    cache: ManifestCache,
    headers: std::collections::HashMap<String, String>,
    region: String,
}

// Implemented by hand rather than derived: cloning a `Store` shares its
// transport via `Arc`, so `T` itself need not be `Clone`.
impl<T: Transport> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            root_url: self.root_url.clone(),
            base_path: self.base_path.clone(),
            snapshot: self.snapshot.clone(),
            cache: self.cache.clone(),
            headers: self.headers.clone(),
            region: self.region.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root_url", &self.root_url)
            .field("base_path", &self.base_path)
            .field("snapshot_id", &self.snapshot.id)
            .finish_non_exhaustive()
    }
}

fn collapse_base_path(path: &str) -> String {
    path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/")
}

fn join_key(base_path: &str, key: &str) -> String {
    if base_path.is_empty() {
        key.to_string()
    } else {
        format!("{base_path}/{key}")
    }
}

impl<T: Transport> Store<T> {
    /// Resolve a ref, fetch the snapshot, and decode it.
    ///
    /// `cancel`, when given, is checked before every I/O call this makes
    /// (ref resolution and the snapshot fetch); see spec §5.
    #[instrument(level = "debug", skip(transport, options, cancel))]
    pub async fn open(
        transport: T,
        root_url: &str,
        options: StoreOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<Self, IcechunkError> {
        let root_url = normalise_root(root_url);
        let fetch_options =
            Some(FetchOptions { headers: options.headers.clone(), cancel: cancel.clone() });

        let snapshot_id = resolve_ref(&transport, &root_url, &options.ref_spec, cancel.clone()).await?;

        let url = format!("{root_url}{}", snapshot_path(&snapshot_id));
        let raw = transport.fetch(&url, fetch_options).await?;
        let envelope = crate::envelope::decode_envelope(&raw, Some(FileType::Snapshot))?;
        let snapshot = decode_snapshot_payload(&envelope.payload)?;

        debug!(%snapshot_id, nodes = snapshot.nodes.len(), "opened store");

        Ok(Self {
            transport: Arc::new(transport),
            root_url,
            base_path: String::new(),
            snapshot: Arc::new(snapshot),
            cache: ManifestCache::new(options.manifest_cache_capacity),
            headers: options.headers,
            region: options.region,
        })
    }

    /// All nodes in the current snapshot.
    #[must_use]
    pub fn list_nodes(&self) -> &[Node] {
        &self.snapshot.nodes
    }

    /// The current snapshot handle.
    #[must_use]
    pub fn get_snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// First path segments of nodes strictly under `path`.
    #[must_use]
    pub fn list_children(&self, path: &str) -> Vec<String> {
        let normalised = path.trim_matches('/');
        let prefix = if normalised.is_empty() { String::new() } else { format!("{normalised}/") };

        let mut children = BTreeSet::new();
        for node in &self.snapshot.nodes {
            if let Some(rest) = node.path.strip_prefix(&prefix as &str) {
                if rest.is_empty() {
                    continue;
                }
                let first_segment = rest.split('/').next().unwrap_or(rest);
                children.insert(first_segment.to_string());
            }
        }
        children.into_iter().collect()
    }

    /// A new view sharing the same snapshot, transport, and cache, whose
    /// `base_path` is prepended to every `get` key.
    #[must_use]
    pub fn resolve(&self, subpath: &str) -> Self {
        let joined = join_key(&self.base_path, subpath);
        Self { base_path: collapse_base_path(&joined), ..self.clone() }
    }

    fn fetch_options(&self, cancel: Option<CancellationToken>) -> Option<FetchOptions> {
        Some(FetchOptions { headers: self.headers.clone(), cancel })
    }

    /// A manifest is inserted into the cache only after a successful
    /// decode, never mid-fetch -- cancellation before that point leaves no
    /// partial cache entry (spec §5).
    async fn fetch_manifest(
        &self,
        manifest_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Arc<Manifest>, IcechunkError> {
        if let Some(hit) = self.cache.get(manifest_id).await {
            return Ok(hit);
        }

        let url = format!("{}{}", self.root_url, manifest_path(manifest_id));
        let raw = self.transport.fetch(&url, self.fetch_options(cancel)).await?;
        let envelope = crate::envelope::decode_envelope(&raw, Some(FileType::Manifest))?;
        let manifest = Arc::new(decode_manifest_payload(&envelope.payload)?);

        self.cache.put(manifest_id.to_string(), manifest.clone()).await;
        Ok(manifest)
    }

    async fn read_chunk_payload(
        &self,
        payload: &ChunkPayload,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u8>, IcechunkError> {
        match payload {
            ChunkPayload::Inline(data) => Ok(data.clone()),
            ChunkPayload::Native { id, offset, length } => {
                let url = format!("{}{}", self.root_url, chunk_path(&id.to_base32()));
                self.transport.fetch_range(&url, *offset, *length, self.fetch_options(cancel)).await
            }
            ChunkPayload::Virtual { location, offset, length } => {
                let url = translate_url(location, &self.region);
                self.transport.fetch_range(&url, *offset, *length, self.fetch_options(cancel)).await
            }
        }
    }

    /// Resolve `key` and return its bytes, or `None` if the key targets
    /// something that doesn't exist (absence is not an error, spec §7).
    ///
    /// `cancel`, when given, is checked before every I/O call this
    /// dispatches to (manifest fetch, chunk range fetch); metadata lookups
    /// are pure and never suspend.
    #[instrument(level = "debug", skip(self, cancel))]
    pub async fn get(
        &self,
        key: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Option<Vec<u8>>, IcechunkError> {
        let full_key = join_key(&self.base_path, key);
        match parse_key(&full_key)? {
            ParsedKey::Metadata { prefix } => {
                let Some(node) = find_node(&self.snapshot, &prefix) else {
                    return Ok(None);
                };
                let doc = encode_zarr_json(node);
                let bytes = serde_json::to_vec(&doc).map_err(|e| {
                    IcechunkError::io(prefix.clone(), None, format!("failed to serialise zarr.json: {e}"))
                })?;
                Ok(Some(bytes))
            }
            ParsedKey::Chunk { prefix, coords } => self.get_chunk(&prefix, &coords, cancel).await,
        }
    }

    async fn get_chunk(
        &self,
        prefix: &str,
        coords: &[u32],
        cancel: Option<CancellationToken>,
    ) -> Result<Option<Vec<u8>>, IcechunkError> {
        let Some(node) = find_node(&self.snapshot, prefix) else {
            return Ok(None);
        };
        let NodeData::Array(array) = &node.node_data else {
            return Ok(None);
        };

        let Some(manifest_ref) = array
            .manifests
            .iter()
            .find(|m| crate::snapshot::is_chunk_in_extent(coords, &m.extents))
        else {
            return Ok(None);
        };

        let manifest = self.fetch_manifest(&manifest_ref.id.to_base32(), cancel.clone()).await?;

        let Some(chunk_ref) = manifest.find_chunk(&node.id, coords) else {
            return Ok(None);
        };

        let bytes = self.read_chunk_payload(&chunk_ref.payload, cancel).await?;
        Ok(Some(bytes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_root_metadata_key() {
        assert_eq!(parse_key("zarr.json").unwrap(), ParsedKey::Metadata { prefix: String::new() });
    }

    #[test]
    fn parses_nested_metadata_key() {
        assert_eq!(
            parse_key("a/b/zarr.json").unwrap(),
            ParsedKey::Metadata { prefix: "a/b".to_string() }
        );
    }

    #[test]
    fn parses_chunk_key() {
        assert_eq!(
            parse_key("arr/c/1/2").unwrap(),
            ParsedKey::Chunk { prefix: "arr".to_string(), coords: vec![1, 2] }
        );
    }

    #[test]
    fn parses_root_array_chunk_key() {
        assert_eq!(
            parse_key("c/0/1").unwrap(),
            ParsedKey::Chunk { prefix: String::new(), coords: vec![0, 1] }
        );
    }

    #[test]
    fn parses_rank_zero_chunk_key() {
        assert_eq!(
            parse_key("scalar/c/").unwrap(),
            ParsedKey::Chunk { prefix: "scalar".to_string(), coords: vec![] }
        );
    }

    #[test]
    fn rejects_non_numeric_coordinate() {
        let err = parse_key("arr/c/1/x").unwrap_err();
        assert!(matches!(err, IcechunkError::BadKey(_)));
    }

    #[test]
    fn falls_back_to_metadata_for_unrecognised_key() {
        assert_eq!(parse_key("whatever").unwrap(), ParsedKey::Metadata { prefix: "whatever".to_string() });
    }

    #[test]
    fn group_metadata_document_shape() {
        let node = Node {
            id: crate::id::ObjectId8([0; 8]),
            path: String::new(),
            user_attributes: Map::new(),
            node_data: NodeData::Group,
        };
        let doc = encode_zarr_json(&node);
        assert_eq!(doc["zarr_format"], json!(3));
        assert_eq!(doc["node_type"], json!("group"));
    }

    #[test]
    fn base_path_collapses_slash_runs() {
        assert_eq!(collapse_base_path("//a//b///"), "a/b");
    }
}
