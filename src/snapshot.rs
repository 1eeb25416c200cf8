//! Snapshot decoding: the root table → hierarchy of nodes with array/group
//! payloads and per-array manifest references (spec §4.3).

use serde_json::Value as Json;
use tracing::{instrument, trace};

use crate::envelope::{decode_envelope, FileType};
use crate::error::{FormatErrorKind, IcechunkError};
use crate::flatbuf::Table;
use crate::id::{ObjectId12, ObjectId8};

// Root table vtable offsets.
const SNAP_ID: u16 = 4;
const SNAP_PARENT_ID: u16 = 6;
const SNAP_NODES: u16 = 8;
const SNAP_FLUSHED_AT: u16 = 10;
const SNAP_MESSAGE: u16 = 12;
const SNAP_METADATA: u16 = 14;
const SNAP_MANIFEST_FILES: u16 = 16;

// NodeSnapshot sub-table vtable offsets.
const NODE_ID: u16 = 4;
const NODE_PATH: u16 = 6;
const NODE_USER_DATA: u16 = 8;
const NODE_DATA_TYPE: u16 = 10;
const NODE_DATA: u16 = 12;

// Array sub-table vtable offsets.
const ARRAY_SHAPE: u16 = 4;
const ARRAY_DIMENSION_NAMES: u16 = 6;
const ARRAY_MANIFESTS: u16 = 8;

// ManifestRef sub-table vtable offsets.
const MANIFEST_REF_ID: u16 = 4;
const MANIFEST_REF_EXTENTS: u16 = 6;

// MetadataItem sub-table vtable offsets.
const METADATA_ITEM_KEY: u16 = 4;
const METADATA_ITEM_VALUE: u16 = 6;

const NODE_DATA_TYPE_ARRAY: u8 = 1;
const NODE_DATA_TYPE_GROUP: u8 = 2;

/// Chunk-key encoding named in a Zarr v3 array's metadata.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChunkKeyEncoding {
    /// `"default"` / `/`-separated.
    Slash,
    /// `"v2"` / `.`-separated.
    Dot,
}

/// Decoded Zarr metadata for an array node.
#[derive(Debug, Clone)]
pub struct ZarrMetadata {
    /// Per-dimension array length.
    pub shape: Vec<u64>,
    /// Per-dimension chunk length (parallel to `shape`).
    pub chunk_shape: Vec<u64>,
    /// Per-dimension names, when present.
    pub dimension_names: Option<Vec<Option<String>>>,
    /// Raw `data_type` value from `zarr.json`, when lifted from attributes.
    pub data_type: Option<Json>,
    /// Raw `fill_value` value.
    pub fill_value: Option<Json>,
    /// Raw `codecs` array.
    pub codecs: Option<Json>,
    /// Chunk key encoding, defaulting to `Slash` when not recoverable from
    /// attributes.
    pub chunk_key_encoding: ChunkKeyEncoding,
}

/// A manifest reference attached to an array node: which manifest covers
/// which range of chunk coordinates.
#[derive(Debug, Clone)]
pub struct ManifestRef {
    /// The manifest's id.
    pub id: ObjectId12,
    /// Inclusive `(start, end)` per dimension.
    pub extents: Vec<(u32, u32)>,
}

/// `true` iff `coords` is covered by `extents`: same arity, and each
/// coordinate falls within its dimension's closed interval.
#[must_use]
pub fn is_chunk_in_extent(coords: &[u32], extents: &[(u32, u32)]) -> bool {
    coords.len() == extents.len()
        && coords
            .iter()
            .zip(extents.iter())
            .all(|(&c, &(start, end))| c >= start && c <= end)
}

/// The payload of an array node.
#[derive(Debug, Clone)]
pub struct ArrayNode {
    /// Decoded Zarr metadata.
    pub zarr_metadata: ZarrMetadata,
    /// Manifests covering this array's chunks, tried in order.
    pub manifests: Vec<ManifestRef>,
}

/// Tagged payload of a node: either a group or an array.
#[derive(Debug, Clone)]
pub enum NodeData {
    /// A group node (a directory-like container of attributes only).
    Group,
    /// An array node.
    Array(ArrayNode),
}

/// A node in the repository hierarchy.
#[derive(Debug, Clone)]
pub struct Node {
    /// The node's 8-byte id.
    pub id: ObjectId8,
    /// Canonical repository path (root is `""`; no leading/trailing `/`).
    pub path: String,
    /// Parsed `userData` JSON object, or an empty map if parsing failed or
    /// the field was absent -- per spec, a parse failure is not an error.
    pub user_attributes: serde_json::Map<String, Json>,
    /// Group or array payload.
    pub node_data: NodeData,
}

/// Opaque manifest-file registry entry (32 raw bytes); decoded for
/// completeness of the vtable contract but unused by the read path.
#[derive(Debug, Clone, Copy)]
pub struct ManifestFileInfo(pub [u8; 32]);

/// A decoded, immutable snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// This snapshot's id.
    pub id: ObjectId12,
    /// The parent snapshot's id, if any.
    pub parent_id: Option<ObjectId12>,
    /// Nodes, sorted ascending by path (required for `find_node`'s binary
    /// search; the decoder preserves file order rather than re-sorting).
    pub nodes: Vec<Node>,
    /// Commit timestamp, ms since Unix epoch.
    pub flushed_at_ms: u64,
    /// Commit message.
    pub message: String,
    /// Free-form commit metadata.
    pub metadata: std::collections::HashMap<String, String>,
    /// Manifest-file registry (opaque, unused by reads).
    pub manifest_files: Vec<ManifestFileInfo>,
}

fn strip_slashes(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parse_user_data(bytes: Option<&[u8]>) -> serde_json::Map<String, Json> {
    bytes
        .and_then(|b| serde_json::from_slice::<Json>(b).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

fn decode_zarr_metadata(
    shape_and_chunks: Vec<(u64, u64)>,
    dimension_names: Option<Vec<Option<String>>>,
    attributes: &serde_json::Map<String, Json>,
) -> ZarrMetadata {
    let shape = shape_and_chunks.iter().map(|(s, _)| *s).collect();
    let chunk_shape = shape_and_chunks.iter().map(|(_, c)| *c).collect();

    let chunk_key_encoding = attributes
        .get("chunk_key_encoding")
        .and_then(|v| v.get("name"))
        .and_then(Json::as_str)
        .map(|name| if name == "v2" { ChunkKeyEncoding::Dot } else { ChunkKeyEncoding::Slash })
        .unwrap_or(ChunkKeyEncoding::Slash);

    ZarrMetadata {
        shape,
        chunk_shape,
        dimension_names,
        data_type: attributes.get("data_type").cloned(),
        fill_value: attributes.get("fill_value").cloned(),
        codecs: attributes.get("codecs").cloned(),
        chunk_key_encoding,
    }
}

fn decode_manifest_ref(table: Table<'_>) -> Result<ManifestRef, IcechunkError> {
    let id_bytes = table
        .get_struct(MANIFEST_REF_ID, 12)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?;
    let mut id = [0u8; 12];
    id.copy_from_slice(id_bytes);

    let extent_bytes = table.get_struct_vector(MANIFEST_REF_EXTENTS, 8)?;
    let extents = extent_bytes
        .into_iter()
        .map(|b| {
            let start = u32::from_le_bytes(b[0..4].try_into().unwrap_or_default());
            let end = u32::from_le_bytes(b[4..8].try_into().unwrap_or_default());
            (start, end)
        })
        .collect();

    Ok(ManifestRef { id: ObjectId12(id), extents })
}

fn decode_array_node(table: Table<'_>, attributes: &serde_json::Map<String, Json>) -> Result<ArrayNode, IcechunkError> {
    let shape_bytes = table.get_struct_vector(ARRAY_SHAPE, 16)?;
    let shape_and_chunks: Vec<(u64, u64)> = shape_bytes
        .into_iter()
        .map(|b| {
            let length = u64::from_le_bytes(b[0..8].try_into().unwrap_or_default());
            let chunk_length = u64::from_le_bytes(b[8..16].try_into().unwrap_or_default());
            (length, chunk_length)
        })
        .collect();

    let dimension_name_tables = table.get_table_vector(ARRAY_DIMENSION_NAMES)?;
    let dimension_names = if dimension_name_tables.is_empty() {
        None
    } else {
        Some(
            dimension_name_tables
                .into_iter()
                .map(|t| t.get_str(4).map(|s| s.map(str::to_string)))
                .collect::<Result<Vec<_>, _>>()?,
        )
    };

    let manifest_ref_tables = table.get_table_vector(ARRAY_MANIFESTS)?;
    let manifests = manifest_ref_tables
        .into_iter()
        .map(decode_manifest_ref)
        .collect::<Result<Vec<_>, _>>()?;

    let zarr_metadata = decode_zarr_metadata(shape_and_chunks, dimension_names, attributes);

    Ok(ArrayNode { zarr_metadata, manifests })
}

fn decode_node(table: Table<'_>) -> Result<Node, IcechunkError> {
    let id_bytes = table
        .get_struct(NODE_ID, 8)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?;
    let mut id = [0u8; 8];
    id.copy_from_slice(id_bytes);

    let path = strip_slashes(
        table
            .get_str(NODE_PATH)?
            .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?,
    );

    let user_attributes = parse_user_data(table.get_u8_vector(NODE_USER_DATA)?);

    let node_data_type = table
        .get_u8(NODE_DATA_TYPE)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?;

    let node_data_table = table
        .get_table(NODE_DATA)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?;

    let node_data = match node_data_type {
        NODE_DATA_TYPE_ARRAY => NodeData::Array(decode_array_node(node_data_table, &user_attributes)?),
        NODE_DATA_TYPE_GROUP => NodeData::Group,
        _ => return Err(IcechunkError::Format(FormatErrorKind::MissingField)),
    };

    Ok(Node { id: ObjectId8(id), path, user_attributes, node_data })
}

fn decode_metadata_item(table: Table<'_>) -> Result<(String, String), IcechunkError> {
    let key = table
        .get_str(METADATA_ITEM_KEY)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?
        .to_string();
    let value = table
        .get_str(METADATA_ITEM_VALUE)?
        .unwrap_or_default()
        .to_string();
    Ok((key, value))
}

/// Decode a snapshot from an already-unwrapped FlatBuffers payload (i.e.
/// after [`decode_envelope`] has stripped the envelope and decompressed).
#[instrument(level = "debug", skip(payload))]
pub fn decode_snapshot_payload(payload: &[u8]) -> Result<Snapshot, IcechunkError> {
    let root = Table::root(payload)?;

    let id_bytes = root
        .get_struct(SNAP_ID, 12)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?;
    let mut id = [0u8; 12];
    id.copy_from_slice(id_bytes);

    let parent_id = root
        .get_struct(SNAP_PARENT_ID, 12)?
        .map(|b| {
            let mut arr = [0u8; 12];
            arr.copy_from_slice(b);
            ObjectId12(arr)
        });

    let node_tables = root.get_table_vector(SNAP_NODES)?;
    let nodes = node_tables.into_iter().map(decode_node).collect::<Result<Vec<_>, _>>()?;

    let flushed_at_ms = root.get_u64(SNAP_FLUSHED_AT)?.unwrap_or(0);
    let message = root.get_str(SNAP_MESSAGE)?.unwrap_or_default().to_string();

    let metadata_tables = root.get_table_vector(SNAP_METADATA)?;
    let metadata = metadata_tables
        .into_iter()
        .map(decode_metadata_item)
        .collect::<Result<std::collections::HashMap<_, _>, _>>()?;

    let manifest_file_bytes = root.get_struct_vector(SNAP_MANIFEST_FILES, 32)?;
    let manifest_files = manifest_file_bytes
        .into_iter()
        .map(|b| {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            ManifestFileInfo(arr)
        })
        .collect();

    trace!(nodes = nodes.len(), %message, "decoded snapshot");

    Ok(Snapshot {
        id: ObjectId12(id),
        parent_id,
        nodes,
        flushed_at_ms,
        message,
        metadata,
        manifest_files,
    })
}

/// Parse the envelope and decode a full snapshot from raw file bytes.
pub fn decode_snapshot(data: &[u8]) -> Result<Snapshot, IcechunkError> {
    let envelope = decode_envelope(data, Some(FileType::Snapshot))?;
    decode_snapshot_payload(&envelope.payload)
}

/// Binary search `snapshot.nodes` (sorted ascending by path, an invariant
/// the writer is contractually required to maintain; this decoder does
/// not re-sort) for the node at `path`.
///
/// `path` is normalised the same way decoded paths are (leading/trailing
/// `/` stripped). Returns `None` if no such node exists.
#[must_use]
pub fn find_node<'a>(snapshot: &'a Snapshot, path: &str) -> Option<&'a Node> {
    let normalised = strip_slashes(path);
    snapshot
        .nodes
        .binary_search_by(|node| node.path.as_str().cmp(normalised.as_str()))
        .ok()
        .map(|i| &snapshot.nodes[i])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn node(path: &str) -> Node {
        Node {
            id: ObjectId8([0; 8]),
            path: path.to_string(),
            user_attributes: serde_json::Map::new(),
            node_data: NodeData::Group,
        }
    }

    fn snapshot_with_paths(paths: &[&str]) -> Snapshot {
        Snapshot {
            id: ObjectId12([0; 12]),
            parent_id: None,
            nodes: paths.iter().map(|p| node(p)).collect(),
            flushed_at_ms: 0,
            message: String::new(),
            metadata: std::collections::HashMap::new(),
            manifest_files: Vec::new(),
        }
    }

    #[test]
    fn find_node_normalises_path() {
        let snap = snapshot_with_paths(&["", "a", "a/b", "c"]);
        let found = find_node(&snap, "/a/b/").unwrap();
        assert_eq!(found.path, "a/b");
    }

    #[test]
    fn find_node_absent_returns_none() {
        let snap = snapshot_with_paths(&["", "a", "b"]);
        assert!(find_node(&snap, "missing").is_none());
    }

    #[test]
    fn find_node_root() {
        let snap = snapshot_with_paths(&["", "a"]);
        let found = find_node(&snap, "/").unwrap();
        assert_eq!(found.path, "");
    }

    #[test]
    fn extent_containment_closed_interval() {
        let extents = vec![(0u32, 2u32), (5, 5)];
        assert!(is_chunk_in_extent(&[0, 5], &extents));
        assert!(is_chunk_in_extent(&[2, 5], &extents));
        assert!(!is_chunk_in_extent(&[3, 5], &extents));
        assert!(!is_chunk_in_extent(&[0, 6], &extents));
        assert!(!is_chunk_in_extent(&[0], &extents)); // arity mismatch
    }
}
