//! Manifest decoding: the root table → per-array map from chunk
//! coordinates to a chunk payload (spec §4.4).

use std::collections::HashMap;

use tracing::{instrument, trace, warn};

use crate::envelope::{decode_envelope, FileType};
use crate::error::{FormatErrorKind, IcechunkError};
use crate::flatbuf::Table;
use crate::id::{ObjectId12, ObjectId8};

const MANIFEST_ID: u16 = 4;
const MANIFEST_ARRAYS: u16 = 6;

const ARRAY_MANIFEST_NODE_ID: u16 = 4;
const ARRAY_MANIFEST_REFS: u16 = 6;

const CHUNK_REF_COORDS: u16 = 4;
const CHUNK_REF_INLINE_DATA: u16 = 6;
const CHUNK_REF_OFFSET: u16 = 8;
const CHUNK_REF_LENGTH: u16 = 10;
const CHUNK_REF_NATIVE_ID: u16 = 12;
const CHUNK_REF_LOCATION: u16 = 14;
const CHUNK_REF_ETAG: u16 = 16;
const CHUNK_REF_LAST_MODIFIED: u16 = 18;

/// A chunk's storage location, decoded from a `ChunkRef`'s mutually
/// exclusive optional fields (spec §3, §4.4).
#[derive(Debug, Clone)]
pub enum ChunkPayload {
    /// Bytes embedded directly in the manifest.
    Inline(Vec<u8>),
    /// A byte range inside `chunks/{id}` in the same repository.
    Native {
        /// The chunk object's id.
        id: ObjectId12,
        /// Starting byte offset.
        offset: u64,
        /// Byte length.
        length: u64,
    },
    /// A byte range inside an external object.
    Virtual {
        /// The external object's URL (pre scheme-translation).
        location: String,
        /// Starting byte offset.
        offset: u64,
        /// Byte length.
        length: u64,
    },
}

/// A single decoded `ChunkRef`: its storage payload plus the opaque
/// validation metadata the wire format carries but the read path does not
/// use (spec §9 design note).
#[derive(Debug, Clone)]
pub struct ChunkRef {
    /// Where the chunk's bytes live.
    pub payload: ChunkPayload,
    /// Opaque ETag, preserved but unused for reads.
    pub etag: Option<String>,
    /// Opaque last-modified timestamp, preserved but unused for reads.
    pub last_modified: Option<u32>,
}

/// `node_id → (coord-key → ChunkRef)` for one manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// This manifest's id.
    pub id: Option<ObjectId12>,
    /// Per-array chunk maps, keyed by node id.
    pub arrays: HashMap<ObjectId8, HashMap<String, ChunkRef>>,
}

impl Manifest {
    /// Look up a chunk by node id and coordinates. Returns `None` if the
    /// node or the coordinate is absent from this manifest -- not an error.
    #[must_use]
    pub fn find_chunk(&self, node_id: &ObjectId8, coords: &[u32]) -> Option<&ChunkRef> {
        self.arrays.get(node_id).and_then(|chunks| chunks.get(&coord_key(coords)))
    }
}

/// Canonical lookup key for a coordinate tuple: `/`-joined stringification.
#[must_use]
pub fn coord_key(coords: &[u32]) -> String {
    coords.iter().map(ToString::to_string).collect::<Vec<_>>().join("/")
}

fn decode_chunk_ref(table: Table<'_>) -> Result<Option<ChunkRef>, IcechunkError> {
    let inline_data = table.get_u8_vector(CHUNK_REF_INLINE_DATA)?;
    let location = table.get_str(CHUNK_REF_LOCATION)?;
    let native_id = table.get_struct(CHUNK_REF_NATIVE_ID, 12)?;

    let modes_present = [
        inline_data.as_ref().is_some_and(|d| !d.is_empty()),
        location.as_ref().is_some_and(|l| !l.is_empty()),
        native_id.is_some(),
    ]
    .iter()
    .filter(|&&present| present)
    .count();

    if modes_present > 1 {
        warn!("chunk ref has multiple storage-mode discriminators set; preferring inline > virtual > native");
    }

    let offset = table.get_u64(CHUNK_REF_OFFSET)?.unwrap_or(0);
    let length = table.get_u64(CHUNK_REF_LENGTH)?.unwrap_or(0);

    // Priority order: inline, then virtual, then native (spec §4.4, §9).
    let payload = if let Some(data) = inline_data.filter(|d| !d.is_empty()) {
        ChunkPayload::Inline(data.to_vec())
    } else if let Some(location) = location.filter(|l| !l.is_empty()) {
        ChunkPayload::Virtual { location: location.to_string(), offset, length }
    } else if let Some(id_bytes) = native_id {
        let mut id = [0u8; 12];
        id.copy_from_slice(id_bytes);
        ChunkPayload::Native { id: ObjectId12(id), offset, length }
    } else {
        warn!("chunk ref has no recognised storage mode; dropping");
        return Ok(None);
    };

    let etag = table.get_str(CHUNK_REF_ETAG)?.map(str::to_string);
    let last_modified = table.get_u32(CHUNK_REF_LAST_MODIFIED)?;

    Ok(Some(ChunkRef { payload, etag, last_modified }))
}

fn decode_array_manifest(
    table: Table<'_>,
) -> Result<(ObjectId8, HashMap<String, ChunkRef>), IcechunkError> {
    let node_id_bytes = table
        .get_struct(ARRAY_MANIFEST_NODE_ID, 8)?
        .ok_or(IcechunkError::Format(FormatErrorKind::MissingField))?;
    let mut node_id = [0u8; 8];
    node_id.copy_from_slice(node_id_bytes);

    let ref_tables = table.get_table_vector(ARRAY_MANIFEST_REFS)?;
    let mut chunks = HashMap::with_capacity(ref_tables.len());

    for ref_table in ref_tables {
        let coords = ref_table.get_u32_vector(CHUNK_REF_COORDS)?;
        if let Some(chunk_ref) = decode_chunk_ref(ref_table)? {
            chunks.insert(coord_key(&coords), chunk_ref);
        }
    }

    Ok((ObjectId8(node_id), chunks))
}

/// Decode a manifest from an already-unwrapped FlatBuffers payload.
#[instrument(level = "debug", skip(payload))]
pub fn decode_manifest_payload(payload: &[u8]) -> Result<Manifest, IcechunkError> {
    let root = Table::root(payload)?;

    let id = root.get_struct(MANIFEST_ID, 12)?.map(|b| {
        let mut arr = [0u8; 12];
        arr.copy_from_slice(b);
        ObjectId12(arr)
    });

    let array_tables = root.get_table_vector(MANIFEST_ARRAYS)?;
    let mut arrays = HashMap::with_capacity(array_tables.len());
    for table in array_tables {
        let (node_id, chunks) = decode_array_manifest(table)?;
        arrays.insert(node_id, chunks);
    }

    trace!(arrays = arrays.len(), "decoded manifest");

    Ok(Manifest { id, arrays })
}

/// Parse the envelope and decode a full manifest from raw file bytes.
pub fn decode_manifest(data: &[u8]) -> Result<Manifest, IcechunkError> {
    let envelope = decode_envelope(data, Some(FileType::Manifest))?;
    decode_manifest_payload(&envelope.payload)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn coord_key_joins_with_slash() {
        assert_eq!(coord_key(&[1, 2, 3]), "1/2/3");
        assert_eq!(coord_key(&[]), "");
    }

    #[test]
    fn find_chunk_absent_is_none() {
        let manifest = Manifest::default();
        assert!(manifest.find_chunk(&ObjectId8([0; 8]), &[0, 0]).is_none());
    }

    #[test]
    fn find_chunk_present() {
        let mut arrays = HashMap::new();
        let mut chunks = HashMap::new();
        chunks.insert(
            coord_key(&[0, 0]),
            ChunkRef {
                payload: ChunkPayload::Inline(vec![1, 2, 3]),
                etag: None,
                last_modified: None,
            },
        );
        let node_id = ObjectId8([1; 8]);
        arrays.insert(node_id, chunks);
        let manifest = Manifest { id: None, arrays };

        let found = manifest.find_chunk(&node_id, &[0, 0]).unwrap();
        assert!(matches!(&found.payload, ChunkPayload::Inline(data) if data == &[1, 2, 3]));
    }
}
