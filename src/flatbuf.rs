//! Minimal, hand-written FlatBuffers reader.
//!
//! No schema, no code generation: every accessor here reads a vtable by
//! raw offset, exactly as spec'd. A FlatBuffers table is a `uoffset` (a
//! little-endian `u32`, relative to its own position) pointing forward to
//! a vtable, which in turn is a little-endian `u16` array:
//! `[vtable_size, object_size, field_0_offset, field_1_offset, ...]`.
//! A zero field offset means the field was omitted by the writer (use the
//! schema default, or treat as absent).

use crate::error::{FormatErrorKind, IcechunkError};

fn missing_field() -> IcechunkError {
    IcechunkError::Format(FormatErrorKind::MissingField)
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, IcechunkError> {
    buf.get(at..at + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or_else(missing_field)
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, IcechunkError> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(missing_field)
}

fn read_u64(buf: &[u8], at: usize) -> Result<u64, IcechunkError> {
    buf.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(missing_field)
}

/// A table view into a FlatBuffers buffer: the buffer plus the byte offset
/// of this table's start (where its `soffset` to the vtable lives).
#[derive(Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    loc: usize,
}

impl<'a> Table<'a> {
    /// Resolve the root table of a FlatBuffers buffer: a `uoffset` at byte 0
    /// pointing to the table.
    pub fn root(buf: &'a [u8]) -> Result<Self, IcechunkError> {
        let root_offset = read_u32(buf, 0)? as usize;
        Ok(Self { buf, loc: root_offset })
    }

    fn table_at(buf: &'a [u8], loc: usize) -> Result<Self, IcechunkError> {
        Ok(Self { buf, loc })
    }

    /// Byte offset within the table of field at `vtable_offset` (the
    /// spec's "vtable" column), or `None` if the writer omitted it.
    fn field_offset(&self, vtable_offset: u16) -> Result<Option<usize>, IcechunkError> {
        // soffset: signed, vtable location = loc - soffset.
        let soffset = read_u32(self.buf, self.loc)? as i32;
        let vtable_loc = (self.loc as i64 - i64::from(soffset)) as usize;
        let vtable_size = read_u16(self.buf, vtable_loc)?;

        if u16::from(vtable_offset) >= vtable_size {
            return Ok(None);
        }

        let field_entry = read_u16(self.buf, vtable_loc + vtable_offset as usize)?;
        if field_entry == 0 {
            return Ok(None);
        }

        Ok(Some(self.loc + field_entry as usize))
    }

    /// Read a `u8` field, or `None` if absent.
    pub fn get_u8(&self, vtable_offset: u16) -> Result<Option<u8>, IcechunkError> {
        match self.field_offset(vtable_offset)? {
            Some(at) => Ok(self.buf.get(at).copied()),
            None => Ok(None),
        }
    }

    /// Read a `u32` field, or `None` if absent.
    pub fn get_u32(&self, vtable_offset: u16) -> Result<Option<u32>, IcechunkError> {
        match self.field_offset(vtable_offset)? {
            Some(at) => Ok(Some(read_u32(self.buf, at)?)),
            None => Ok(None),
        }
    }

    /// Read a `u64` field, or `None` if absent.
    pub fn get_u64(&self, vtable_offset: u16) -> Result<Option<u64>, IcechunkError> {
        match self.field_offset(vtable_offset)? {
            Some(at) => Ok(Some(read_u64(self.buf, at)?)),
            None => Ok(None),
        }
    }

    /// Read an inline fixed-size struct field (e.g. `ObjectId12`/`ObjectId8`)
    /// as raw bytes, or `None` if absent. Structs are stored inline in the
    /// table, not behind an indirection offset.
    pub fn get_struct(&self, vtable_offset: u16, len: usize) -> Result<Option<&'a [u8]>, IcechunkError> {
        match self.field_offset(vtable_offset)? {
            Some(at) => Ok(Some(self.buf.get(at..at + len).ok_or_else(missing_field)?)),
            None => Ok(None),
        }
    }

    /// Read a string field, or `None` if absent.
    pub fn get_str(&self, vtable_offset: u16) -> Result<Option<&'a str>, IcechunkError> {
        let Some(at) = self.field_offset(vtable_offset)? else {
            return Ok(None);
        };
        let string_loc = at + read_u32(self.buf, at)? as usize;
        let len = read_u32(self.buf, string_loc)? as usize;
        let bytes = self
            .buf
            .get(string_loc + 4..string_loc + 4 + len)
            .ok_or_else(missing_field)?;
        let s = std::str::from_utf8(bytes).map_err(|_| missing_field())?;
        Ok(Some(s))
    }

    /// Read a nested table field, or `None` if absent.
    pub fn get_table(&self, vtable_offset: u16) -> Result<Option<Table<'a>>, IcechunkError> {
        let Some(at) = self.field_offset(vtable_offset)? else {
            return Ok(None);
        };
        let table_loc = at + read_u32(self.buf, at)? as usize;
        Ok(Some(Table::table_at(self.buf, table_loc)?))
    }

    /// Read a vector field's element count and the byte offset of its
    /// first element, or `None` if absent.
    fn get_vector_header(&self, vtable_offset: u16) -> Result<Option<(usize, usize)>, IcechunkError> {
        let Some(at) = self.field_offset(vtable_offset)? else {
            return Ok(None);
        };
        let vector_loc = at + read_u32(self.buf, at)? as usize;
        let len = read_u32(self.buf, vector_loc)? as usize;
        Ok(Some((len, vector_loc + 4)))
    }

    /// Iterate a vector-of-tables field.
    pub fn get_table_vector(&self, vtable_offset: u16) -> Result<Vec<Table<'a>>, IcechunkError> {
        let Some((len, start)) = self.get_vector_header(vtable_offset)? else {
            return Ok(Vec::new());
        };
        (0..len)
            .map(|i| {
                let entry_at = start + i * 4;
                let table_loc = entry_at + read_u32(self.buf, entry_at)? as usize;
                Table::table_at(self.buf, table_loc)
            })
            .collect()
    }

    /// Iterate a vector-of-`u32` field.
    pub fn get_u32_vector(&self, vtable_offset: u16) -> Result<Vec<u32>, IcechunkError> {
        let Some((len, start)) = self.get_vector_header(vtable_offset)? else {
            return Ok(Vec::new());
        };
        (0..len).map(|i| read_u32(self.buf, start + i * 4)).collect()
    }

    /// Iterate a vector-of-`u8` field (e.g. inline chunk bytes), or `None`
    /// if the field itself is absent.
    pub fn get_u8_vector(&self, vtable_offset: u16) -> Result<Option<&'a [u8]>, IcechunkError> {
        let Some((len, start)) = self.get_vector_header(vtable_offset)? else {
            return Ok(None);
        };
        Ok(Some(self.buf.get(start..start + len).ok_or_else(missing_field)?))
    }

    /// Iterate a vector of fixed-size inline structs, returning each
    /// element's raw bytes.
    pub fn get_struct_vector(&self, vtable_offset: u16, elem_len: usize) -> Result<Vec<&'a [u8]>, IcechunkError> {
        let Some((len, start)) = self.get_vector_header(vtable_offset)? else {
            return Ok(Vec::new());
        };
        (0..len)
            .map(|i| {
                let at = start + i * elem_len;
                self.buf.get(at..at + elem_len).ok_or_else(missing_field)
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Hand-build a trivial one-field (`u32`) table so the vtable walker
    /// can be tested without a real writer.
    fn build_single_u32_table(value: u32) -> Vec<u8> {
        // layout: [root uoffset:4][table soffset:4][value:4][vtable: size:2, objsize:2, field0:2]
        let mut buf = vec![0u8; 4];
        let table_loc = buf.len();
        buf.extend_from_slice(&[0u8; 4]); // soffset placeholder
        buf.extend_from_slice(&value.to_le_bytes());
        let vtable_loc = buf.len();
        buf.extend_from_slice(&6u16.to_le_bytes()); // vtable size
        buf.extend_from_slice(&8u16.to_le_bytes()); // object size
        buf.extend_from_slice(&4u16.to_le_bytes()); // field0 offset within table

        let soffset = (table_loc as i32) - (vtable_loc as i32);
        buf[table_loc..table_loc + 4].copy_from_slice(&soffset.to_le_bytes());
        buf[0..4].copy_from_slice(&(table_loc as u32).to_le_bytes());
        buf
    }

    #[test]
    fn reads_present_scalar_field() {
        let buf = build_single_u32_table(42);
        let table = Table::root(&buf).unwrap();
        assert_eq!(table.get_u32(4).unwrap(), Some(42));
    }

    #[test]
    fn missing_field_is_none_not_error() {
        let buf = build_single_u32_table(42);
        let table = Table::root(&buf).unwrap();
        assert_eq!(table.get_u32(6).unwrap(), None);
    }
}
