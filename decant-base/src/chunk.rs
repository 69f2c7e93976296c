// Content Chunk Format
//
// A chunk wraps one serialized object together with the table of content
// references it points at.
//
// Header
// [4] magic number encoded as u32 (0x444E4B31, "DNK1")
// [4] format version encoded as u32
// [4] type tag length in bytes encoded as u32 (0 = no tag)
// [n] type tag, UTF-8
// [8] offset of the object payload encoded as u64
// [8] offset of the reference table encoded as i64 (-1 = no table)
//
// The object payload and the reference table follow at the recorded offsets.
// Reference table:
// [4] entry count encoded as u32
// per entry:
//   [4] url length in bytes encoded as u32
//   [n] url, UTF-8
//   [16] type id bytes
//
// All integers are little-endian.
//
// A chunk may also be headerless (a serializer without a serialization type
// writes the bare payload). Readers detect this by the magic number: a
// mismatch means "no header" and the stream is repositioned at the start. A
// matching magic number followed by malformed or truncated bytes is an I/O
// error.
//
// Offsets are not known until the payload has been written, so writers emit
// the header twice: once up front with placeholder offsets to reserve the
// space, and again over the top of it once the payload and table positions
// are known. The header size only depends on the type tag, so both passes
// write the same number of bytes.

use crate::ContentTypeId;
use std::io::{Read, Seek, SeekFrom, Write};

const CHUNK_MAGIC: u32 = 0x444E_4B31;
const CHUNK_VERSION: u32 = 1;

// Anything larger is corrupt data, not a real tag or url
const MAX_STRING_LEN: u32 = 64 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkHeader {
    /// Type tag of the serialized object, used to find a serializer when the
    /// caller's requested type doesn't name one.
    pub type_tag: Option<String>,
    pub offset_to_object: u64,
    pub offset_to_references: Option<u64>,
}

impl ChunkHeader {
    pub fn new(type_tag: Option<&str>) -> Self {
        ChunkHeader {
            type_tag: type_tag.map(|t| t.to_string()),
            offset_to_object: 0,
            offset_to_references: None,
        }
    }

    pub fn write<W: Write>(
        &self,
        writer: &mut W,
    ) -> std::io::Result<()> {
        writer.write_all(&CHUNK_MAGIC.to_le_bytes())?;
        writer.write_all(&CHUNK_VERSION.to_le_bytes())?;
        let tag = self.type_tag.as_deref().unwrap_or("");
        writer.write_all(&(tag.len() as u32).to_le_bytes())?;
        writer.write_all(tag.as_bytes())?;
        writer.write_all(&self.offset_to_object.to_le_bytes())?;
        let references_offset = match self.offset_to_references {
            Some(offset) => offset as i64,
            None => -1,
        };
        writer.write_all(&references_offset.to_le_bytes())?;
        Ok(())
    }

    /// Reads a header from the start of a chunk. Returns `None` for a
    /// headerless chunk, with the reader repositioned at the start.
    pub fn read<R: Read + Seek>(reader: &mut R) -> std::io::Result<Option<ChunkHeader>> {
        let mut magic = [0u8; 4];
        if !try_read_exact(reader, &mut magic)? || u32::from_le_bytes(magic) != CHUNK_MAGIC {
            reader.seek(SeekFrom::Start(0))?;
            return Ok(None);
        }

        // From here on a short or malformed read is a hard error
        let version = read_u32(reader)?;
        if version != CHUNK_VERSION {
            return Err(invalid_data(format!(
                "unsupported chunk version {}",
                version
            )));
        }

        let tag = read_string(reader)?;
        let type_tag = if tag.is_empty() { None } else { Some(tag) };
        let offset_to_object = read_u64(reader)?;
        let references_offset = read_i64(reader)?;
        let offset_to_references = match references_offset {
            -1 => None,
            offset if offset >= 0 => Some(offset as u64),
            offset => {
                return Err(invalid_data(format!(
                    "negative reference table offset {}",
                    offset
                )))
            }
        };

        Ok(Some(ChunkHeader {
            type_tag,
            offset_to_object,
            offset_to_references,
        }))
    }
}

/// One entry of a chunk's reference table: the url of a referenced object and
/// the type it is expected to load as.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkReference {
    pub url: String,
    pub type_id: ContentTypeId,
}

impl ChunkReference {
    pub fn write_table<W: Write>(
        references: &[ChunkReference],
        writer: &mut W,
    ) -> std::io::Result<()> {
        writer.write_all(&(references.len() as u32).to_le_bytes())?;
        for reference in references {
            writer.write_all(&(reference.url.len() as u32).to_le_bytes())?;
            writer.write_all(reference.url.as_bytes())?;
            writer.write_all(reference.type_id.as_bytes())?;
        }
        Ok(())
    }

    pub fn read_table<R: Read>(reader: &mut R) -> std::io::Result<Vec<ChunkReference>> {
        let count = read_u32(reader)?;
        if count > MAX_STRING_LEN {
            return Err(invalid_data(format!(
                "implausible reference table size {}",
                count
            )));
        }

        let mut references = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let url = read_string(reader)?;
            let mut type_bytes = [0u8; 16];
            reader.read_exact(&mut type_bytes)?;
            references.push(ChunkReference {
                url,
                type_id: ContentTypeId::from_bytes(type_bytes),
            });
        }
        Ok(references)
    }
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

// read_exact that reports a clean false on immediate EOF instead of an error,
// so the magic probe can distinguish "headerless" from "truncated"
fn try_read_exact<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i64<R: Read>(reader: &mut R) -> std::io::Result<i64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_string<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(invalid_data(format!("implausible string length {}", len)));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| invalid_data(e.to_string()))
}
