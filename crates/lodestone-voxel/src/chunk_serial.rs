//! Binary encodings for [`Chunk`].
//!
//! Two encodings live here:
//!
//! - The **wire form** sent to clients, bit-exact and encode-only:
//!
//! | Size | Field |
//! |------|-------|
//! | 1 | compacted segment count `n` |
//! | n × 6145 | per segment: flag `0`, 4096 ids, 2048 packed data (zeros if not materialized) |
//! | 512 | height map, `i16` LE, column index 255 down to 0 |
//! | 256 | biomes |
//! | 1 | terminator `0` |
//! | 1 | extension length, varint `0` |
//!
//! - The **storage form** (LDCK) written into region payloads, which keeps
//!   light, flags, counters and block tags:
//!
//! | Size | Field |
//! |------|-------|
//! | 4 | magic `"LDCK"` |
//! | 1 | format version (`1`) |
//! | 8 | chunk x, z (`i32` LE) |
//! | 1 | flags: bit 0 light populated, bit 1 terrain populated |
//! | 16 | inhabited time, last update (`i64` LE) |
//! | 2 | segment mask (`u16` LE) |
//! | k × 10240 | per set bit: ids, data, block light, sky light |
//! | 512 | height map, `i16` LE, column order |
//! | 256 | biomes |
//! | 4 | tag count (`u32` LE) |
//! | … | per tag: key `u16`, length `u32`, uncompressed NBT compound |
//!
//! Payloads without the magic are handed to the legacy NBT importer.

use std::io::Cursor;

use quartz_nbt::io::{Flavor, NbtIoError, read_nbt, write_nbt};
use quartz_nbt::NbtReprError;
use thiserror::Error;

use crate::chunk::{COLUMN_COUNT, Chunk, SEGMENTS_PER_CHUNK};
use crate::legacy;
use crate::nibble::{NIBBLE_ARRAY_LEN, NibbleArray};
use crate::pos::ChunkPos;
use crate::segment::{SEGMENT_ENCODED_LEN, SEGMENT_VOLUME, Segment};

/// Magic bytes identifying the storage form.
const MAGIC: [u8; 4] = *b"LDCK";

/// Current storage format version.
const FORMAT_VERSION: u8 = 1;

const FLAG_LIGHT_POPULATED: u8 = 0b01;
const FLAG_TERRAIN_POPULATED: u8 = 0b10;

/// Errors that can occur while decoding a stored chunk.
#[derive(Debug, Error)]
pub enum ChunkDecodeError {
    /// The data does not start with the storage magic.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    /// The data is shorter than expected.
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// A legacy compound is missing a required tag.
    #[error("missing tag: {0}")]
    MissingTag(&'static str),
    /// A legacy section array has the wrong length.
    #[error("tag {tag} has length {actual}, expected {expected}")]
    BadArrayLength {
        tag: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The payload belongs to a different chunk than the slot it was read from.
    #[error("payload is for chunk {found}, expected {expected}")]
    PositionMismatch { expected: ChunkPos, found: ChunkPos },
    #[error(transparent)]
    Nbt(#[from] NbtIoError),
    #[error(transparent)]
    NbtRepr(#[from] NbtReprError),
}

/// Decodes a region payload for `pos`, dispatching on the storage magic.
pub fn decode_payload(pos: ChunkPos, bytes: &[u8]) -> Result<Chunk, ChunkDecodeError> {
    let chunk = if bytes.starts_with(&MAGIC) {
        Chunk::decode_storage(bytes)?
    } else {
        legacy::decode_legacy(bytes)?
    };
    if chunk.pos() != pos {
        return Err(ChunkDecodeError::PositionMismatch {
            expected: pos,
            found: chunk.pos(),
        });
    }
    Ok(chunk)
}

impl Chunk {
    /// Encodes the client wire form.
    pub fn encode_network(&self) -> Vec<u8> {
        let count = self.compacted_segment_count();
        let mut out =
            Vec::with_capacity(1 + count * SEGMENT_ENCODED_LEN + COLUMN_COUNT * 3 + 2);

        out.push(count as u8);
        for index in 0..count {
            match self.segment(index) {
                Some(segment) => segment.encode_into(&mut out),
                None => out.resize(out.len() + SEGMENT_ENCODED_LEN, 0),
            }
        }

        let heights = self.height_map_values();
        for column in (0..COLUMN_COUNT).rev() {
            out.extend_from_slice(&heights[column].to_le_bytes());
        }
        out.extend_from_slice(self.biomes());

        // Terminator, then a zero-length extension varint.
        out.push(0);
        out.push(0);
        out
    }

    /// Encodes the storage form.
    pub fn encode_storage(&self) -> Result<Vec<u8>, NbtIoError> {
        let count = self.compacted_segment_count();
        let mut mask = 0u16;
        for (index, _) in self.segments().filter(|&(i, _)| i < count) {
            mask |= 1 << index;
        }

        let mut buf = Vec::with_capacity(
            32 + mask.count_ones() as usize * (SEGMENT_VOLUME + 3 * NIBBLE_ARRAY_LEN)
                + COLUMN_COUNT * 3,
        );

        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&self.pos().x.to_le_bytes());
        buf.extend_from_slice(&self.pos().z.to_le_bytes());

        let mut flags = 0u8;
        if self.light_populated() {
            flags |= FLAG_LIGHT_POPULATED;
        }
        if self.terrain_populated() {
            flags |= FLAG_TERRAIN_POPULATED;
        }
        buf.push(flags);
        buf.extend_from_slice(&self.inhabited_time().to_le_bytes());
        buf.extend_from_slice(&self.last_update().to_le_bytes());

        buf.extend_from_slice(&mask.to_le_bytes());
        for (index, segment) in self.segments() {
            if mask & (1 << index) == 0 {
                continue;
            }
            buf.extend_from_slice(segment.ids());
            buf.extend_from_slice(segment.data().as_bytes());
            buf.extend_from_slice(segment.block_light_array().as_bytes());
            buf.extend_from_slice(segment.sky_light_array().as_bytes());
        }

        for height in self.height_map_values() {
            buf.extend_from_slice(&height.to_le_bytes());
        }
        buf.extend_from_slice(self.biomes());

        let mut tags: Vec<_> = self.block_tags().collect();
        tags.sort_by_key(|&(key, _)| key);
        // Up to 65 536 keys, one past u16::MAX.
        buf.extend_from_slice(&(tags.len() as u32).to_le_bytes());
        let mut nbt = Vec::new();
        for (key, tag) in tags {
            nbt.clear();
            write_nbt(&mut nbt, None, tag, Flavor::Uncompressed)?;
            buf.extend_from_slice(&key.to_le_bytes());
            buf.extend_from_slice(&(nbt.len() as u32).to_le_bytes());
            buf.extend_from_slice(&nbt);
        }

        Ok(buf)
    }

    /// Decodes the storage form. The result is marked clean.
    pub fn decode_storage(bytes: &[u8]) -> Result<Self, ChunkDecodeError> {
        let mut r = Reader::new(bytes);

        if r.take(MAGIC.len())? != MAGIC {
            return Err(ChunkDecodeError::InvalidMagic);
        }
        let version = r.u8()?;
        if version != FORMAT_VERSION {
            return Err(ChunkDecodeError::UnsupportedVersion(version));
        }

        let x = r.i32()?;
        let z = r.i32()?;
        let mut chunk = Chunk::new(ChunkPos::new(x, z));

        let flags = r.u8()?;
        chunk.set_light_populated(flags & FLAG_LIGHT_POPULATED != 0);
        chunk.set_terrain_populated(flags & FLAG_TERRAIN_POPULATED != 0);
        chunk.set_inhabited_time(r.i64()?);
        chunk.set_last_update(r.i64()?);

        let mask = r.u16()?;
        for index in 0..SEGMENTS_PER_CHUNK {
            if mask & (1 << index) == 0 {
                continue;
            }
            let ids = r.take(SEGMENT_VOLUME)?;
            let ids = Box::new(<[u8; SEGMENT_VOLUME]>::try_from(ids).map_err(|_| {
                ChunkDecodeError::Truncated {
                    expected: SEGMENT_VOLUME,
                    actual: ids.len(),
                }
            })?);
            let data = r.nibbles()?;
            let block_light = r.nibbles()?;
            let sky_light = r.nibbles()?;
            chunk.set_segment(index, Segment::from_parts(ids, data, block_light, sky_light));
        }

        for column in 0..COLUMN_COUNT {
            let height = r.i16()?;
            chunk.set_height_map(column & 15, column >> 4, height);
        }

        let mut biomes = [0u8; COLUMN_COUNT];
        biomes.copy_from_slice(r.take(COLUMN_COUNT)?);
        chunk.set_biomes(biomes);

        let tag_count = r.u32()?;
        for _ in 0..tag_count {
            let key = r.u16()?;
            let len = r.u32()? as usize;
            let mut cursor = Cursor::new(r.take(len)?);
            let (tag, _) = read_nbt(&mut cursor, Flavor::Uncompressed)?;
            chunk.insert_block_tag_raw(key, tag);
        }

        chunk.mark_clean();
        Ok(chunk)
    }
}

/// Bounds-checked little-endian cursor over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ChunkDecodeError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(ChunkDecodeError::Truncated {
                expected: end,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ChunkDecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ChunkDecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ChunkDecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, ChunkDecodeError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ChunkDecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, ChunkDecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, ChunkDecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn nibbles(&mut self) -> Result<NibbleArray, ChunkDecodeError> {
        let bytes = self.take(NIBBLE_ARRAY_LEN)?;
        NibbleArray::from_bytes(bytes).ok_or(ChunkDecodeError::Truncated {
            expected: NIBBLE_ARRAY_LEN,
            actual: bytes.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
