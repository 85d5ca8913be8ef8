//! Sector-addressed region container holding up to 32×32 chunk payloads.
//!
//! ## File layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4096 | 1024 location words, big-endian `(offset_sectors << 8) \| sector_count` |
//! | 4096 | 4096 | 1024 timestamps, big-endian `i32` unix seconds |
//! | 8192 | … | sector-aligned records |
//!
//! Each record is a big-endian `i32` length (which counts the compression
//! byte), the compression tag, `length - 1` payload bytes, then zero padding
//! up to the next sector boundary.
//!
//! Slot `i` belongs to chunk `(x & 31) + (z & 31) * 32`. The header is only
//! rewritten by [`RegionFile::save`], after compaction has made every offset
//! final.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::compression::Compression;
use crate::error::RegionError;

/// Allocation granularity in bytes.
pub const SECTOR_SIZE: u64 = 4096;

/// Size of the location and timestamp tables.
pub const HEADER_SIZE: u64 = 2 * SECTOR_SIZE;

/// Chunks per region file.
pub const REGION_CHUNKS: usize = 1024;

/// Largest sector count the 8-bit location field can express.
pub const MAX_SECTORS: usize = 255;

/// Length prefix plus compression tag.
const RECORD_PREFIX: usize = 5;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Coordinate of a region, in units of 32 chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The region that stores chunk `(chunk_x, chunk_z)`.
    pub const fn of_chunk(chunk_x: i32, chunk_z: i32) -> Self {
        Self {
            x: chunk_x >> 5,
            z: chunk_z >> 5,
        }
    }

    /// File name of this region, `r.<x>.<z>.mca`.
    pub fn file_name(self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }
}

/// Header slot index for a chunk.
#[inline]
pub fn slot_index(chunk_x: i32, chunk_z: i32) -> usize {
    ((chunk_x & 31) + (chunk_z & 31) * 32) as usize
}

// ---------------------------------------------------------------------------
// Header entries
// ---------------------------------------------------------------------------

/// Where a chunk's record lives. The offset is held in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkLocation {
    pub offset: u64,
    pub sectors: u8,
}

impl ChunkLocation {
    /// A slot is trusted only when it points past the header at a non-empty run.
    pub fn is_present(self) -> bool {
        self.offset >= HEADER_SIZE && self.sectors != 0
    }

    fn from_word(word: u32) -> Self {
        Self {
            offset: u64::from(word >> 8) * SECTOR_SIZE,
            sectors: (word & 0xFF) as u8,
        }
    }

    fn to_word(self) -> u32 {
        (((self.offset / SECTOR_SIZE) as u32) << 8) | u32::from(self.sectors)
    }
}

/// A raw record as stored: compression tag plus still-compressed bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionRecord {
    pub compression: u8,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Region file
// ---------------------------------------------------------------------------

/// An open region container.
pub struct RegionFile {
    path: PathBuf,
    file: File,
    locations: Box<[ChunkLocation; REGION_CHUNKS]>,
    timestamps: Box<[i32; REGION_CHUNKS]>,
}

impl RegionFile {
    /// Opens the region at `path`, creating it with an empty header if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegionError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            file.set_len(HEADER_SIZE)?;
        }

        let mut header = vec![0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut locations = Box::new([ChunkLocation::default(); REGION_CHUNKS]);
        let mut timestamps = Box::new([0i32; REGION_CHUNKS]);
        let (loc_bytes, ts_bytes) = header.split_at(SECTOR_SIZE as usize);
        for i in 0..REGION_CHUNKS {
            let word = be_u32(&loc_bytes[i * 4..i * 4 + 4]);
            locations[i] = ChunkLocation::from_word(word);
            timestamps[i] = be_u32(&ts_bytes[i * 4..i * 4 + 4]) as i32;
        }

        tracing::debug!(path = %path.display(), bytes = len, "opened region file");
        Ok(Self {
            path,
            file,
            locations,
            timestamps,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn location(&self, chunk_x: i32, chunk_z: i32) -> ChunkLocation {
        self.locations[slot_index(chunk_x, chunk_z)]
    }

    /// Unix seconds of the last write to the chunk's slot, 0 if never written.
    pub fn timestamp(&self, chunk_x: i32, chunk_z: i32) -> i32 {
        self.timestamps[slot_index(chunk_x, chunk_z)]
    }

    pub fn has_chunk(&self, chunk_x: i32, chunk_z: i32) -> bool {
        self.location(chunk_x, chunk_z).is_present()
    }

    /// Number of present slots.
    pub fn chunk_count(&self) -> usize {
        self.locations.iter().filter(|l| l.is_present()).count()
    }

    /// Reads a chunk's raw record, or `None` if it was never generated.
    pub fn read(&mut self, chunk_x: i32, chunk_z: i32) -> Result<Option<RegionRecord>, RegionError> {
        let loc = self.location(chunk_x, chunk_z);
        if !loc.is_present() {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(loc.offset))?;
        let mut prefix = [0u8; RECORD_PREFIX];
        self.file.read_exact(&mut prefix)?;
        let length = be_u32(&prefix[..4]) as i32;

        let capacity = u64::from(loc.sectors) * SECTOR_SIZE - 4;
        if length <= 0 || length as u64 > capacity {
            return Err(RegionError::CorruptRecord {
                x: chunk_x,
                z: chunk_z,
                length,
            });
        }

        let mut payload = vec![0u8; length as usize - 1];
        self.file.read_exact(&mut payload)?;
        Ok(Some(RegionRecord {
            compression: prefix[4],
            payload,
        }))
    }

    /// Reads and decompresses a chunk's payload.
    pub fn read_decompressed(
        &mut self,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<Option<Vec<u8>>, RegionError> {
        let Some(record) = self.read(chunk_x, chunk_z)? else {
            return Ok(None);
        };
        let scheme = Compression::from_tag(record.compression)?;
        Ok(Some(scheme.decompress(&record.payload)?))
    }

    /// Writes an already-compressed payload with its compression tag.
    ///
    /// Growing records move to the end of the file. Records that still fit
    /// are rewritten in place. The header on disk is not touched.
    pub fn write(
        &mut self,
        chunk_x: i32,
        chunk_z: i32,
        payload: &[u8],
        compression: u8,
    ) -> Result<(), RegionError> {
        let record_len = payload.len() + RECORD_PREFIX;
        let needed = record_len.div_ceil(SECTOR_SIZE as usize);
        if needed > MAX_SECTORS {
            return Err(RegionError::PayloadTooLarge {
                sectors: needed,
                max: MAX_SECTORS,
            });
        }

        let slot = slot_index(chunk_x, chunk_z);
        let mut loc = self.locations[slot];
        if !loc.is_present() || needed > usize::from(loc.sectors) {
            loc.offset = self.end_of_sectors()?;
        }
        loc.sectors = needed as u8;

        let mut buf = Vec::with_capacity(needed * SECTOR_SIZE as usize);
        buf.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
        buf.push(compression);
        buf.extend_from_slice(payload);
        buf.resize(needed * SECTOR_SIZE as usize, 0);

        self.file.seek(SeekFrom::Start(loc.offset))?;
        self.file.write_all(&buf)?;

        self.locations[slot] = loc;
        self.timestamps[slot] = unix_now();
        tracing::trace!(x = chunk_x, z = chunk_z, bytes = payload.len(), sectors = needed, "wrote region record");
        Ok(())
    }

    /// Compresses `data` and writes it.
    pub fn write_compressed(
        &mut self,
        chunk_x: i32,
        chunk_z: i32,
        data: &[u8],
        scheme: Compression,
    ) -> Result<(), RegionError> {
        let packed = scheme.compress(data)?;
        self.write(chunk_x, chunk_z, &packed, scheme.tag())
    }

    /// Rewrites all present records contiguously after the header, in slot
    /// order, and truncates the file to the rebuilt length.
    ///
    /// Slots whose stored length is not positive, or overruns their sectors,
    /// are dropped.
    pub fn compact(&mut self) -> Result<(), RegionError> {
        let mut rebuilt = Vec::new();
        let mut dropped = 0usize;

        for slot in 0..REGION_CHUNKS {
            let loc = self.locations[slot];
            if !loc.is_present() {
                continue;
            }

            self.file.seek(SeekFrom::Start(loc.offset))?;
            let mut len_bytes = [0u8; 4];
            self.file.read_exact(&mut len_bytes)?;
            let length = be_u32(&len_bytes) as i32;
            let capacity = u64::from(loc.sectors) * SECTOR_SIZE - 4;
            if length <= 0 || length as u64 > capacity {
                self.locations[slot] = ChunkLocation::default();
                dropped += 1;
                continue;
            }

            let record_len = 4 + length as usize;
            let sectors = record_len.div_ceil(SECTOR_SIZE as usize);
            let start = rebuilt.len();
            rebuilt.extend_from_slice(&len_bytes);
            rebuilt.resize(start + record_len, 0);
            self.file.read_exact(&mut rebuilt[start + 4..start + record_len])?;
            rebuilt.resize(start + sectors * SECTOR_SIZE as usize, 0);

            self.locations[slot] = ChunkLocation {
                offset: HEADER_SIZE + start as u64,
                sectors: sectors as u8,
            };
        }

        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;
        self.file.write_all(&rebuilt)?;
        self.file.set_len(HEADER_SIZE + rebuilt.len() as u64)?;

        if dropped > 0 {
            tracing::warn!(path = %self.path.display(), dropped, "dropped corrupt region records during compaction");
        }
        tracing::debug!(path = %self.path.display(), bytes = rebuilt.len(), "compacted region file");
        Ok(())
    }

    /// Writes the location and timestamp tables.
    pub fn write_header(&mut self) -> Result<(), RegionError> {
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        for loc in self.locations.iter() {
            header.extend_from_slice(&loc.to_word().to_be_bytes());
        }
        for ts in self.timestamps.iter() {
            header.extend_from_slice(&ts.to_be_bytes());
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        Ok(())
    }

    /// Compacts, then rewrites the header.
    pub fn save(&mut self) -> Result<(), RegionError> {
        self.compact()?;
        self.write_header()?;
        self.file.flush()?;
        Ok(())
    }

    /// Saves and releases the file handle.
    pub fn close(mut self) -> Result<(), RegionError> {
        self.save()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// First sector-aligned byte offset past the current file contents.
    fn end_of_sectors(&mut self) -> Result<u64, RegionError> {
        let len = self.file.metadata()?.len().max(HEADER_SIZE);
        Ok(len.div_ceil(SECTOR_SIZE) * SECTOR_SIZE)
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn unix_now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
