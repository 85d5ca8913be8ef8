//! Region containers: one file per 32×32 group of chunks, addressed in
//! 4 KiB sectors, with compaction on save.

pub mod compression;
pub mod error;
pub mod region;

pub use compression::Compression;
pub use error::RegionError;
pub use region::{
    ChunkLocation, HEADER_SIZE, MAX_SECTORS, REGION_CHUNKS, RegionFile, RegionPos, RegionRecord,
    SECTOR_SIZE, slot_index,
};
