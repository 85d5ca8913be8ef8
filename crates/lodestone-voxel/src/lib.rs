//! Voxel storage: nibble-packed segments, chunk columns, chunk encodings and
//! the capability traits chunks hold their observers and entities through.

pub mod chunk;
pub mod chunk_serial;
pub mod legacy;
pub mod nibble;
pub mod observer;
pub mod pos;
pub mod registry;
pub mod segment;

pub use chunk::{
    CHUNK_HEIGHT, COLUMN_COUNT, Chunk, ChunkError, HEIGHT_EMPTY, SEGMENTS_PER_CHUNK, SharedChunk,
};
pub use chunk_serial::{ChunkDecodeError, decode_payload};
pub use nibble::NibbleArray;
pub use observer::{ChunkEntity, Observer, ObserverId};
pub use pos::{BlockPos, ChunkPos};
pub use registry::{BlockDef, BlockInstance, BlockRegistry, BlockTable, RegistryError};
pub use segment::{SEGMENT_ENCODED_LEN, SEGMENT_SIZE, SEGMENT_VOLUME, Segment};
