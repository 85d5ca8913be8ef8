//! Region container error types.

use thiserror::Error;

/// Errors from reading, writing or compacting a region file.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record would need more sectors than the 8-bit count can hold.
    #[error("payload needs {sectors} sectors, the limit is {max}")]
    PayloadTooLarge { sectors: usize, max: usize },

    /// A present slot points at a record whose length prefix is unusable.
    #[error("corrupt record for chunk ({x}, {z}): stored length {length}")]
    CorruptRecord { x: i32, z: i32, length: i32 },

    #[error("unknown compression tag {0}")]
    UnknownCompression(u8),
}
