//! Chunk and block coordinates.

use serde::{Deserialize, Serialize};

/// Integer column coordinate of a chunk in chunk units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const ORIGIN: Self = Self { x: 0, z: 0 };

    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Packs both coordinates into one 64-bit key, `x` in the high half.
    pub const fn packed(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }

    /// Inverse of [`ChunkPos::packed`].
    pub const fn from_packed(key: u64) -> Self {
        Self {
            x: (key >> 32) as u32 as i32,
            z: key as u32 as i32,
        }
    }

    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Squared horizontal distance to `other`, in chunks.
    pub fn distance_sq(self, other: ChunkPos) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx * dx + dz * dz
    }

    /// The chunk containing the given block column.
    pub const fn containing(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x >> 4,
            z: block_z >> 4,
        }
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Absolute block position. `y` is bounded to the 256-block column height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: u32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: u32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk column this block belongs to.
    pub const fn chunk(self) -> ChunkPos {
        ChunkPos::containing(self.x, self.z)
    }

    /// Local `(x, y, z)` inside the owning chunk.
    pub const fn local(self) -> (usize, usize, usize) {
        (
            (self.x & 15) as usize,
            self.y as usize,
            (self.z & 15) as usize,
        )
    }
}
