//! Capability traits for parties that watch chunks and for entities stored in them.
//!
//! The storage core never needs to know what a viewer or an entity actually is.
//! It only calls through these traits.

use glam::DVec3;

use crate::pos::BlockPos;

/// Stable identity of an observer.
pub type ObserverId = u64;

/// An external party registered to receive chunk and block notifications.
pub trait Observer: Send + Sync {
    /// Identity used to key the observer in chunk and dimension sets.
    fn id(&self) -> ObserverId;

    /// Raw block-update notification.
    fn send_block_update(&self, pos: BlockPos, runtime_id: u32, layer: u32);
}

/// An entity that lives inside a chunk.
pub trait ChunkEntity: Send + Sync {
    /// Runtime id assigned by the owning world's allocator.
    fn runtime_id(&self) -> u64;

    /// Whether the entity has been closed. Closed entities cannot be added to chunks.
    fn is_closed(&self) -> bool;

    fn close(&self);

    fn position(&self) -> DVec3;

    /// Per-tick update. Does nothing by default.
    fn tick(&self) {}
}
