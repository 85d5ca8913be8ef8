//! Runtime id allocation for entities.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out monotonically increasing entity runtime ids, starting at 1.
///
/// One allocator is owned by the world context and shared by its dimensions,
/// so ids never collide across dimensions.
#[derive(Debug)]
pub struct EntityIdAllocator {
    next: AtomicU64,
}

impl EntityIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for EntityIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
