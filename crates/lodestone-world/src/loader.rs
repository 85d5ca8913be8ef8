//! Per-observer chunk streaming around a moving center.
//!
//! Each tick the loader sorts the world into what should be resident (the
//! disc `dx² + dz² <= r²` around its center) and what should go, then drains
//! a bounded number of loads and unloads. Loads are requested nearest-first
//! through [`ChunkProvider::load`] and become resident when their callback
//! fires, possibly on a provider worker thread.
//!
//! A coordinate is never queued for load and unload at the same time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use lodestone_voxel::{ChunkPos, SharedChunk};
use rustc_hash::FxHashSet;

use crate::provider::{ChunkProvider, ProviderError};

/// Largest view distance the loader honors; larger settings are clamped.
pub const MAX_VIEW_DISTANCE: u32 = 64;

/// View distance and drain budget for a [`ChunkLoader`].
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Radius of the resident disc, in chunks.
    pub view_distance: u32,
    /// Maximum loads dispatched and maximum unloads performed per tick.
    pub chunks_per_tick: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            view_distance: 8,
            chunks_per_tick: 16,
        }
    }
}

/// Hooks fired by a [`ChunkLoader`]. Every method defaults to a no-op.
///
/// `on_chunk_loaded` may run on a provider worker thread.
pub trait LoaderListener: Send + Sync {
    fn on_chunk_loaded(&self, _pos: ChunkPos, _chunk: &SharedChunk) {}

    /// `chunk` is `None` if the provider no longer holds it.
    fn on_chunk_unloaded(&self, _pos: ChunkPos, _chunk: Option<&SharedChunk>) {}

    /// Fired before a tick dispatches loads.
    fn on_observers_changed(&self) {}
}

/// Listener that ignores every hook.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl LoaderListener for NoopListener {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderPhase {
    Idle,
    Sorting,
    Draining,
}

/// Outcome of one [`ChunkLoader::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoaderTickResult {
    /// Load requests handed to the provider.
    pub dispatched: usize,
    /// Chunks released from the resident set.
    pub unloaded: usize,
    /// Loads still queued after the drain.
    pub pending_loads: usize,
    /// Unloads still queued after the drain.
    pub pending_unloads: usize,
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// Nearest-first load queue with dedup and lazy removal.
#[derive(Debug, Default)]
struct LoadQueue {
    heap: BinaryHeap<Reverse<(i64, ChunkPos)>>,
    pending: FxHashSet<ChunkPos>,
}

impl LoadQueue {
    /// Returns `false` if `pos` was already queued.
    fn enqueue(&mut self, pos: ChunkPos, dist_sq: i64) -> bool {
        if self.pending.insert(pos) {
            self.heap.push(Reverse((dist_sq, pos)));
            true
        } else {
            false
        }
    }

    fn dequeue(&mut self) -> Option<(i64, ChunkPos)> {
        while let Some(Reverse((dist_sq, pos))) = self.heap.pop() {
            if self.pending.remove(&pos) {
                return Some((dist_sq, pos));
            }
        }
        None
    }

    fn remove(&mut self, pos: ChunkPos) -> bool {
        self.pending.remove(&pos)
    }

    fn contains(&self, pos: ChunkPos) -> bool {
        self.pending.contains(&pos)
    }

    fn retain(&mut self, keep: impl FnMut(&ChunkPos) -> bool) {
        self.pending.retain(keep);
    }

    /// Rebuilds the heap against a new center, dropping stale entries.
    fn reprioritize(&mut self, center: ChunkPos) {
        self.heap = self
            .pending
            .iter()
            .map(|&pos| Reverse((pos.distance_sq(center), pos)))
            .collect();
    }

    fn len(&self) -> usize {
        self.pending.len()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }
}

/// FIFO unload queue with dedup and lazy removal.
#[derive(Debug, Default)]
struct UnloadQueue {
    order: VecDeque<ChunkPos>,
    pending: FxHashSet<ChunkPos>,
}

impl UnloadQueue {
    fn enqueue(&mut self, pos: ChunkPos) -> bool {
        if self.pending.insert(pos) {
            self.order.push_back(pos);
            true
        } else {
            false
        }
    }

    fn dequeue(&mut self) -> Option<ChunkPos> {
        while let Some(pos) = self.order.pop_front() {
            if self.pending.remove(&pos) {
                return Some(pos);
            }
        }
        None
    }

    fn remove(&mut self, pos: ChunkPos) -> bool {
        self.pending.remove(&pos)
    }

    fn contains(&self, pos: ChunkPos) -> bool {
        self.pending.contains(&pos)
    }

    fn len(&self) -> usize {
        self.pending.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}

/// Residency state shared with in-flight load callbacks.
#[derive(Debug, Default)]
struct Tracker {
    resident: Mutex<FxHashSet<ChunkPos>>,
    dispatched: Mutex<FxHashSet<ChunkPos>>,
}

impl Tracker {
    fn resident(&self) -> std::sync::MutexGuard<'_, FxHashSet<ChunkPos>> {
        self.resident.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatched(&self) -> std::sync::MutexGuard<'_, FxHashSet<ChunkPos>> {
        self.dispatched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `pos` resident before clearing its dispatch, so a sort that
    /// snapshots dispatched first always sees it in one of the two sets.
    fn complete(&self, pos: ChunkPos) {
        self.resident().insert(pos);
        self.dispatched().remove(&pos);
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Streams the chunks around one observer.
pub struct ChunkLoader {
    provider: Arc<ChunkProvider>,
    listener: Arc<dyn LoaderListener>,
    config: LoaderConfig,
    center: ChunkPos,
    phase: LoaderPhase,
    load_queue: LoadQueue,
    unload_queue: UnloadQueue,
    /// Center the load queue's priorities were computed against.
    queue_center: ChunkPos,
    tracker: Arc<Tracker>,
}

impl ChunkLoader {
    pub fn new(
        provider: Arc<ChunkProvider>,
        center: ChunkPos,
        config: LoaderConfig,
        listener: Arc<dyn LoaderListener>,
    ) -> Self {
        Self {
            provider,
            listener,
            config,
            center,
            phase: LoaderPhase::Idle,
            load_queue: LoadQueue::default(),
            unload_queue: UnloadQueue::default(),
            queue_center: center,
            tracker: Arc::new(Tracker::default()),
        }
    }

    pub fn center(&self) -> ChunkPos {
        self.center
    }

    /// Moves the center. Takes effect on the next sort.
    pub fn move_to(&mut self, center: ChunkPos) {
        self.center = center;
    }

    /// Effective view distance, clamped to [`MAX_VIEW_DISTANCE`].
    pub fn view_distance(&self) -> u32 {
        self.config.view_distance.min(MAX_VIEW_DISTANCE)
    }

    pub fn set_view_distance(&mut self, view_distance: u32) {
        self.config.view_distance = view_distance;
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn phase(&self) -> LoaderPhase {
        self.phase
    }

    pub fn is_resident(&self, pos: ChunkPos) -> bool {
        self.tracker.resident().contains(&pos)
    }

    pub fn resident_count(&self) -> usize {
        self.tracker.resident().len()
    }

    pub fn resident_positions(&self) -> Vec<ChunkPos> {
        self.tracker.resident().iter().copied().collect()
    }

    /// Loads handed to the provider whose callback has not fired yet.
    pub fn dispatched_count(&self) -> usize {
        self.tracker.dispatched().len()
    }

    pub fn pending_loads(&self) -> usize {
        self.load_queue.len()
    }

    pub fn pending_unloads(&self) -> usize {
        self.unload_queue.len()
    }

    pub fn is_load_queued(&self, pos: ChunkPos) -> bool {
        self.load_queue.contains(pos)
    }

    pub fn is_unload_queued(&self, pos: ChunkPos) -> bool {
        self.unload_queue.contains(pos)
    }

    /// Recomputes both queues against the current center and view distance.
    pub fn sort(&mut self) {
        self.phase = LoaderPhase::Sorting;
        let center = self.center;
        let radius = self.view_distance();
        let radius_sq = i64::from(radius) * i64::from(radius);

        if center != self.queue_center {
            self.load_queue.reprioritize(center);
            self.queue_center = center;
        }

        // Queued loads that fell out of the disc are stale.
        self.load_queue
            .retain(|pos| pos.distance_sq(center) <= radius_sq);

        let dispatched = self.tracker.dispatched().clone();
        let resident = self.tracker.resident().clone();

        for &pos in &resident {
            if pos.distance_sq(center) > radius_sq {
                self.unload_queue.enqueue(pos);
                self.load_queue.remove(pos);
            } else {
                self.unload_queue.remove(pos);
            }
        }

        // Bounded by MAX_VIEW_DISTANCE.
        let r = radius as i32;
        for dx in -r..=r {
            for dz in -r..=r {
                let dist_sq = i64::from(dx) * i64::from(dx) + i64::from(dz) * i64::from(dz);
                if dist_sq > radius_sq {
                    continue;
                }
                let pos = center.offset(dx, dz);
                if resident.contains(&pos) || dispatched.contains(&pos) {
                    continue;
                }
                if self.load_queue.enqueue(pos, dist_sq) {
                    self.unload_queue.remove(pos);
                }
            }
        }
    }

    /// Sorts, then drains up to the per-tick budget of loads and of unloads.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::QueueFull`] (or another provider error) if a
    /// load could not be dispatched. The undispatched coordinate stays queued
    /// and the unload drain still runs.
    pub fn tick(&mut self) -> Result<LoaderTickResult, ProviderError> {
        self.sort();
        self.phase = LoaderPhase::Draining;

        let mut result = LoaderTickResult::default();
        if !self.load_queue.is_empty() {
            self.listener.on_observers_changed();
        }
        let load_result = self.drain_loads(&mut result);
        self.drain_unloads(&mut result);

        result.pending_loads = self.load_queue.len();
        result.pending_unloads = self.unload_queue.len();
        self.phase = LoaderPhase::Idle;

        load_result.map(|()| result)
    }

    fn drain_loads(&mut self, result: &mut LoaderTickResult) -> Result<(), ProviderError> {
        for _ in 0..self.config.chunks_per_tick {
            let Some((dist_sq, pos)) = self.load_queue.dequeue() else {
                break;
            };
            self.tracker.dispatched().insert(pos);

            let tracker = Arc::clone(&self.tracker);
            let listener = Arc::clone(&self.listener);
            let dispatch = self.provider.load(pos, move |chunk| {
                tracker.complete(pos);
                listener.on_chunk_loaded(pos, &chunk);
            });

            if let Err(err) = dispatch {
                self.tracker.dispatched().remove(&pos);
                self.load_queue.enqueue(pos, dist_sq);
                tracing::debug!(x = pos.x, z = pos.z, error = %err, "chunk load not dispatched");
                return Err(err);
            }
            result.dispatched += 1;
        }
        Ok(())
    }

    fn drain_unloads(&mut self, result: &mut LoaderTickResult) {
        for _ in 0..self.config.chunks_per_tick {
            let Some(pos) = self.unload_queue.dequeue() else {
                break;
            };
            let chunk = self.provider.get(pos);
            self.listener.on_chunk_unloaded(pos, chunk.as_ref());
            self.tracker.resident().remove(&pos);
            result.unloaded += 1;
        }
    }

    /// Releases every resident chunk through the unload hook and clears all
    /// queued work. Loads already dispatched still complete, and the next
    /// sort will queue them for unload if they fall outside the disc.
    pub fn release_all(&mut self) -> usize {
        self.load_queue.clear();
        self.unload_queue.clear();
        let resident: Vec<ChunkPos> = self.tracker.resident().drain().collect();
        for &pos in &resident {
            let chunk = self.provider.get(pos);
            self.listener.on_chunk_unloaded(pos, chunk.as_ref());
        }
        resident.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
