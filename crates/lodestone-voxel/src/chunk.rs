//! Chunk column: up to 16 stacked segments plus per-column metadata.
//!
//! A [`Chunk`] is the unit of storage and streaming. Segments are
//! materialized lazily: [`Chunk::segment`] is a strict peek that never
//! allocates, while [`Chunk::segment_or_create`] allocates an air segment on
//! first access. Whole-chunk block reads go through the peek path and treat a
//! missing segment as air; writes go through get-or-create.
//!
//! Column-indexed arrays use two different orders:
//!
//! | Array | Index |
//! |-------|-------|
//! | height map | `(z << 4) \| x` |
//! | biomes | `(x << 4) \| z` |
//! | block tags | key `(y << 8) \| (x << 4) \| z` |

use std::fmt;
use std::sync::{Arc, RwLock};

use quartz_nbt::NbtCompound;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::observer::{ChunkEntity, Observer, ObserverId};
use crate::pos::ChunkPos;
use crate::segment::{SEGMENT_SIZE, Segment};

/// Number of segment slots in a chunk.
pub const SEGMENTS_PER_CHUNK: usize = 16;

/// Height of a chunk column in blocks.
pub const CHUNK_HEIGHT: usize = SEGMENTS_PER_CHUNK * SEGMENT_SIZE;

/// Number of columns (and height-map / biome entries) in a chunk.
pub const COLUMN_COUNT: usize = 256;

/// Height-map value of a column with no blocks. Occupied columns store
/// `highest y + 1`, which is always at least 1.
pub const HEIGHT_EMPTY: i16 = 0;

/// A chunk shared between the provider cache, loaders and dimensions.
pub type SharedChunk = Arc<RwLock<Chunk>>;

/// Errors from structural chunk mutation.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// A closed entity cannot be placed in a chunk.
    #[error("entity {0} is closed")]
    ClosedEntity(u64),
}

pub struct Chunk {
    pos: ChunkPos,
    segments: [Option<Box<Segment>>; SEGMENTS_PER_CHUNK],
    height_map: [i16; COLUMN_COUNT],
    biomes: [u8; COLUMN_COUNT],
    block_tags: FxHashMap<u16, NbtCompound>,
    entities: FxHashMap<u64, Arc<dyn ChunkEntity>>,
    observers: FxHashMap<ObserverId, Arc<dyn Observer>>,
    light_populated: bool,
    terrain_populated: bool,
    inhabited_time: i64,
    last_update: i64,
    /// Set by every mutation, cleared once the chunk has been persisted.
    dirty: bool,
}

impl Chunk {
    /// Creates an empty chunk. New chunks count as lit and populated.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            segments: Default::default(),
            height_map: [HEIGHT_EMPTY; COLUMN_COUNT],
            biomes: [0; COLUMN_COUNT],
            block_tags: FxHashMap::default(),
            entities: FxHashMap::default(),
            observers: FxHashMap::default(),
            light_populated: true,
            terrain_populated: true,
            inhabited_time: 0,
            last_update: 0,
            dirty: true,
        }
    }

    /// Wraps the chunk for sharing.
    pub fn into_shared(self) -> SharedChunk {
        Arc::new(RwLock::new(self))
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    // -- Segments -----------------------------------------------------------

    /// Returns the segment at `index` without materializing it.
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments[index].as_deref()
    }

    /// Mutable peek; never materializes.
    pub fn segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments[index].as_deref_mut()
    }

    /// Returns the segment at `index`, allocating an air segment if absent.
    pub fn segment_or_create(&mut self, index: usize) -> &mut Segment {
        self.segments[index].get_or_insert_with(|| Box::new(Segment::new()))
    }

    /// Replaces the segment at `index`. The height map is not touched.
    pub fn set_segment(&mut self, index: usize, segment: Segment) {
        self.segments[index] = Some(Box::new(segment));
        self.dirty = true;
    }

    /// Iterates materialized segments with their indices, bottom to top.
    pub fn segments(&self) -> impl Iterator<Item = (usize, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|s| (i, s)))
    }

    /// Number of materialized segments, empty ones included.
    pub fn materialized_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count()
    }

    /// Index of the highest segment that holds at least one block.
    pub fn highest_segment_index(&self) -> Option<usize> {
        (0..SEGMENTS_PER_CHUNK)
            .rev()
            .find(|&i| self.segments[i].as_ref().is_some_and(|s| !s.is_air()))
    }

    /// Segment count after dropping the empty segments at the top.
    ///
    /// Empty segments below a non-empty one are kept, so indices are stable.
    pub fn compacted_segment_count(&self) -> usize {
        self.highest_segment_index().map_or(0, |i| i + 1)
    }

    /// Drops every segment above the highest non-empty one.
    pub fn prune_empty_segments(&mut self) {
        let keep = self.compacted_segment_count();
        for slot in &mut self.segments[keep..] {
            *slot = None;
        }
    }

    // -- Blocks -------------------------------------------------------------

    pub fn block_id(&self, x: usize, y: usize, z: usize) -> u8 {
        self.segment(y >> 4)
            .map_or(0, |s| s.block_id(x, y & 15, z))
    }

    /// Sets a block id and keeps the column's height map current.
    pub fn set_block_id(&mut self, x: usize, y: usize, z: usize, id: u8) {
        self.segment_or_create(y >> 4).set_block_id(x, y & 15, z, id);
        self.dirty = true;

        let column = column_index(x, z);
        let top = (y + 1) as i16;
        if id != 0 {
            if top > self.height_map[column] {
                self.height_map[column] = top;
            }
        } else if top == self.height_map[column] {
            self.height_map[column] = self.compute_column_height(x, z);
        }
    }

    pub fn block_data(&self, x: usize, y: usize, z: usize) -> u8 {
        self.segment(y >> 4)
            .map_or(0, |s| s.block_data(x, y & 15, z))
    }

    pub fn set_block_data(&mut self, x: usize, y: usize, z: usize, value: u8) {
        self.segment_or_create(y >> 4)
            .set_block_data(x, y & 15, z, value);
        self.dirty = true;
    }

    pub fn block_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.segment(y >> 4)
            .map_or(0, |s| s.block_light(x, y & 15, z))
    }

    pub fn set_block_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        self.segment_or_create(y >> 4)
            .set_block_light(x, y & 15, z, level);
        self.dirty = true;
    }

    pub fn sky_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.segment(y >> 4)
            .map_or(0, |s| s.sky_light(x, y & 15, z))
    }

    pub fn set_sky_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        self.segment_or_create(y >> 4)
            .set_sky_light(x, y & 15, z, level);
        self.dirty = true;
    }

    /// Absolute y of the highest non-air block in column `(x, z)`.
    pub fn highest_block_y(&self, x: usize, z: usize) -> Option<usize> {
        (0..SEGMENTS_PER_CHUNK).rev().find_map(|i| {
            let seg = self.segments[i].as_deref()?;
            seg.highest_block_y(x, z).map(|y| i * SEGMENT_SIZE + y)
        })
    }

    // -- Height map ---------------------------------------------------------

    pub fn height_map(&self, x: usize, z: usize) -> i16 {
        self.height_map[column_index(x, z)]
    }

    pub fn set_height_map(&mut self, x: usize, z: usize, value: i16) {
        self.height_map[column_index(x, z)] = value;
    }

    /// Raw height map in `(z << 4) | x` order.
    pub fn height_map_values(&self) -> &[i16; COLUMN_COUNT] {
        &self.height_map
    }

    /// Scans the column top-down and returns `highest y + 1`, or
    /// [`HEIGHT_EMPTY`] for an all-air column. Does not store the result.
    pub fn compute_column_height(&self, x: usize, z: usize) -> i16 {
        self.highest_block_y(x, z)
            .map_or(HEIGHT_EMPTY, |y| (y + 1) as i16)
    }

    /// Recomputes and stores the height of one column.
    pub fn recalculate_column_height(&mut self, x: usize, z: usize) -> i16 {
        let height = self.compute_column_height(x, z);
        self.height_map[column_index(x, z)] = height;
        height
    }

    /// Recomputes every column of the height map.
    pub fn recalculate_height_map(&mut self) {
        for x in 0..16 {
            for z in 0..16 {
                self.recalculate_column_height(x, z);
            }
        }
    }

    // -- Biomes -------------------------------------------------------------

    pub fn biome(&self, x: usize, z: usize) -> u8 {
        self.biomes[(x << 4) | z]
    }

    pub fn set_biome(&mut self, x: usize, z: usize, biome: u8) {
        self.biomes[(x << 4) | z] = biome;
        self.dirty = true;
    }

    /// Raw biomes in `(x << 4) | z` order.
    pub fn biomes(&self) -> &[u8; COLUMN_COUNT] {
        &self.biomes
    }

    pub fn set_biomes(&mut self, biomes: [u8; COLUMN_COUNT]) {
        self.biomes = biomes;
        self.dirty = true;
    }

    // -- Flags and counters ---------------------------------------------------

    pub fn light_populated(&self) -> bool {
        self.light_populated
    }

    pub fn set_light_populated(&mut self, value: bool) {
        self.light_populated = value;
    }

    pub fn terrain_populated(&self) -> bool {
        self.terrain_populated
    }

    pub fn set_terrain_populated(&mut self, value: bool) {
        self.terrain_populated = value;
    }

    /// Ticks any player has spent in this chunk.
    pub fn inhabited_time(&self) -> i64 {
        self.inhabited_time
    }

    pub fn set_inhabited_time(&mut self, ticks: i64) {
        self.inhabited_time = ticks;
    }

    /// World tick of the last update.
    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn set_last_update(&mut self, tick: i64) {
        self.last_update = tick;
    }

    /// Whether the chunk changed since it was last loaded or persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    // -- Block tags -----------------------------------------------------------

    /// Attaches (`Some`) or detaches (`None`) auxiliary tag data for a block.
    pub fn set_block_tag(&mut self, x: usize, y: usize, z: usize, tag: Option<NbtCompound>) {
        let key = tag_key(x, y, z);
        match tag {
            Some(tag) => {
                self.block_tags.insert(key, tag);
            }
            None => {
                self.block_tags.remove(&key);
            }
        }
        self.dirty = true;
    }

    pub fn block_tag(&self, x: usize, y: usize, z: usize) -> Option<&NbtCompound> {
        self.block_tags.get(&tag_key(x, y, z))
    }

    pub fn remove_block_tag(&mut self, x: usize, y: usize, z: usize) -> Option<NbtCompound> {
        let removed = self.block_tags.remove(&tag_key(x, y, z));
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn has_block_tag(&self, x: usize, y: usize, z: usize) -> bool {
        self.block_tags.contains_key(&tag_key(x, y, z))
    }

    /// All tags keyed by `(y << 8) | (x << 4) | z`.
    pub fn block_tags(&self) -> impl Iterator<Item = (u16, &NbtCompound)> {
        self.block_tags.iter().map(|(&k, v)| (k, v))
    }

    pub(crate) fn insert_block_tag_raw(&mut self, key: u16, tag: NbtCompound) {
        self.block_tags.insert(key, tag);
    }

    // -- Entities -------------------------------------------------------------

    /// Adds an entity keyed by its runtime id.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::ClosedEntity`] if the entity is already closed.
    pub fn add_entity(&mut self, entity: Arc<dyn ChunkEntity>) -> Result<(), ChunkError> {
        if entity.is_closed() {
            return Err(ChunkError::ClosedEntity(entity.runtime_id()));
        }
        self.entities.insert(entity.runtime_id(), entity);
        Ok(())
    }

    pub fn remove_entity(&mut self, runtime_id: u64) -> Option<Arc<dyn ChunkEntity>> {
        self.entities.remove(&runtime_id)
    }

    pub fn entity(&self, runtime_id: u64) -> Option<&Arc<dyn ChunkEntity>> {
        self.entities.get(&runtime_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<dyn ChunkEntity>> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drops closed entities and returns how many were removed.
    pub fn remove_closed_entities(&mut self) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, e| !e.is_closed());
        before - self.entities.len()
    }

    // -- Observers ------------------------------------------------------------

    pub fn add_observer(&mut self, observer: Arc<dyn Observer>) {
        self.observers.insert(observer.id(), observer);
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn has_observer(&self, id: ObserverId) -> bool {
        self.observers.contains_key(&id)
    }

    pub fn observers(&self) -> impl Iterator<Item = &Arc<dyn Observer>> {
        self.observers.values()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("pos", &self.pos)
            .field("segments", &self.materialized_segment_count())
            .field("entities", &self.entities.len())
            .field("observers", &self.observers.len())
            .field("block_tags", &self.block_tags.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

#[inline]
fn column_index(x: usize, z: usize) -> usize {
    debug_assert!(x < 16 && z < 16);
    (z << 4) | x
}

#[inline]
fn tag_key(x: usize, y: usize, z: usize) -> u16 {
    debug_assert!(x < 16 && y < CHUNK_HEIGHT && z < 16);
    ((y << 8) | (x << 4) | z) as u16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
