//! A dimension: one chunk provider plus the block, entity and observer
//! bookkeeping that sits on top of it.
//!
//! Block writes go through the provider's async load path, so they apply as
//! soon as the owning chunk is resident. Every write marks its position for
//! a block update, delivered to observers on the next [`Dimension::tick`].

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::DVec3;
use lodestone_voxel::{
    BlockInstance, BlockPos, BlockRegistry, CHUNK_HEIGHT, Chunk, ChunkEntity, ChunkError, ChunkPos,
    Observer, ObserverId, SharedChunk,
};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::entity_ids::EntityIdAllocator;
use crate::generation::Generator;
use crate::provider::{ChunkProvider, ProviderError};

#[derive(Debug, Error)]
pub enum DimensionError {
    #[error("chunk {0} is not loaded")]
    ChunkNotLoaded(ChunkPos),
    #[error("block {id}:{data} is not registered")]
    UnregisteredBlock { id: u8, data: u8 },
    #[error("block y {0} is outside the column")]
    OutOfHeight(u32),
    #[error("no entity with runtime id {0}")]
    UnknownEntity(u64),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Counts from one [`Dimension::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DimensionTickResult {
    /// Block updates sent (one per position, regardless of observer count).
    pub block_updates: usize,
    /// Updates kept for a later tick because their chunk is not resident.
    pub deferred_updates: usize,
    pub entities_ticked: usize,
    pub entities_removed: usize,
}

type PendingUpdates = Arc<Mutex<FxHashSet<BlockPos>>>;

/// An entity and the chunk it was placed into, which stays fixed however
/// far the entity moves.
struct PlacedEntity {
    entity: Arc<dyn ChunkEntity>,
    chunk: ChunkPos,
}

pub struct Dimension {
    name: String,
    provider: Arc<ChunkProvider>,
    blocks: Arc<dyn BlockRegistry>,
    entity_ids: Arc<EntityIdAllocator>,
    observers: RwLock<FxHashMap<ObserverId, Arc<dyn Observer>>>,
    entities: RwLock<FxHashMap<u64, PlacedEntity>>,
    block_updates: PendingUpdates,
}

fn read(chunk: &SharedChunk) -> RwLockReadGuard<'_, Chunk> {
    chunk.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(chunk: &SharedChunk) -> RwLockWriteGuard<'_, Chunk> {
    chunk.write().unwrap_or_else(PoisonError::into_inner)
}

fn check_height(pos: BlockPos) -> Result<(), DimensionError> {
    if (pos.y as usize) < CHUNK_HEIGHT {
        Ok(())
    } else {
        Err(DimensionError::OutOfHeight(pos.y))
    }
}

/// Chunk column containing a world-space position.
fn chunk_at(position: DVec3) -> ChunkPos {
    ChunkPos::containing(position.x.floor() as i32, position.z.floor() as i32)
}

impl Dimension {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<ChunkProvider>,
        blocks: Arc<dyn BlockRegistry>,
        entity_ids: Arc<EntityIdAllocator>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            blocks,
            entity_ids,
            observers: RwLock::new(FxHashMap::default()),
            entities: RwLock::new(FxHashMap::default()),
            block_updates: Arc::new(Mutex::new(FxHashSet::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<ChunkProvider> {
        &self.provider
    }

    pub fn block_registry(&self) -> &Arc<dyn BlockRegistry> {
        &self.blocks
    }

    // -- Chunks ---------------------------------------------------------------

    pub fn chunk(&self, pos: ChunkPos) -> Option<SharedChunk> {
        self.provider.get(pos)
    }

    pub fn is_chunk_loaded(&self, pos: ChunkPos) -> bool {
        self.provider.is_loaded(pos)
    }

    pub fn load_chunk<F>(&self, pos: ChunkPos, callback: F) -> Result<(), DimensionError>
    where
        F: FnOnce(SharedChunk) + Send + 'static,
    {
        Ok(self.provider.load(pos, callback)?)
    }

    pub fn unload_chunk(&self, pos: ChunkPos) -> Option<SharedChunk> {
        self.provider.unload(pos)
    }

    pub fn set_generator(&self, generator: Arc<dyn Generator>) {
        self.provider.set_generator(generator);
    }

    pub fn generator(&self) -> Arc<dyn Generator> {
        self.provider.generator()
    }

    // -- Blocks ---------------------------------------------------------------

    /// Block at `pos` with its tag attached, if any.
    ///
    /// # Errors
    ///
    /// [`DimensionError::ChunkNotLoaded`] if the owning chunk is not resident,
    /// [`DimensionError::UnregisteredBlock`] if the stored pair has no
    /// registry entry.
    pub fn get_block_at(&self, pos: BlockPos) -> Result<BlockInstance, DimensionError> {
        check_height(pos)?;
        let chunk_pos = pos.chunk();
        let chunk = self
            .provider
            .get(chunk_pos)
            .ok_or(DimensionError::ChunkNotLoaded(chunk_pos))?;
        let chunk = read(&chunk);

        let (x, y, z) = pos.local();
        let (id, data) = (chunk.block_id(x, y, z), chunk.block_data(x, y, z));
        let mut block = self
            .blocks
            .get(id, data)
            .ok_or(DimensionError::UnregisteredBlock { id, data })?;
        if let Some(tag) = chunk.block_tag(x, y, z) {
            block.tag = Some(tag.clone());
        }
        Ok(block)
    }

    /// Writes `block` at `pos` once its chunk is resident, loading it if
    /// needed, and marks the position for a block update.
    pub fn set_block_at(&self, pos: BlockPos, block: BlockInstance) -> Result<(), DimensionError> {
        check_height(pos)?;
        let updates = Arc::clone(&self.block_updates);
        self.provider.load(pos.chunk(), move |chunk| {
            {
                let mut chunk = write(&chunk);
                let (x, y, z) = pos.local();
                chunk.set_block_id(x, y, z, block.id);
                chunk.set_block_data(x, y, z, block.data & 0x0F);
                chunk.set_block_tag(x, y, z, block.tag);
            }
            updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(pos);
        })?;
        Ok(())
    }

    pub fn mark_block_update(&self, pos: BlockPos) {
        self.updates().insert(pos);
    }

    pub fn has_block_updates(&self) -> bool {
        !self.updates().is_empty()
    }

    pub fn pending_block_updates(&self) -> usize {
        self.updates().len()
    }

    fn updates(&self) -> std::sync::MutexGuard<'_, FxHashSet<BlockPos>> {
        self.block_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -- Observers ------------------------------------------------------------

    /// Registers an observer with the dimension and attaches it to the chunk
    /// at `at` once that chunk is resident.
    pub fn add_observer(&self, observer: Arc<dyn Observer>, at: ChunkPos) -> Result<(), DimensionError> {
        let id = observer.id();
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&observer));

        let attached = self.provider.load(at, move |chunk| {
            write(&chunk).add_observer(observer);
        });
        if let Err(err) = attached {
            self.remove_observer(id);
            return Err(err.into());
        }
        tracing::debug!(dimension = %self.name, observer = id, "observer added");
        Ok(())
    }

    /// Unregisters an observer and detaches it from every resident chunk.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let removed = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        for pos in self.provider.loaded_positions() {
            if let Some(chunk) = self.provider.get(pos) {
                write(&chunk).remove_observer(id);
            }
        }
        removed
    }

    pub fn observer(&self, id: ObserverId) -> Option<Arc<dyn Observer>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -- Entities -------------------------------------------------------------

    /// Allocates a runtime id, builds the entity with it and places it in the
    /// chunk under its position once that chunk is resident.
    pub fn spawn_entity<F>(&self, make: F) -> Result<u64, DimensionError>
    where
        F: FnOnce(u64) -> Arc<dyn ChunkEntity>,
    {
        let id = self.entity_ids.next_id();
        let entity = make(id);
        if entity.is_closed() {
            return Err(ChunkError::ClosedEntity(id).into());
        }
        let chunk_pos = chunk_at(entity.position());
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                PlacedEntity {
                    entity: Arc::clone(&entity),
                    chunk: chunk_pos,
                },
            );

        let placed = self.provider.load(chunk_pos, move |chunk| {
            if let Err(err) = write(&chunk).add_entity(entity) {
                tracing::warn!(error = %err, "entity closed before placement");
            }
        });
        if let Err(err) = placed {
            self.entities
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(err.into());
        }
        tracing::debug!(dimension = %self.name, entity = id, chunk = %chunk_pos, "entity spawned");
        Ok(id)
    }

    /// Removes an entity from the dimension and from the chunk it was placed
    /// into, closing it first if it is still open.
    pub fn remove_entity(&self, runtime_id: u64) -> Result<Arc<dyn ChunkEntity>, DimensionError> {
        let PlacedEntity { entity, chunk } = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&runtime_id)
            .ok_or(DimensionError::UnknownEntity(runtime_id))?;
        if !entity.is_closed() {
            entity.close();
        }
        if let Some(chunk) = self.provider.get(chunk) {
            write(&chunk).remove_entity(runtime_id);
        }
        Ok(entity)
    }

    pub fn entity(&self, runtime_id: u64) -> Result<Arc<dyn ChunkEntity>, DimensionError> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&runtime_id)
            .map(|placed| Arc::clone(&placed.entity))
            .ok_or(DimensionError::UnknownEntity(runtime_id))
    }

    pub fn has_entity(&self, runtime_id: u64) -> bool {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&runtime_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -- Tick / lifecycle ------------------------------------------------------

    /// Delivers pending block updates and ticks entities, dropping closed ones.
    pub fn tick(&self) -> DimensionTickResult {
        let mut result = DimensionTickResult::default();
        self.deliver_block_updates(&mut result);

        let entities: Vec<(u64, Arc<dyn ChunkEntity>)> = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(&id, placed)| (id, Arc::clone(&placed.entity)))
            .collect();
        for (id, entity) in entities {
            if entity.is_closed() {
                if self.remove_entity(id).is_ok() {
                    result.entities_removed += 1;
                }
            } else {
                entity.tick();
                result.entities_ticked += 1;
            }
        }
        result
    }

    fn deliver_block_updates(&self, result: &mut DimensionTickResult) {
        let pending: Vec<BlockPos> = self.updates().drain().collect();
        if pending.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn Observer>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut deferred = Vec::new();
        for pos in pending {
            let Some(chunk) = self.provider.get(pos.chunk()) else {
                deferred.push(pos);
                continue;
            };
            let (x, y, z) = pos.local();
            let (id, data) = {
                let chunk = read(&chunk);
                (chunk.block_id(x, y, z), chunk.block_data(x, y, z))
            };
            let Some(runtime_id) = self.blocks.runtime_id(id, data) else {
                tracing::debug!(id, data, "dropping update for unregistered block");
                continue;
            };
            for observer in &observers {
                observer.send_block_update(pos, runtime_id, 0);
            }
            result.block_updates += 1;
        }

        result.deferred_updates = deferred.len();
        if !deferred.is_empty() {
            self.updates().extend(deferred);
        }
    }

    /// Persists modified chunks. Returns how many were written.
    pub fn save(&self) -> Result<usize, DimensionError> {
        Ok(self.provider.save()?)
    }

    /// Saves and releases the provider's region files.
    pub fn close(&self) -> Result<(), DimensionError> {
        tracing::info!(dimension = %self.name, "closing dimension");
        Ok(self.provider.close()?)
    }

    pub fn close_in_background(
        &self,
    ) -> Result<std::thread::JoinHandle<Result<(), ProviderError>>, DimensionError> {
        Ok(self.provider.close_in_background()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderConfig;
    use lodestone_voxel::BlockTable;
    use quartz_nbt::{NbtCompound, NbtTag};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct TestEntity {
        id: u64,
        position: Mutex<DVec3>,
        closed: AtomicBool,
        ticks: AtomicUsize,
    }

    impl TestEntity {
        fn at(id: u64, position: DVec3) -> Arc<Self> {
            Arc::new(Self {
                id,
                position: Mutex::new(position),
                closed: AtomicBool::new(false),
                ticks: AtomicUsize::new(0),
            })
        }

        fn move_to(&self, position: DVec3) {
            *self.position.lock().unwrap() = position;
        }
    }

    impl ChunkEntity for TestEntity {
        fn runtime_id(&self) -> u64 {
            self.id
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn position(&self) -> DVec3 {
            *self.position.lock().unwrap()
        }
        fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        id: ObserverId,
        updates: Mutex<Vec<(BlockPos, u32, u32)>>,
    }

    impl Observer for RecordingObserver {
        fn id(&self) -> ObserverId {
            self.id
        }
        fn send_block_update(&self, pos: BlockPos, runtime_id: u32, layer: u32) {
            self.updates.lock().unwrap().push((pos, runtime_id, layer));
        }
    }

    fn dimension_with(provider: ChunkProvider) -> Dimension {
        Dimension::new(
            "overworld",
            Arc::new(provider),
            Arc::new(BlockTable::with_defaults()),
            Arc::new(EntityIdAllocator::new()),
        )
    }

    fn memory_dimension() -> Dimension {
        dimension_with(
            ChunkProvider::new(ProviderConfig {
                worker_threads: 1,
                ..ProviderConfig::default()
            })
            .unwrap(),
        )
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_get_block_requires_resident_chunk() {
        let dim = memory_dimension();
        let err = dim.get_block_at(BlockPos::new(-20, 3, 40)).unwrap_err();
        assert!(matches!(err, DimensionError::ChunkNotLoaded(pos) if pos == ChunkPos::new(-2, 2)));
    }

    #[test]
    fn test_get_block_reads_flat_terrain() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::new(-1, 0));

        assert_eq!(dim.get_block_at(BlockPos::new(-3, 0, 5)).unwrap(), BlockInstance::new(7, 0));
        assert_eq!(dim.get_block_at(BlockPos::new(-16, 4, 15)).unwrap(), BlockInstance::new(2, 0));
        assert_eq!(dim.get_block_at(BlockPos::new(-1, 200, 0)).unwrap(), BlockInstance::new(0, 0));
        assert!(matches!(
            dim.get_block_at(BlockPos::new(0, 256, 0)),
            Err(DimensionError::OutOfHeight(256))
        ));
    }

    #[test]
    fn test_unregistered_block_is_reported() {
        let dim = memory_dimension();
        let chunk = dim.provider().generate_chunk(ChunkPos::ORIGIN);
        write(&chunk).set_block_id(1, 10, 1, 99);

        assert!(matches!(
            dim.get_block_at(BlockPos::new(1, 10, 1)),
            Err(DimensionError::UnregisteredBlock { id: 99, data: 0 })
        ));
    }

    #[test]
    fn test_set_block_attaches_tag_and_delivers_update() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::ORIGIN);
        let observer = Arc::new(RecordingObserver {
            id: 7,
            ..Default::default()
        });
        dim.add_observer(observer.clone(), ChunkPos::ORIGIN).unwrap();

        let mut tag = NbtCompound::new();
        tag.insert("id", NbtTag::String("Sign".to_string()));
        let pos = BlockPos::new(2, 10, 3);
        dim.set_block_at(pos, BlockInstance::new(1, 2).with_tag(tag.clone()))
            .unwrap();

        let block = dim.get_block_at(pos).unwrap();
        assert_eq!((block.id, block.data), (1, 2));
        assert_eq!(block.tag, Some(tag));
        assert_eq!(dim.pending_block_updates(), 1);

        let result = dim.tick();
        assert_eq!(result.block_updates, 1);
        assert!(!dim.has_block_updates());
        // stone runtime base 16, data 2
        assert_eq!(*observer.updates.lock().unwrap(), vec![(pos, 18, 0)]);
        assert!(read(&dim.chunk(ChunkPos::ORIGIN).unwrap()).has_observer(7));
    }

    #[test]
    fn test_set_block_loads_missing_chunk() {
        let dim = memory_dimension();
        let pos = BlockPos::new(100, 64, -100);
        dim.set_block_at(pos, BlockInstance::new(3, 0)).unwrap();

        wait_until(|| dim.has_block_updates());
        assert!(dim.is_chunk_loaded(pos.chunk()));
        assert_eq!(dim.get_block_at(pos).unwrap().id, 3);
    }

    #[test]
    fn test_update_for_unloaded_chunk_is_deferred() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::ORIGIN);
        let pos = BlockPos::new(0, 5, 0);
        dim.set_block_at(pos, BlockInstance::new(1, 0)).unwrap();
        dim.unload_chunk(ChunkPos::ORIGIN);

        let result = dim.tick();
        assert_eq!(result.block_updates, 0);
        assert_eq!(result.deferred_updates, 1);
        assert_eq!(dim.pending_block_updates(), 1);
    }

    #[test]
    fn test_spawn_tick_and_remove_entities() {
        let dim = memory_dimension();
        let home = ChunkPos::new(1, -1);
        dim.provider().generate_chunk(home);

        let id = dim
            .spawn_entity(|id| TestEntity::at(id, DVec3::new(20.5, 5.0, -3.2)))
            .unwrap();
        assert_eq!(id, 1);
        assert!(dim.has_entity(id));
        assert_eq!(read(&dim.chunk(home).unwrap()).entity_count(), 1);

        let other = dim
            .spawn_entity(|id| TestEntity::at(id, DVec3::new(17.0, 5.0, -1.0)))
            .unwrap();
        assert_eq!(other, 2);

        let result = dim.tick();
        assert_eq!(result.entities_ticked, 2);

        dim.entity(id).unwrap().close();
        let result = dim.tick();
        assert_eq!(result.entities_removed, 1);
        assert_eq!(result.entities_ticked, 1);
        assert!(matches!(dim.entity(id), Err(DimensionError::UnknownEntity(1))));
        assert_eq!(read(&dim.chunk(home).unwrap()).entity_count(), 1);
    }

    #[test]
    fn test_remove_entity_closes_it() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::ORIGIN);
        let id = dim
            .spawn_entity(|id| TestEntity::at(id, DVec3::new(1.0, 1.0, 1.0)))
            .unwrap();

        let removed = dim.remove_entity(id).unwrap();
        assert!(removed.is_closed());
        assert_eq!(dim.entity_count(), 0);
        assert!(matches!(dim.remove_entity(id), Err(DimensionError::UnknownEntity(_))));
    }

    #[test]
    fn test_entity_leaves_its_spawn_chunk_after_moving() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::ORIGIN);
        let spawned = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&spawned);
        let id = dim
            .spawn_entity(move |id| {
                let entity = TestEntity::at(id, DVec3::new(1.0, 5.0, 1.0));
                *slot.lock().unwrap() = Some(Arc::clone(&entity));
                entity
            })
            .unwrap();
        let entity = spawned.lock().unwrap().take().unwrap();
        assert_eq!(read(&dim.chunk(ChunkPos::ORIGIN).unwrap()).entity_count(), 1);

        // Now over chunk (1, 0), which is not even resident.
        entity.move_to(DVec3::new(20.0, 5.0, 1.0));
        entity.close();
        let result = dim.tick();
        assert_eq!(result.entities_removed, 1);
        assert!(!dim.has_entity(id));
        assert_eq!(read(&dim.chunk(ChunkPos::ORIGIN).unwrap()).entity_count(), 0);
    }

    #[test]
    fn test_block_data_is_masked_to_a_nibble() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::ORIGIN);
        let pos = BlockPos::new(4, 20, 4);
        let mut block = BlockInstance::new(1, 0);
        block.data = 0x12;
        dim.set_block_at(pos, block).unwrap();

        let chunk = dim.chunk(ChunkPos::ORIGIN).unwrap();
        assert_eq!(read(&chunk).block_data(4, 20, 4), 2);
    }

    #[test]
    fn test_closed_entity_is_not_spawned() {
        let dim = memory_dimension();
        let err = dim
            .spawn_entity(|id| {
                let entity = TestEntity::at(id, DVec3::ZERO);
                entity.close();
                entity
            })
            .unwrap_err();
        assert!(matches!(err, DimensionError::Chunk(ChunkError::ClosedEntity(1))));
        assert_eq!(dim.entity_count(), 0);
    }

    #[test]
    fn test_remove_observer_detaches_from_chunks() {
        let dim = memory_dimension();
        dim.provider().generate_chunk(ChunkPos::ORIGIN);
        let observer = Arc::new(RecordingObserver {
            id: 3,
            ..Default::default()
        });
        dim.add_observer(observer, ChunkPos::ORIGIN).unwrap();
        assert_eq!(dim.observer_count(), 1);

        assert!(dim.remove_observer(3));
        assert!(!dim.remove_observer(3));
        assert!(dim.observer(3).is_none());
        assert!(!read(&dim.chunk(ChunkPos::ORIGIN).unwrap()).has_observer(3));
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProviderConfig {
            worker_threads: 1,
            ..ProviderConfig::with_region_dir(dir.path())
        };
        let pos = BlockPos::new(-5, 30, 70);
        {
            let dim = dimension_with(ChunkProvider::new(config.clone()).unwrap());
            dim.provider().generate_chunk(pos.chunk());
            dim.set_block_at(pos, BlockInstance::new(1, 0)).unwrap();
            assert!(dim.save().unwrap() >= 1);
            dim.close().unwrap();
        }

        let dim = dimension_with(ChunkProvider::new(config).unwrap());
        let (tx, rx) = crossbeam_channel::bounded(1);
        dim.load_chunk(pos.chunk(), move |chunk| {
            tx.send(chunk).unwrap();
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(dim.get_block_at(pos).unwrap().id, 1);
        assert_eq!(dim.provider().stats().read_from_storage, 1);
    }
}
