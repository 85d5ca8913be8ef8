//! Chunk provider: resident cache plus asynchronous load-or-generate.
//!
//! Misses are pushed onto a bounded request queue drained by a fixed pool of
//! named worker threads. Each worker reads the owning region (opening it on
//! first use), decodes the payload and falls back to the bound generator when
//! the chunk was never stored or fails to decode.
//!
//! At most one resolution is in flight per coordinate. The first request for
//! a missing coordinate registers itself in the in-flight table and enqueues
//! work; later requests only append their callback to that entry. A worker
//! that pops a coordinate which became resident in the meantime completes it
//! straight from the cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lodestone_region::{Compression, RegionError, RegionFile, RegionPos};
use lodestone_voxel::{Chunk, ChunkDecodeError, ChunkPos, SharedChunk, decode_payload};
use quartz_nbt::io::NbtIoError;
use thiserror::Error;

use crate::generation::{FlatGenerator, Generator};

/// Default request queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Completion callback for [`ChunkProvider::load`].
pub type LoadCallback = Box<dyn FnOnce(SharedChunk) + Send>;

// ---------------------------------------------------------------------------
// Config / errors / stats
// ---------------------------------------------------------------------------

/// Construction parameters for a [`ChunkProvider`].
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Directory holding `r.<x>.<z>.mca` files. `None` keeps chunks in memory only.
    pub region_dir: Option<PathBuf>,
    /// Bound of the request queue.
    pub queue_capacity: usize,
    /// Worker thread count, 0 picks one from the CPU count.
    pub worker_threads: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region_dir: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_threads: 0,
        }
    }
}

impl ProviderConfig {
    /// Region-backed configuration with default queue and pool sizes.
    pub fn with_region_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            region_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    fn resolved_workers(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            num_cpus::get().saturating_sub(1).max(1)
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The bounded request queue is at capacity.
    #[error("chunk request queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("stored chunk could not be decoded: {0}")]
    Decode(#[from] ChunkDecodeError),

    #[error("chunk {pos} could not be encoded: {source}")]
    Encode {
        pos: ChunkPos,
        #[source]
        source: NbtIoError,
    },

    #[error("failed to spawn provider thread: {0}")]
    Spawn(std::io::Error),

    /// The provider was closed.
    #[error("chunk provider is closed")]
    Closed,
}

/// Counters describing provider activity since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub generated: u64,
    pub read_from_storage: u64,
    pub decode_fallbacks: u64,
    pub loaded: usize,
    pub in_flight: usize,
    pub open_regions: usize,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    chunks: DashMap<ChunkPos, SharedChunk>,
    in_flight: DashMap<ChunkPos, Mutex<Vec<LoadCallback>>>,
    regions: DashMap<RegionPos, Arc<Mutex<RegionFile>>>,
    region_dir: Option<PathBuf>,
    generator: RwLock<Arc<dyn Generator>>,
    /// Set when closing starts. Rejects new loads and saves.
    closed: AtomicBool,
    /// Set once close has saved. No region handle is opened after this.
    released: AtomicBool,
    generated: AtomicU64,
    read_from_storage: AtomicU64,
    decode_fallbacks: AtomicU64,
}

impl Shared {
    fn cached(&self, pos: ChunkPos) -> Option<SharedChunk> {
        self.chunks.get(&pos).map(|entry| Arc::clone(entry.value()))
    }

    fn generator(&self) -> Arc<dyn Generator> {
        Arc::clone(&self.generator.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn generate(&self, pos: ChunkPos) -> Chunk {
        let chunk = self.generator().generate_new_chunk(pos);
        self.generated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(x = pos.x, z = pos.z, "generated chunk");
        chunk
    }

    /// Works out a chunk for `pos` and completes every waiting callback.
    fn resolve(&self, pos: ChunkPos) {
        let chunk = match self.cached(pos) {
            Some(chunk) => chunk,
            None => {
                let chunk = self.read_or_generate(pos);
                Arc::clone(
                    self.chunks
                        .entry(pos)
                        .or_insert_with(|| chunk.into_shared())
                        .value(),
                )
            }
        };

        let callbacks = self
            .in_flight
            .remove(&pos)
            .map(|(_, callbacks)| callbacks.into_inner().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or_default();
        for callback in callbacks {
            callback(Arc::clone(&chunk));
        }
    }

    fn read_or_generate(&self, pos: ChunkPos) -> Chunk {
        match self.read_stored(pos) {
            Ok(Some(chunk)) => {
                self.read_from_storage.fetch_add(1, Ordering::Relaxed);
                chunk
            }
            Ok(None) => self.generate(pos),
            // Queued before close finished; the region files are gone.
            Err(ProviderError::Closed) => self.generate(pos),
            Err(err) => {
                tracing::warn!(x = pos.x, z = pos.z, error = %err, "stored chunk unusable, generating");
                self.decode_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.generate(pos)
            }
        }
    }

    fn read_stored(&self, pos: ChunkPos) -> Result<Option<Chunk>, ProviderError> {
        let Some(dir) = self.region_dir.as_deref() else {
            return Ok(None);
        };
        let region = self.region(dir, RegionPos::of_chunk(pos.x, pos.z))?;
        let bytes = region
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_decompressed(pos.x, pos.z)?;
        match bytes {
            Some(bytes) => Ok(Some(decode_payload(pos, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the open region, opening or creating its file on first use.
    ///
    /// Fails with [`ProviderError::Closed`] once the handles were released.
    fn region(&self, dir: &Path, pos: RegionPos) -> Result<Arc<Mutex<RegionFile>>, ProviderError> {
        // Checked under the shard lock, so close cannot miss an insert.
        let entry = self.regions.entry(pos).or_try_insert_with(|| {
            if self.released.load(Ordering::SeqCst) {
                return Err(ProviderError::Closed);
            }
            std::fs::create_dir_all(dir).map_err(RegionError::from)?;
            let region = RegionFile::open(dir.join(pos.file_name()))?;
            Ok(Arc::new(Mutex::new(region)))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Writes one chunk into its region. The region header is not rewritten.
    fn persist(&self, dir: &Path, pos: ChunkPos, chunk: &SharedChunk) -> Result<(), ProviderError> {
        // Encode and clear the flag under one lock; a later write re-dirties.
        let bytes = {
            let mut guard = chunk.write().unwrap_or_else(PoisonError::into_inner);
            let bytes = guard
                .encode_storage()
                .map_err(|source| ProviderError::Encode { pos, source })?;
            guard.mark_clean();
            bytes
        };
        let written = self.region(dir, RegionPos::of_chunk(pos.x, pos.z)).and_then(|region| {
            region
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_compressed(pos.x, pos.z, &bytes, Compression::Zlib)
                .map_err(ProviderError::from)
        });
        if written.is_err() {
            chunk
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .mark_dirty();
        }
        written
    }

    fn save(&self) -> Result<usize, ProviderError> {
        let Some(dir) = self.region_dir.as_deref() else {
            return Ok(0);
        };

        // Snapshot so no map shard stays locked during I/O.
        let resident: Vec<(ChunkPos, SharedChunk)> = self
            .chunks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut written = 0;
        for (pos, chunk) in resident {
            let dirty = chunk
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_dirty();
            if dirty {
                self.persist(dir, pos, &chunk)?;
                written += 1;
            }
        }

        let regions: Vec<Arc<Mutex<RegionFile>>> = self
            .regions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for region in &regions {
            region.lock().unwrap_or_else(PoisonError::into_inner).save()?;
        }

        tracing::info!(chunks = written, regions = regions.len(), "saved world");
        Ok(written)
    }

    fn close(&self) -> Result<(), ProviderError> {
        if self.released.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);
        self.save()?;
        self.released.store(true, Ordering::SeqCst);

        let keys: Vec<RegionPos> = self.regions.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            let Some((_, region)) = self.regions.remove(&key) else {
                continue;
            };
            // A worker may still hold a clone, in which case the save above stands.
            if let Ok(region) = Arc::try_unwrap(region) {
                region.into_inner().unwrap_or_else(PoisonError::into_inner).close()?;
            }
        }
        tracing::info!("chunk provider closed");
        Ok(())
    }
}

fn run_worker(shared: Arc<Shared>, requests: Receiver<ChunkPos>) {
    while let Ok(pos) = requests.recv() {
        shared.resolve(pos);
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Resolves chunk existence for a dimension.
pub struct ChunkProvider {
    shared: Arc<Shared>,
    requests: Sender<ChunkPos>,
    capacity: usize,
    workers: usize,
}

impl ChunkProvider {
    /// Starts a provider and its worker pool. The flat generator is bound
    /// until [`ChunkProvider::set_generator`] is called.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let capacity = config.queue_capacity.max(1);
        let workers = config.resolved_workers();
        let (requests, receiver) = bounded::<ChunkPos>(capacity);

        let shared = Arc::new(Shared {
            chunks: DashMap::new(),
            in_flight: DashMap::new(),
            regions: DashMap::new(),
            region_dir: config.region_dir,
            generator: RwLock::new(Arc::new(FlatGenerator)),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            generated: AtomicU64::new(0),
            read_from_storage: AtomicU64::new(0),
            decode_fallbacks: AtomicU64::new(0),
        });

        for index in 0..workers {
            let shared = Arc::clone(&shared);
            let receiver = receiver.clone();
            std::thread::Builder::new()
                .name(format!("chunk-resolver-{index}"))
                .spawn(move || run_worker(shared, receiver))
                .map_err(ProviderError::Spawn)?;
        }

        tracing::info!(
            workers,
            capacity,
            region_dir = ?shared.region_dir,
            "chunk provider started"
        );
        Ok(Self {
            shared,
            requests,
            capacity,
            workers,
        })
    }

    /// In-memory provider: misses always generate and nothing is persisted.
    pub fn memory() -> Result<Self, ProviderError> {
        Self::new(ProviderConfig::default())
    }

    pub fn with_generator(self, generator: Arc<dyn Generator>) -> Self {
        self.set_generator(generator);
        self
    }

    /// Returns the resident chunk, never blocking and never loading.
    pub fn get(&self, pos: ChunkPos) -> Option<SharedChunk> {
        self.shared.cached(pos)
    }

    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.shared.chunks.contains_key(&pos)
    }

    pub fn loaded_count(&self) -> usize {
        self.shared.chunks.len()
    }

    pub fn loaded_positions(&self) -> Vec<ChunkPos> {
        self.shared.chunks.iter().map(|entry| *entry.key()).collect()
    }

    /// Requests a chunk.
    ///
    /// A resident chunk is handed to `callback` before this returns. A miss
    /// queues a resolution and returns immediately; `callback` then runs on a
    /// worker thread once the chunk is read or generated.
    ///
    /// # Errors
    ///
    /// [`ProviderError::QueueFull`] when the request queue is at capacity,
    /// [`ProviderError::Closed`] after [`ChunkProvider::close`].
    pub fn load<F>(&self, pos: ChunkPos, callback: F) -> Result<(), ProviderError>
    where
        F: FnOnce(SharedChunk) + Send + 'static,
    {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed);
        }
        if let Some(chunk) = self.shared.cached(pos) {
            callback(chunk);
            return Ok(());
        }

        match self.shared.in_flight.entry(pos) {
            Entry::Occupied(mut waiting) => {
                waiting
                    .get_mut()
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Box::new(callback));
                Ok(())
            }
            Entry::Vacant(slot) => match self.requests.try_send(pos) {
                // The worker cannot complete this request before the entry
                // exists, it needs this shard to remove it.
                Ok(()) => {
                    slot.insert(Mutex::new(vec![Box::new(callback)]));
                    Ok(())
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(x = pos.x, z = pos.z, capacity = self.capacity, "chunk request queue full");
                    Err(ProviderError::QueueFull {
                        capacity: self.capacity,
                    })
                }
                Err(TrySendError::Disconnected(_)) => Err(ProviderError::Closed),
            },
        }
    }

    /// Removes a chunk from the cache without persisting it.
    pub fn unload(&self, pos: ChunkPos) -> Option<SharedChunk> {
        self.shared.chunks.remove(&pos).map(|(_, chunk)| chunk)
    }

    /// Caches `chunk` under its own position, replacing any resident one.
    pub fn set_chunk(&self, chunk: Chunk) -> SharedChunk {
        let pos = chunk.pos();
        let shared = chunk.into_shared();
        self.shared.chunks.insert(pos, Arc::clone(&shared));
        shared
    }

    /// Generates a chunk synchronously and caches it, replacing any resident one.
    pub fn generate_chunk(&self, pos: ChunkPos) -> SharedChunk {
        let chunk = self.shared.generate(pos);
        self.set_chunk(chunk)
    }

    pub fn set_generator(&self, generator: Arc<dyn Generator>) {
        tracing::debug!(generator = generator.name(), "bound generator");
        *self
            .shared
            .generator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = generator;
    }

    pub fn generator(&self) -> Arc<dyn Generator> {
        self.shared.generator()
    }

    /// Persists one resident chunk. Returns `false` if it is not resident or
    /// the provider has no region directory.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Closed`] after [`ChunkProvider::close`].
    pub fn save_chunk(&self, pos: ChunkPos) -> Result<bool, ProviderError> {
        if self.is_closed() {
            return Err(ProviderError::Closed);
        }
        let (Some(dir), Some(chunk)) = (self.shared.region_dir.as_deref(), self.get(pos)) else {
            return Ok(false);
        };
        self.shared.persist(dir, pos, &chunk)?;
        Ok(true)
    }

    /// Persists every modified resident chunk, then compacts every open
    /// region and rewrites its header. Returns the number of chunks written.
    pub fn save(&self) -> Result<usize, ProviderError> {
        if self.is_closed() {
            return Err(ProviderError::Closed);
        }
        self.shared.save()
    }

    /// Saves, then releases every region handle. Later loads and saves fail
    /// with [`ProviderError::Closed`], and loads still queued generate
    /// without touching region files. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), ProviderError> {
        self.shared.close()
    }

    /// Like [`ChunkProvider::close`] but runs on a spawned thread.
    pub fn close_in_background(&self) -> Result<JoinHandle<Result<(), ProviderError>>, ProviderError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("chunk-provider-close".into())
            .spawn(move || shared.close())
            .map_err(ProviderError::Spawn)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            generated: self.shared.generated.load(Ordering::Relaxed),
            read_from_storage: self.shared.read_from_storage.load(Ordering::Relaxed),
            decode_fallbacks: self.shared.decode_fallbacks.load(Ordering::Relaxed),
            loaded: self.shared.chunks.len(),
            in_flight: self.shared.in_flight.len(),
            open_regions: self.shared.regions.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Counts generations and optionally blocks each one until released.
    struct GatedGenerator {
        calls: AtomicUsize,
        entered: Sender<ChunkPos>,
        release: Receiver<()>,
        gated: bool,
    }

    impl GatedGenerator {
        fn new(gated: bool) -> (Arc<Self>, Receiver<ChunkPos>, Sender<()>) {
            let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
            let (release_tx, release_rx) = crossbeam_channel::unbounded();
            let generator = Arc::new(Self {
                calls: AtomicUsize::new(0),
                entered: entered_tx,
                release: release_rx,
                gated,
            });
            (generator, entered_rx, release_tx)
        }
    }

    impl Generator for GatedGenerator {
        fn name(&self) -> &str {
            "Gated"
        }

        fn generate_new_chunk(&self, pos: ChunkPos) -> Chunk {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(pos);
            if self.gated {
                let _ = self.release.recv_timeout(TIMEOUT);
            }
            FlatGenerator.generate_new_chunk(pos)
        }
    }

    fn memory_provider(workers: usize, capacity: usize) -> ChunkProvider {
        ChunkProvider::new(ProviderConfig {
            region_dir: None,
            queue_capacity: capacity,
            worker_threads: workers,
        })
        .unwrap()
    }

    fn load_blocking(provider: &ChunkProvider, pos: ChunkPos) -> SharedChunk {
        let (tx, rx) = crossbeam_channel::bounded(1);
        provider
            .load(pos, move |chunk| {
                let _ = tx.send(chunk);
            })
            .unwrap();
        rx.recv_timeout(TIMEOUT).unwrap()
    }

    #[test]
    fn test_get_never_loads() {
        let provider = memory_provider(1, 16);
        assert!(provider.get(ChunkPos::new(1, 1)).is_none());
        assert_eq!(provider.loaded_count(), 0);
    }

    #[test]
    fn test_miss_resolves_asynchronously() {
        let provider = memory_provider(2, 16);
        let chunk = load_blocking(&provider, ChunkPos::new(3, -2));
        assert_eq!(chunk.read().unwrap().pos(), ChunkPos::new(3, -2));
        assert!(provider.is_loaded(ChunkPos::new(3, -2)));
        assert_eq!(provider.stats().generated, 1);
        assert_eq!(provider.stats().in_flight, 0);
    }

    #[test]
    fn test_hit_completes_synchronously() {
        let provider = memory_provider(1, 16);
        provider.generate_chunk(ChunkPos::ORIGIN);

        let hit = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&hit);
        provider
            .load(ChunkPos::ORIGIN, move |_| flag.store(true, Ordering::SeqCst))
            .unwrap();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_loads_resolve_once() {
        let provider = memory_provider(2, 16);
        let (generator, entered, release) = GatedGenerator::new(true);
        provider.set_generator(generator.clone());

        let pos = ChunkPos::new(9, 9);
        let (tx, rx) = crossbeam_channel::unbounded();
        let tx2 = tx.clone();
        provider.load(pos, move |c| tx.send(c).unwrap()).unwrap();
        entered.recv_timeout(TIMEOUT).unwrap();

        // Resolution is parked inside the generator.
        provider.load(pos, move |c| tx2.send(c).unwrap()).unwrap();
        release.send(()).unwrap();

        let a = rx.recv_timeout(TIMEOUT).unwrap();
        let b = rx.recv_timeout(TIMEOUT).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_full_is_reported() {
        let provider = memory_provider(1, 1);
        let (generator, entered, release) = GatedGenerator::new(true);
        provider.set_generator(generator);

        provider.load(ChunkPos::new(0, 0), |_| {}).unwrap();
        entered.recv_timeout(TIMEOUT).unwrap();
        // The single worker is busy, this request fills the queue.
        provider.load(ChunkPos::new(1, 0), |_| {}).unwrap();

        let result = provider.load(ChunkPos::new(2, 0), |_| {});
        assert!(matches!(result, Err(ProviderError::QueueFull { capacity: 1 })));

        release.send(()).unwrap();
        assert_eq!(entered.recv_timeout(TIMEOUT).unwrap(), ChunkPos::new(1, 0));
        release.send(()).unwrap();
        release.send(()).unwrap();
        // The queue is drained and the rejected coordinate left no in-flight
        // entry behind.
        let chunk = load_blocking(&provider, ChunkPos::new(2, 0));
        assert_eq!(chunk.read().unwrap().pos(), ChunkPos::new(2, 0));
    }

    #[test]
    fn test_unload_does_not_persist() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
        let pos = ChunkPos::new(1, 2);

        let chunk = provider.generate_chunk(pos);
        chunk.write().unwrap().set_block_id(0, 100, 0, 1);
        assert!(provider.unload(pos).is_some());
        assert!(!provider.is_loaded(pos));

        let reloaded = load_blocking(&provider, pos);
        assert_eq!(reloaded.read().unwrap().block_id(0, 100, 0), 0);
        assert_eq!(provider.stats().read_from_storage, 0);
    }

    #[test]
    fn test_saved_chunks_load_from_storage() {
        let dir = tempfile::tempdir().unwrap();
        let pos = ChunkPos::new(-40, 7);
        {
            let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
            let chunk = provider.generate_chunk(pos);
            chunk.write().unwrap().set_block_id(8, 90, 8, 42);
            assert_eq!(provider.save().unwrap(), 1);
            assert!(!chunk.read().unwrap().is_dirty());
            // Clean chunks are skipped on the next save.
            assert_eq!(provider.save().unwrap(), 0);
            provider.close().unwrap();
        }
        assert!(dir.path().join("r.-2.0.mca").exists());

        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
        let chunk = load_blocking(&provider, pos);
        let chunk = chunk.read().unwrap();
        assert_eq!(chunk.block_id(8, 90, 8), 42);
        assert_eq!(chunk.block_id(0, 0, 0), 7);
        let stats = provider.stats();
        assert_eq!(stats.read_from_storage, 1);
        assert_eq!(stats.generated, 0);
    }

    #[test]
    fn test_corrupt_payload_falls_back_to_generator() {
        let dir = tempfile::tempdir().unwrap();
        let pos = ChunkPos::new(2, 3);
        {
            let mut region = RegionFile::open(dir.path().join("r.0.0.mca")).unwrap();
            region
                .write_compressed(pos.x, pos.z, b"definitely not a chunk", Compression::Zlib)
                .unwrap();
            region.close().unwrap();
        }

        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
        let chunk = load_blocking(&provider, pos);
        assert_eq!(chunk.read().unwrap().block_id(0, 4, 0), 2);
        let stats = provider.stats();
        assert_eq!(stats.decode_fallbacks, 1);
        assert_eq!(stats.generated, 1);
    }

    #[test]
    fn test_save_chunk() {
        let memory = memory_provider(1, 4);
        memory.generate_chunk(ChunkPos::ORIGIN);
        assert!(!memory.save_chunk(ChunkPos::ORIGIN).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
        assert!(!provider.save_chunk(ChunkPos::ORIGIN).unwrap());
        provider.generate_chunk(ChunkPos::ORIGIN);
        assert!(provider.save_chunk(ChunkPos::ORIGIN).unwrap());
        assert_eq!(provider.stats().open_regions, 1);
    }

    #[test]
    fn test_close_in_background_rejects_new_loads() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
        provider.generate_chunk(ChunkPos::new(5, 5));

        let handle = provider.close_in_background().unwrap();
        assert!(provider.is_closed());
        assert!(matches!(
            provider.load(ChunkPos::new(6, 6), |_| {}),
            Err(ProviderError::Closed)
        ));
        handle.join().unwrap().unwrap();
        assert!(dir.path().join("r.0.0.mca").exists());
        assert_eq!(provider.stats().open_regions, 0);
    }

    #[test]
    fn test_provider_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChunkProvider>();
        assert_send_sync::<Arc<Shared>>();
    }

    #[test]
    fn test_close_releases_regions_for_good() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ChunkProvider::new(ProviderConfig {
            region_dir: Some(dir.path().to_path_buf()),
            queue_capacity: 16,
            worker_threads: 1,
        })
        .unwrap();
        let (generator, entered, release) = GatedGenerator::new(true);
        provider.set_generator(generator);

        provider.load(ChunkPos::new(0, 0), |_| {}).unwrap();
        entered.recv_timeout(TIMEOUT).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        provider
            .load(ChunkPos::new(100, 100), move |chunk| {
                let _ = tx.send(chunk);
            })
            .unwrap();

        provider.close().unwrap();
        assert_eq!(provider.stats().open_regions, 0);

        // The queued coordinate still resolves, from the generator only.
        release.send(()).unwrap();
        release.send(()).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(provider.stats().open_regions, 0);
        assert!(!dir.path().join("r.3.3.mca").exists());

        assert!(matches!(provider.save_chunk(ChunkPos::new(100, 100)), Err(ProviderError::Closed)));
        assert!(matches!(provider.save(), Err(ProviderError::Closed)));
        assert_eq!(provider.stats().open_regions, 0);
        provider.close().unwrap();
    }

    #[test]
    fn test_failed_persist_keeps_chunk_dirty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A plain file where the region directory should be.
        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(file.path())).unwrap();
        let chunk = provider.generate_chunk(ChunkPos::ORIGIN);
        assert!(provider.save_chunk(ChunkPos::ORIGIN).is_err());
        assert!(chunk.read().unwrap().is_dirty());
    }

    #[test]
    fn test_write_after_save_is_saved_again() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ChunkProvider::new(ProviderConfig::with_region_dir(dir.path())).unwrap();
        let chunk = provider.generate_chunk(ChunkPos::ORIGIN);
        assert_eq!(provider.save().unwrap(), 1);
        chunk.write().unwrap().set_block_id(1, 50, 1, 3);
        assert_eq!(provider.save().unwrap(), 1);
        assert_eq!(provider.save().unwrap(), 0);
    }

    #[test]
    fn test_set_chunk_and_generator() {
        let provider = memory_provider(1, 4);
        assert_eq!(provider.generator().name(), "Flat");
        let (generator, _entered, _release) = GatedGenerator::new(false);
        provider.set_generator(generator);
        assert_eq!(provider.generator().name(), "Gated");

        let shared = provider.set_chunk(Chunk::new(ChunkPos::new(4, 4)));
        assert!(Arc::ptr_eq(&shared, &provider.get(ChunkPos::new(4, 4)).unwrap()));
        assert_eq!(provider.loaded_positions(), vec![ChunkPos::new(4, 4)]);
    }
}
