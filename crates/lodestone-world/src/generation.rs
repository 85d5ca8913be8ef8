//! Chunk generator contract, a name-keyed registry and the flat generator.

use std::sync::Arc;

use lodestone_voxel::{Chunk, ChunkPos};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Synthesizes chunks that have never been stored.
///
/// Implementations are expected to be deterministic per coordinate.
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    fn generate_new_chunk(&self, pos: ChunkPos) -> Chunk;
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator {0:?} is not registered")]
    Unregistered(String),
}

/// Generators keyed by [`Generator::name`].
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: FxHashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in generators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FlatGenerator));
        registry
    }

    /// Registers a generator under its name, replacing any previous one.
    pub fn register(&mut self, generator: Arc<dyn Generator>) -> Option<Arc<dyn Generator>> {
        self.generators
            .insert(generator.name().to_string(), generator)
    }

    pub fn deregister(&mut self, name: &str) -> Option<Arc<dyn Generator>> {
        self.generators.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Generator>, GeneratorError> {
        self.generators
            .get(name)
            .cloned()
            .ok_or_else(|| GeneratorError::Unregistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }
}

/// Superflat layout: bedrock at y=0, three layers of dirt, grass at y=4.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatGenerator;

impl FlatGenerator {
    pub const NAME: &'static str = "Flat";

    const BEDROCK: u8 = 7;
    const DIRT: u8 = 3;
    const GRASS: u8 = 2;
}

impl Generator for FlatGenerator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn generate_new_chunk(&self, pos: ChunkPos) -> Chunk {
        let mut chunk = Chunk::new(pos);
        let segment = chunk.segment_or_create(0);
        for x in 0..16 {
            for z in 0..16 {
                segment.set_block_id(x, 0, z, Self::BEDROCK);
                for y in 1..4 {
                    segment.set_block_id(x, y, z, Self::DIRT);
                }
                segment.set_block_id(x, 4, z, Self::GRASS);
            }
        }
        chunk.recalculate_height_map();
        chunk
    }
}
