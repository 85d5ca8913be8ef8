//! World layer: chunk generation, the caching chunk provider, per-observer
//! chunk loaders and the dimension that ties them together.

pub mod dimension;
pub mod entity_ids;
pub mod generation;
pub mod loader;
pub mod provider;

pub use dimension::{Dimension, DimensionError, DimensionTickResult};
pub use entity_ids::EntityIdAllocator;
pub use generation::{FlatGenerator, Generator, GeneratorError, GeneratorRegistry};
pub use loader::{
    ChunkLoader, LoaderConfig, LoaderListener, LoaderPhase, LoaderTickResult, MAX_VIEW_DISTANCE,
    NoopListener,
};
pub use provider::{
    ChunkProvider, DEFAULT_QUEUE_CAPACITY, LoadCallback, ProviderConfig, ProviderError,
    ProviderStats,
};
