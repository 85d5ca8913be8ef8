//! Block lookup contract and a table-backed implementation.
//!
//! The storage core only needs to turn an `(id, data)` pair stored in a
//! segment into a [`BlockInstance`] and a runtime id for network updates.
//! Air is always id 0 and is pre-registered.

use quartz_nbt::NbtCompound;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A concrete block state: id, 4-bit data and optional auxiliary tag.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockInstance {
    pub id: u8,
    pub data: u8,
    pub tag: Option<NbtCompound>,
}

impl BlockInstance {
    pub fn new(id: u8, data: u8) -> Self {
        Self {
            id,
            data: data & 0x0F,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: NbtCompound) -> Self {
        self.tag = Some(tag);
        self
    }
}

/// Descriptor for one registered block id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockDef {
    /// Human-readable name (e.g. "stone", "dirt").
    pub name: String,
    /// Runtime id of data value 0. Data `d` maps to `runtime_base + d`.
    pub runtime_base: u32,
}

/// Errors that can occur during block registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The id slot is already taken.
    #[error("block id {0} is already registered")]
    DuplicateId(u8),
    /// A block with the same name has already been registered.
    #[error("duplicate block name: {0}")]
    DuplicateName(String),
}

/// Lookup contract consumed by dimensions.
pub trait BlockRegistry: Send + Sync {
    /// Resolves a stored `(id, data)` pair, or `None` if the id is unregistered.
    fn get(&self, id: u8, data: u8) -> Option<BlockInstance>;

    /// Runtime id sent to observers, or `None` if the id is unregistered.
    fn runtime_id(&self, id: u8, data: u8) -> Option<u32>;
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Dense table indexed by block id with reverse lookup by name.
pub struct BlockTable {
    defs: Vec<Option<BlockDef>>,
    name_to_id: FxHashMap<String, u8>,
}

impl BlockTable {
    /// Creates a table with air registered at id 0, runtime id 0.
    pub fn new() -> Self {
        let mut defs = vec![None; 256];
        defs[0] = Some(BlockDef {
            name: "air".to_string(),
            runtime_base: 0,
        });
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("air".to_string(), 0);
        Self { defs, name_to_id }
    }

    /// Registers a block at a fixed id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if the id is taken or
    /// [`RegistryError::DuplicateName`] if the name is.
    pub fn register(&mut self, id: u8, def: BlockDef) -> Result<(), RegistryError> {
        if self.defs[id as usize].is_some() {
            return Err(RegistryError::DuplicateId(id));
        }
        if self.name_to_id.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        self.name_to_id.insert(def.name.clone(), id);
        self.defs[id as usize] = Some(def);
        Ok(())
    }

    /// Removes a block, returning its definition. Air cannot be removed.
    pub fn deregister(&mut self, id: u8) -> Option<BlockDef> {
        if id == 0 {
            return None;
        }
        let def = self.defs[id as usize].take()?;
        self.name_to_id.remove(&def.name);
        Some(def)
    }

    pub fn is_registered(&self, id: u8) -> bool {
        self.defs[id as usize].is_some()
    }

    pub fn def(&self, id: u8) -> Option<&BlockDef> {
        self.defs[id as usize].as_ref()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u8> {
        self.name_to_id.get(name).copied()
    }

    /// Number of registered ids, air included.
    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    /// Returns `true` if only air is registered.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// A table with the ids used by the flat world layout.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (id, name, base) in [
            (1u8, "stone", 16u32),
            (2, "grass", 32),
            (3, "dirt", 48),
            (7, "bedrock", 112),
        ] {
            // Fresh table, ids and names are distinct.
            let _ = table.register(
                id,
                BlockDef {
                    name: name.to_string(),
                    runtime_base: base,
                },
            );
        }
        table
    }
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry for BlockTable {
    fn get(&self, id: u8, data: u8) -> Option<BlockInstance> {
        self.def(id).map(|_| BlockInstance::new(id, data))
    }

    fn runtime_id(&self, id: u8, data: u8) -> Option<u32> {
        self.def(id)
            .map(|def| def.runtime_base + u32::from(data & 0x0F))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stone() -> BlockDef {
        BlockDef {
            name: "stone".to_string(),
            runtime_base: 16,
        }
    }

    #[test]
    fn test_air_is_preregistered() {
        let table = BlockTable::new();
        assert!(table.is_registered(0));
        assert!(table.is_empty());
        assert_eq!(table.get(0, 0), Some(BlockInstance::new(0, 0)));
        assert_eq!(table.runtime_id(0, 0), Some(0));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut table = BlockTable::new();
        table.register(1, stone()).unwrap();
        assert_eq!(table.lookup_by_name("stone"), Some(1));
        assert_eq!(table.runtime_id(1, 3), Some(19));
        assert_eq!(table.get(1, 3).map(|b| b.data), Some(3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut table = BlockTable::new();
        table.register(1, stone()).unwrap();
        assert!(matches!(
            table.register(1, BlockDef { name: "other".into(), runtime_base: 0 }),
            Err(RegistryError::DuplicateId(1))
        ));
        assert!(matches!(
            table.register(2, stone()),
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_unregistered_is_not_found() {
        let mut table = BlockTable::new();
        assert_eq!(table.get(9, 0), None);
        assert_eq!(table.runtime_id(9, 0), None);

        table.register(9, stone()).unwrap();
        assert!(table.deregister(9).is_some());
        assert_eq!(table.get(9, 0), None);
        assert!(table.deregister(0).is_none(), "air stays registered");
    }

    #[test]
    fn test_defaults_cover_flat_layout() {
        let table = BlockTable::with_defaults();
        for id in [1, 2, 3, 7] {
            assert!(table.is_registered(id));
        }
    }
}
