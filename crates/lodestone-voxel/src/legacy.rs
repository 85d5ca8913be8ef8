//! Import of legacy NBT chunk payloads.
//!
//! Legacy sections store voxels Y-major, `(y << 8) | (z << 4) | x`. Every
//! array is reordered into the segment's X-major layout on import: the id
//! array byte by byte, the data and light arrays nibble by nibble. Legacy
//! biomes are indexed `(z << 4) | x` and are transposed to the chunk's
//! `(x << 4) | z` order. The stored height map is ignored and recomputed.

use std::io::Cursor;

use quartz_nbt::io::{Flavor, read_nbt};
use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::chunk::{CHUNK_HEIGHT, COLUMN_COUNT, Chunk, SEGMENTS_PER_CHUNK};
use crate::chunk_serial::ChunkDecodeError;
use crate::nibble::{NIBBLE_ARRAY_LEN, NibbleArray};
use crate::pos::ChunkPos;
use crate::segment::{SEGMENT_VOLUME, Segment};

/// Decodes an uncompressed legacy NBT payload into a chunk.
pub fn decode_legacy(bytes: &[u8]) -> Result<Chunk, ChunkDecodeError> {
    let (root, _) = read_nbt(&mut Cursor::new(bytes), Flavor::Uncompressed)?;
    chunk_from_nbt(&root)
}

/// Builds a chunk from a parsed legacy root compound.
pub fn chunk_from_nbt(root: &NbtCompound) -> Result<Chunk, ChunkDecodeError> {
    let level = root
        .get::<_, &NbtCompound>("Level")
        .map_err(|_| ChunkDecodeError::MissingTag("Level"))?;

    let x = level.get::<_, i32>("xPos").unwrap_or(0);
    let z = level.get::<_, i32>("zPos").unwrap_or(0);
    let mut chunk = Chunk::new(ChunkPos::new(x, z));

    chunk.set_light_populated(level.get::<_, i8>("LightPopulated").unwrap_or(0) > 0);
    chunk.set_terrain_populated(level.get::<_, i8>("TerrainPopulated").unwrap_or(0) > 0);
    chunk.set_inhabited_time(level.get::<_, i64>("InhabitedTime").unwrap_or(0));
    chunk.set_last_update(level.get::<_, i64>("LastUpdate").unwrap_or(0));

    if let Ok(biomes) = level.get::<_, &[i8]>("Biomes") {
        check_len("Biomes", biomes.len(), COLUMN_COUNT)?;
        let mut out = [0u8; COLUMN_COUNT];
        for (legacy_index, &biome) in biomes.iter().enumerate() {
            let (bx, bz) = (legacy_index & 15, legacy_index >> 4);
            out[(bx << 4) | bz] = biome as u8;
        }
        chunk.set_biomes(out);
    }

    if let Ok(sections) = level.get::<_, &NbtList>("Sections") {
        for tag in sections.iter() {
            let NbtTag::Compound(section) = tag else {
                continue;
            };
            let y = section.get::<_, i8>("Y")?;
            if !(0..SEGMENTS_PER_CHUNK as i8).contains(&y) {
                tracing::debug!(x, z, section = y, "skipping out-of-range legacy section");
                continue;
            }
            chunk.set_segment(y as usize, section_to_segment(section)?);
        }
    }

    if let Ok(tile_entities) = level.get::<_, &NbtList>("TileEntities") {
        for tag in tile_entities.iter() {
            let NbtTag::Compound(entity) = tag else {
                continue;
            };
            let (Ok(bx), Ok(by), Ok(bz)) = (
                entity.get::<_, i32>("x"),
                entity.get::<_, i32>("y"),
                entity.get::<_, i32>("z"),
            ) else {
                continue;
            };
            if !(0..CHUNK_HEIGHT as i32).contains(&by) {
                continue;
            }
            chunk.set_block_tag(
                (bx & 15) as usize,
                by as usize,
                (bz & 15) as usize,
                Some(entity.clone()),
            );
        }
    }

    chunk.recalculate_height_map();
    chunk.mark_clean();
    Ok(chunk)
}

fn section_to_segment(section: &NbtCompound) -> Result<Segment, ChunkDecodeError> {
    let blocks = section
        .get::<_, &[i8]>("Blocks")
        .map_err(|_| ChunkDecodeError::MissingTag("Blocks"))?;
    check_len("Blocks", blocks.len(), SEGMENT_VOLUME)?;

    let mut ids = Box::new([0u8; SEGMENT_VOLUME]);
    for (legacy_index, &id) in blocks.iter().enumerate() {
        ids[reorder_index(legacy_index)] = id as u8;
    }

    let data = nibble_channel(section, "Data")?;
    let block_light = nibble_channel(section, "BlockLight")?;
    let sky_light = nibble_channel(section, "SkyLight")?;
    Ok(Segment::from_parts(ids, data, block_light, sky_light))
}

/// Reads and reorders one nibble channel. A missing channel reads as zeros.
fn nibble_channel(section: &NbtCompound, tag: &'static str) -> Result<NibbleArray, ChunkDecodeError> {
    let mut out = NibbleArray::new();
    let Ok(raw) = section.get::<_, &[i8]>(tag) else {
        return Ok(out);
    };
    check_len(tag, raw.len(), NIBBLE_ARRAY_LEN)?;

    let bytes: Vec<u8> = raw.iter().map(|&b| b as u8).collect();
    let legacy = NibbleArray::from_bytes(&bytes).ok_or(ChunkDecodeError::BadArrayLength {
        tag,
        expected: NIBBLE_ARRAY_LEN,
        actual: bytes.len(),
    })?;
    for legacy_index in 0..SEGMENT_VOLUME {
        let value = legacy.get(legacy_index);
        if value != 0 {
            out.set(reorder_index(legacy_index), value);
        }
    }
    Ok(out)
}

/// Maps a Y-major `(y << 8) | (z << 4) | x` index to X-major `(x << 8) | (z << 4) | y`.
#[inline]
fn reorder_index(legacy_index: usize) -> usize {
    let y = legacy_index >> 8;
    let z = (legacy_index >> 4) & 15;
    let x = legacy_index & 15;
    Segment::index(x, y, z)
}

fn check_len(tag: &'static str, actual: usize, expected: usize) -> Result<(), ChunkDecodeError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ChunkDecodeError::BadArrayLength {
            tag,
            expected,
            actual,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use quartz_nbt::io::write_nbt;

    fn legacy_index(x: usize, y: usize, z: usize) -> usize {
        (y << 8) | (z << 4) | x
    }

    fn set_legacy_nibble(arr: &mut [i8], index: usize, value: u8) {
        let byte = arr[index >> 1] as u8;
        let byte = if index & 1 == 0 {
            (byte & 0xF0) | value
        } else {
            (byte & 0x0F) | (value << 4)
        };
        arr[index >> 1] = byte as i8;
    }

    fn sample_root() -> NbtCompound {
        let mut blocks = vec![0i8; SEGMENT_VOLUME];
        blocks[legacy_index(5, 3, 4)] = 7;
        blocks[legacy_index(0, 15, 0)] = 1;

        let mut data = vec![0i8; NIBBLE_ARRAY_LEN];
        set_legacy_nibble(&mut data, legacy_index(5, 3, 4), 9);
        let mut sky = vec![0i8; NIBBLE_ARRAY_LEN];
        set_legacy_nibble(&mut sky, legacy_index(5, 4, 4), 13);

        let mut section = NbtCompound::new();
        section.insert("Y", NbtTag::Byte(1));
        section.insert("Blocks", NbtTag::ByteArray(blocks));
        section.insert("Data", NbtTag::ByteArray(data));
        section.insert("SkyLight", NbtTag::ByteArray(sky));

        let mut biomes = vec![0i8; COLUMN_COUNT];
        // Legacy column (x=2, z=6).
        biomes[(6 << 4) | 2] = 12;

        let mut chest = NbtCompound::new();
        chest.insert("id", NbtTag::String("Chest".to_string()));
        chest.insert("x", NbtTag::Int(-27));
        chest.insert("y", NbtTag::Int(19));
        chest.insert("z", NbtTag::Int(36));

        let mut level = NbtCompound::new();
        level.insert("xPos", NbtTag::Int(-2));
        level.insert("zPos", NbtTag::Int(2));
        level.insert("LightPopulated", NbtTag::Byte(1));
        level.insert("TerrainPopulated", NbtTag::Byte(0));
        level.insert("InhabitedTime", NbtTag::Long(500));
        level.insert("Biomes", NbtTag::ByteArray(biomes));
        level.insert("Sections", NbtTag::List(NbtList::from(vec![NbtTag::Compound(section)])));
        level.insert("TileEntities", NbtTag::List(NbtList::from(vec![NbtTag::Compound(chest)])));

        let mut root = NbtCompound::new();
        root.insert("Level", NbtTag::Compound(level));
        root
    }

    #[test]
    fn test_reorder_index() {
        assert_eq!(reorder_index(legacy_index(0, 0, 0)), 0);
        assert_eq!(reorder_index(legacy_index(1, 0, 0)), 256);
        assert_eq!(reorder_index(legacy_index(0, 1, 0)), 1);
        assert_eq!(reorder_index(legacy_index(0, 0, 1)), 16);
    }

    #[test]
    fn test_import_reorders_every_channel() {
        let mut bytes = Vec::new();
        write_nbt(&mut bytes, None, &sample_root(), Flavor::Uncompressed).unwrap();
        let chunk = decode_legacy(&bytes).unwrap();

        assert_eq!(chunk.pos(), ChunkPos::new(-2, 2));
        assert_eq!(chunk.block_id(5, 16 + 3, 4), 7);
        assert_eq!(chunk.block_data(5, 16 + 3, 4), 9);
        assert_eq!(chunk.sky_light(5, 16 + 4, 4), 13);
        assert_eq!(chunk.sky_light(5, 16 + 3, 4), 0);
        assert_eq!(chunk.block_id(0, 31, 0), 1);
        assert!(chunk.segment(0).is_none());
    }

    #[test]
    fn test_import_metadata_and_height_map() {
        let chunk = chunk_from_nbt(&sample_root()).unwrap();
        assert!(chunk.light_populated());
        assert!(!chunk.terrain_populated());
        assert_eq!(chunk.inhabited_time(), 500);
        assert_eq!(chunk.biome(2, 6), 12);
        assert_eq!(chunk.height_map(5, 4), 20);
        assert_eq!(chunk.height_map(0, 0), 32);
        assert_eq!(chunk.height_map(1, 1), 0);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_import_tile_entities_as_block_tags() {
        let chunk = chunk_from_nbt(&sample_root()).unwrap();
        // -27 & 15 = 5, 36 & 15 = 4.
        let tag = chunk.block_tag(5, 19, 4).unwrap();
        assert_eq!(tag.get::<_, &str>("id").unwrap(), "Chest");
    }

    #[test]
    fn test_missing_level() {
        let root = NbtCompound::new();
        assert!(matches!(
            chunk_from_nbt(&root),
            Err(ChunkDecodeError::MissingTag("Level"))
        ));
    }

    #[test]
    fn test_bad_array_length() {
        let mut section = NbtCompound::new();
        section.insert("Y", NbtTag::Byte(0));
        section.insert("Blocks", NbtTag::ByteArray(vec![0; 12]));
        let mut level = NbtCompound::new();
        level.insert("Sections", NbtTag::List(NbtList::from(vec![NbtTag::Compound(section)])));
        let mut root = NbtCompound::new();
        root.insert("Level", NbtTag::Compound(level));

        assert!(matches!(
            chunk_from_nbt(&root),
            Err(ChunkDecodeError::BadArrayLength { tag: "Blocks", .. })
        ));
    }
}
