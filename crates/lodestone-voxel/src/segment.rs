//! Fixed 16×16×16 voxel slab with nibble-packed data and light channels.
//!
//! Block ids are stored one byte per voxel at index `(x << 8) | (z << 4) | y`.
//! Block data, block light and sky light share the same logical index and are
//! nibble-packed (see [`NibbleArray`]), so the byte is
//! `(x << 7) + (z << 3) + (y >> 1)` and the parity of `y` picks the nibble.

use std::fmt;

use crate::nibble::{NIBBLE_ARRAY_LEN, NibbleArray};

/// Side length of a segment in voxels.
pub const SEGMENT_SIZE: usize = 16;

/// Total number of voxels in a segment (16³).
pub const SEGMENT_VOLUME: usize = SEGMENT_SIZE * SEGMENT_SIZE * SEGMENT_SIZE;

/// Size of one segment in the wire encoding: flag byte, ids, packed data.
pub const SEGMENT_ENCODED_LEN: usize = 1 + SEGMENT_VOLUME + NIBBLE_ARRAY_LEN;

/// A 16×16×16 sub-volume of a chunk.
///
/// Coordinates passed to the accessors are local (`0..16`). Out-of-range input
/// is a caller bug and is only caught by debug assertions.
#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    ids: Box<[u8; SEGMENT_VOLUME]>,
    data: NibbleArray,
    block_light: NibbleArray,
    sky_light: NibbleArray,
}

impl Segment {
    /// Creates an all-air segment with zero data and light.
    pub fn new() -> Self {
        Self {
            ids: Box::new([0u8; SEGMENT_VOLUME]),
            data: NibbleArray::new(),
            block_light: NibbleArray::new(),
            sky_light: NibbleArray::new(),
        }
    }

    /// Builds a segment from already-ordered channel arrays.
    pub fn from_parts(
        ids: Box<[u8; SEGMENT_VOLUME]>,
        data: NibbleArray,
        block_light: NibbleArray,
        sky_light: NibbleArray,
    ) -> Self {
        Self {
            ids,
            data,
            block_light,
            sky_light,
        }
    }

    /// Builds a segment from raw byte slices in this system's ordering.
    ///
    /// Returns `None` if any slice has the wrong length.
    pub fn from_slices(ids: &[u8], data: &[u8], block_light: &[u8], sky_light: &[u8]) -> Option<Self> {
        let ids = <[u8; SEGMENT_VOLUME]>::try_from(ids).ok()?;
        Some(Self {
            ids: Box::new(ids),
            data: NibbleArray::from_bytes(data)?,
            block_light: NibbleArray::from_bytes(block_light)?,
            sky_light: NibbleArray::from_bytes(sky_light)?,
        })
    }

    /// Linear voxel index for local `(x, y, z)`.
    #[inline]
    pub fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < SEGMENT_SIZE && y < SEGMENT_SIZE && z < SEGMENT_SIZE);
        (x << 8) | (z << 4) | y
    }

    /// Returns the block id at `(x, y, z)`.
    #[inline]
    pub fn block_id(&self, x: usize, y: usize, z: usize) -> u8 {
        self.ids[Self::index(x, y, z)]
    }

    /// Sets the block id at `(x, y, z)`.
    #[inline]
    pub fn set_block_id(&mut self, x: usize, y: usize, z: usize, id: u8) {
        self.ids[Self::index(x, y, z)] = id;
    }

    /// Returns the 4-bit block data at `(x, y, z)`.
    #[inline]
    pub fn block_data(&self, x: usize, y: usize, z: usize) -> u8 {
        self.data.get(Self::index(x, y, z))
    }

    /// Sets the 4-bit block data at `(x, y, z)`.
    #[inline]
    pub fn set_block_data(&mut self, x: usize, y: usize, z: usize, value: u8) {
        self.data.set(Self::index(x, y, z), value);
    }

    /// Returns the 4-bit block light level at `(x, y, z)`.
    #[inline]
    pub fn block_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.block_light.get(Self::index(x, y, z))
    }

    /// Sets the 4-bit block light level at `(x, y, z)`.
    #[inline]
    pub fn set_block_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        self.block_light.set(Self::index(x, y, z), level);
    }

    /// Returns the 4-bit sky light level at `(x, y, z)`.
    #[inline]
    pub fn sky_light(&self, x: usize, y: usize, z: usize) -> u8 {
        self.sky_light.get(Self::index(x, y, z))
    }

    /// Sets the 4-bit sky light level at `(x, y, z)`.
    #[inline]
    pub fn set_sky_light(&mut self, x: usize, y: usize, z: usize, level: u8) {
        self.sky_light.set(Self::index(x, y, z), level);
    }

    /// Returns the local y of the highest non-air block in column `(x, z)`.
    pub fn highest_block_y(&self, x: usize, z: usize) -> Option<usize> {
        // The column is contiguous in the id array, y varies fastest.
        let base = Self::index(x, 0, z);
        self.ids[base..base + SEGMENT_SIZE]
            .iter()
            .rposition(|&id| id != 0)
    }

    /// Returns the id of the highest non-air block in column `(x, z)`, or 0.
    pub fn highest_block_id(&self, x: usize, z: usize) -> u8 {
        self.highest_block_y(x, z)
            .map_or(0, |y| self.block_id(x, y, z))
    }

    /// Returns the data of the highest non-air block in column `(x, z)`, or 0.
    pub fn highest_block_data(&self, x: usize, z: usize) -> u8 {
        self.highest_block_y(x, z)
            .map_or(0, |y| self.block_data(x, y, z))
    }

    /// Returns `true` if every block id is zero.
    pub fn is_air(&self) -> bool {
        self.ids.iter().all(|&id| id == 0)
    }

    /// Raw block ids in `(x << 8) | (z << 4) | y` order.
    pub fn ids(&self) -> &[u8] {
        &self.ids[..]
    }

    /// Packed block data channel.
    pub fn data(&self) -> &NibbleArray {
        &self.data
    }

    /// Packed block light channel.
    pub fn block_light_array(&self) -> &NibbleArray {
        &self.block_light
    }

    /// Packed sky light channel.
    pub fn sky_light_array(&self) -> &NibbleArray {
        &self.sky_light
    }

    /// Appends the wire form: flag byte `0`, raw ids, raw packed data.
    ///
    /// Light is not part of the wire form.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(SEGMENT_ENCODED_LEN);
        out.push(0);
        out.extend_from_slice(&self.ids[..]);
        out.extend_from_slice(self.data.as_bytes());
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("air", &self.is_air())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_layout() {
        assert_eq!(Segment::index(0, 0, 0), 0);
        assert_eq!(Segment::index(0, 1, 0), 1);
        assert_eq!(Segment::index(0, 0, 1), 16);
        assert_eq!(Segment::index(1, 0, 0), 256);
        assert_eq!(Segment::index(15, 15, 15), SEGMENT_VOLUME - 1);
    }

    #[test]
    fn test_nibble_channels_roundtrip_for_every_y() {
        let mut seg = Segment::new();
        for y in 0..16 {
            for v in 0..16u8 {
                seg.set_block_data(3, y, 9, v);
                assert_eq!(seg.block_data(3, y, 9), v);
                seg.set_block_light(3, y, 9, v);
                assert_eq!(seg.block_light(3, y, 9), v);
                seg.set_sky_light(3, y, 9, v);
                assert_eq!(seg.sky_light(3, y, 9), v);
            }
        }
    }

    #[test]
    fn test_paired_nibble_not_perturbed() {
        let mut seg = Segment::new();
        // y=4 and y=5 share a byte.
        seg.set_block_data(7, 5, 2, 9);
        for v in 0..16u8 {
            seg.set_block_data(7, 4, 2, v);
            assert_eq!(seg.block_data(7, 5, 2), 9);
        }
        seg.set_sky_light(7, 4, 2, 12);
        seg.set_sky_light(7, 5, 2, 1);
        assert_eq!(seg.sky_light(7, 4, 2), 12);
        let byte = seg.sky_light_array().as_bytes()[(7 << 7) + (2 << 3) + (4 >> 1)];
        assert_eq!(byte, 0x1C);
    }

    #[test]
    fn test_air_predicate() {
        let mut seg = Segment::new();
        assert!(seg.is_air());

        seg.set_block_id(4, 10, 12, 1);
        assert!(!seg.is_air());

        seg.set_block_id(4, 10, 12, 0);
        assert!(seg.is_air());
    }

    #[test]
    fn test_data_and_light_do_not_affect_air_predicate() {
        let mut seg = Segment::new();
        seg.set_block_data(0, 0, 0, 5);
        seg.set_sky_light(0, 0, 0, 15);
        assert!(seg.is_air());
    }

    #[test]
    fn test_highest_block_in_column() {
        let mut seg = Segment::new();
        assert_eq!(seg.highest_block_y(2, 3), None);
        assert_eq!(seg.highest_block_id(2, 3), 0);

        seg.set_block_id(2, 1, 3, 4);
        seg.set_block_id(2, 11, 3, 17);
        seg.set_block_data(2, 11, 3, 6);
        assert_eq!(seg.highest_block_y(2, 3), Some(11));
        assert_eq!(seg.highest_block_id(2, 3), 17);
        assert_eq!(seg.highest_block_data(2, 3), 6);

        // Neighbouring column unaffected.
        assert_eq!(seg.highest_block_y(2, 4), None);
    }

    #[test]
    fn test_encode_layout_excludes_light() {
        let mut seg = Segment::new();
        seg.set_block_id(0, 1, 0, 42);
        seg.set_block_data(0, 1, 0, 3);
        seg.set_block_light(0, 0, 0, 15);

        let mut out = Vec::new();
        seg.encode_into(&mut out);
        assert_eq!(out.len(), SEGMENT_ENCODED_LEN);
        assert_eq!(out[0], 0, "flag byte");
        assert_eq!(out[1 + 1], 42, "id at index 1");
        // Data byte 0 holds y=0 (low) and y=1 (high).
        assert_eq!(out[1 + SEGMENT_VOLUME], 0x30);
        assert!(out[1 + SEGMENT_VOLUME + 1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_slices_validates_lengths() {
        let ids = vec![1u8; SEGMENT_VOLUME];
        let nib = vec![0u8; NIBBLE_ARRAY_LEN];
        assert!(Segment::from_slices(&ids, &nib, &nib, &nib).is_some());
        assert!(Segment::from_slices(&ids[..10], &nib, &nib, &nib).is_none());
        assert!(Segment::from_slices(&ids, &nib[..1], &nib, &nib).is_none());
    }
}
