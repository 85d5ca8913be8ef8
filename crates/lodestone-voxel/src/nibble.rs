//! Nibble-packed array for storing 4-bit values two to a byte.
//!
//! Element `i` lives in byte `i >> 1`. Even elements occupy the low nibble,
//! odd elements the high nibble. Segment block data, block light and sky light
//! all use this layout, so the parity of the innermost coordinate selects the
//! nibble.

use std::fmt;

/// Number of bytes backing one nibble array (4096 elements).
pub const NIBBLE_ARRAY_LEN: usize = 2048;

/// Number of logical 4-bit elements in one nibble array.
pub const NIBBLE_ELEMENTS: usize = NIBBLE_ARRAY_LEN * 2;

/// A fixed array of 4096 four-bit values packed into 2048 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct NibbleArray {
    data: Box<[u8; NIBBLE_ARRAY_LEN]>,
}

impl NibbleArray {
    /// Creates a new array with every element set to zero.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; NIBBLE_ARRAY_LEN]),
        }
    }

    /// Wraps a raw 2048-byte slice. Returns `None` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let data = <[u8; NIBBLE_ARRAY_LEN]>::try_from(bytes).ok()?;
        Some(Self {
            data: Box::new(data),
        })
    }

    /// Returns the 4-bit value at the given element index.
    ///
    /// `index` must be in `0..4096`; this is only checked in debug builds.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        debug_assert!(index < NIBBLE_ELEMENTS, "nibble index out of bounds");
        let byte = self.data[index >> 1];
        if index & 1 == 0 { byte & 0x0F } else { byte >> 4 }
    }

    /// Sets the 4-bit value at the given element index, leaving the paired
    /// nibble in the same byte untouched. Bits above the low four are dropped.
    #[inline]
    pub fn set(&mut self, index: usize, value: u8) {
        debug_assert!(index < NIBBLE_ELEMENTS, "nibble index out of bounds");
        debug_assert!(value < 16, "value {value} exceeds 4-bit capacity");
        let slot = &mut self.data[index >> 1];
        if index & 1 == 0 {
            *slot = (*slot & 0xF0) | (value & 0x0F);
        } else {
            *slot = ((value & 0x0F) << 4) | (*slot & 0x0F);
        }
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: u8) {
        let value = value & 0x0F;
        self.data.fill(value | (value << 4));
    }

    /// Returns the raw packed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Returns `true` if every element is zero.
    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

impl Default for NibbleArray {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NibbleArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nonzero = self.data.iter().filter(|&&b| b != 0).count();
        f.debug_struct("NibbleArray")
            .field("nonzero_bytes", &nonzero)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
