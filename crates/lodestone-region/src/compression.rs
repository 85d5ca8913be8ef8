//! Payload compression schemes identified by the record's tag byte.

use std::io::{Read, Write};

use flate2::Compression as Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::RegionError;

/// Compression applied to a region record payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Tag 1, legacy gzip.
    Gzip,
    /// Tag 2, zlib. Used for everything this system writes.
    Zlib,
}

impl Compression {
    pub fn from_tag(tag: u8) -> Result<Self, RegionError> {
        match tag {
            1 => Ok(Self::Gzip),
            2 => Ok(Self::Zlib),
            other => Err(RegionError::UnknownCompression(other)),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Gzip => 1,
            Self::Zlib => 2,
        }
    }

    pub fn compress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    pub fn decompress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Gzip => GzDecoder::new(data).read_to_end(&mut out)?,
            Self::Zlib => ZlibDecoder::new(data).read_to_end(&mut out)?,
        };
        Ok(out)
    }
}
