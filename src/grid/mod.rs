//! Pixel grid model
//!
//! A square raster of side `N = 2^k`. Dense mode packs three payload bytes
//! per cell (RGB); code mode packs four (RGBA) and marks cells that carry
//! no data as `(0, 0, 0, 255)`.

pub mod sizer;

pub use sizer::{calculate_grid_size, GridSizer};

use sizer::MAX_GRID_SIZE;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel layout of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EncodingMode {
    /// Three channels, payload passed through uncompressed
    #[default]
    #[serde(rename = "RGB-dense")]
    Dense,
    /// Four channels, payload compressed per segment
    #[serde(rename = "RGBA-code")]
    Code,
}

impl EncodingMode {
    /// Payload bytes stored per cell
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            EncodingMode::Dense => 3,
            EncodingMode::Code => 4,
        }
    }

    /// Channel values of a cell that carries no data
    pub fn free_pixel(self) -> &'static [u8] {
        match self {
            EncodingMode::Dense => &[0, 0, 0],
            EncodingMode::Code => &[0, 0, 0, 255],
        }
    }

    /// Mode for a raster channel count
    pub fn from_channels(channels: usize) -> Result<Self> {
        match channels {
            3 => Ok(EncodingMode::Dense),
            4 => Ok(EncodingMode::Code),
            other => Err(Error::Format(format!(
                "Unsupported channel count: {}",
                other
            ))),
        }
    }

    /// Whether segments are compressed unless configured otherwise
    pub fn compresses_by_default(self) -> bool {
        matches!(self, EncodingMode::Code)
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingMode::Dense => write!(f, "RGB-dense"),
            EncodingMode::Code => write!(f, "RGBA-code"),
        }
    }
}

/// Square grid of pixel channel values, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    size: u32,
    mode: EncodingMode,
    data: Vec<u8>,
}

impl PixelGrid {
    /// Create a grid with every cell free
    pub fn new(size: u32, mode: EncodingMode) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(Error::Format(format!(
                "Grid size must be a power of two, got {}",
                size
            )));
        }
        let cells = Self::byte_len(size, mode)? / mode.bytes_per_pixel();
        let data = mode.free_pixel().repeat(cells);
        Ok(Self { size, mode, data })
    }

    /// Wrap raw row-major channel data
    pub fn from_raw(size: u32, mode: EncodingMode, data: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(size, mode)?;
        if data.len() != expected {
            return Err(Error::Format(format!(
                "Raster holds {} bytes, expected {} for {}x{} {}",
                data.len(),
                expected,
                size,
                size,
                mode
            )));
        }
        Ok(Self { size, mode, data })
    }

    /// Channel bytes of a `size` x `size` grid
    fn byte_len(size: u32, mode: EncodingMode) -> Result<usize> {
        let too_large = || {
            Error::Format(format!(
                "Grid size {} exceeds the maximum of {}",
                size, MAX_GRID_SIZE
            ))
        };
        if size > MAX_GRID_SIZE {
            return Err(too_large());
        }
        (size as usize)
            .checked_mul(size as usize)
            .and_then(|cells| cells.checked_mul(mode.bytes_per_pixel()))
            .ok_or_else(too_large)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    pub fn channels(&self) -> usize {
        self.mode.bytes_per_pixel()
    }

    /// Total payload capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.size as usize) + (x as usize)) * self.channels()
    }

    /// Channel values at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let i = self.index(x, y);
        &self.data[i..i + self.channels()]
    }

    /// Mutable channel values at `(x, y)`
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let i = self.index(x, y);
        let channels = self.channels();
        &mut self.data[i..i + channels]
    }

    /// Write up to `channels` bytes into a cell, zero-padding the rest
    pub fn put(&mut self, x: u32, y: u32, bytes: &[u8]) {
        let pixel = self.pixel_mut(x, y);
        let n = bytes.len().min(pixel.len());
        pixel[..n].copy_from_slice(&bytes[..n]);
        pixel[n..].fill(0);
    }

    /// Whether a cell still holds the free marker
    pub fn is_free(&self, x: u32, y: u32) -> bool {
        self.pixel(x, y) == self.mode.free_pixel()
    }

    /// Raw row-major channel data
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_grid_is_free() -> Result<()> {
        let grid = PixelGrid::new(4, EncodingMode::Code)?;
        assert_eq!(grid.capacity(), 64);
        for y in 0..4 {
            for x in 0..4 {
                assert!(grid.is_free(x, y));
                assert_eq!(grid.pixel(x, y), &[0, 0, 0, 255]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_put_pads_partial_pixel() -> Result<()> {
        let mut grid = PixelGrid::new(2, EncodingMode::Code)?;
        grid.put(1, 0, &[7, 8]);
        assert_eq!(grid.pixel(1, 0), &[7, 8, 0, 0]);
        assert!(!grid.is_free(1, 0));

        let mut dense = PixelGrid::new(2, EncodingMode::Dense)?;
        dense.put(0, 1, &[1, 2, 3]);
        assert_eq!(dense.pixel(0, 1), &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(matches!(
            PixelGrid::new(3, EncodingMode::Dense),
            Err(Error::Format(_))
        ));
        assert!(PixelGrid::from_raw(2, EncodingMode::Dense, vec![0; 5]).is_err());
    }

    #[test]
    fn test_rejects_oversized_grid() {
        assert!(matches!(
            PixelGrid::new(1 << 31, EncodingMode::Code),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            PixelGrid::from_raw(1 << 31, EncodingMode::Code, vec![0; 16]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_mode_serde_names() -> Result<()> {
        let json = serde_json::to_string(&EncodingMode::Code)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        assert_eq!(json, "\"RGBA-code\"");
        assert_eq!(EncodingMode::from_channels(3)?, EncodingMode::Dense);
        assert!(EncodingMode::from_channels(2).is_err());
        Ok(())
    }
}
