//! Content-aware compression
//!
//! ```text
//! bytes ─→ ContentTypeDetector ─→ ContentType ─→ CompressionLevel
//!                                                   │
//! CompressionStrategy ├─→ Adaptive (zstd | zlib)  ←─┘
//!                     ├─→ Sparse   (zero runs)
//!                     └─→ Solid    (zstd + shared dictionary)
//! ```

pub mod adaptive;
pub mod detector;
pub mod solid;
pub mod sparse;

pub use adaptive::{AdaptiveCompressor, CompressionBackend};
pub use detector::ContentTypeDetector;
pub use solid::SolidCompressor;
pub use sparse::SparseCompressor;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad class of a byte buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Code,
    Text,
    Data,
    Assets,
    #[default]
    Unknown,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Code,
        ContentType::Text,
        ContentType::Data,
        ContentType::Assets,
        ContentType::Unknown,
    ];

    /// Level used when none is configured
    pub fn default_level(self) -> CompressionLevel {
        match self {
            ContentType::Code => CompressionLevel::Low,
            ContentType::Text => CompressionLevel::Medium,
            ContentType::Assets => CompressionLevel::High,
            ContentType::Data | ContentType::Unknown => CompressionLevel::Medium,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Code => "code",
            ContentType::Text => "text",
            ContentType::Data => "data",
            ContentType::Assets => "assets",
            ContentType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Low,
    Medium,
    High,
}

impl CompressionLevel {
    pub fn zstd_level(self) -> i32 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Low => 3,
            CompressionLevel::Medium => 9,
            CompressionLevel::High => 19,
        }
    }

    pub fn deflate_level(self) -> u32 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Low => 3,
            CompressionLevel::Medium => 6,
            CompressionLevel::High => 9,
        }
    }
}

/// Encoding of a stored segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    /// Stored as-is
    #[default]
    None,
    Zstd,
    /// zlib-wrapped deflate
    Deflate,
    Sparse,
    /// zstd with a shared dictionary
    ZstdDictionary,
}

/// Output of a compressor
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_type: CompressionType,
    pub level: CompressionLevel,
    pub content_type: ContentType,
}

impl CompressionResult {
    pub fn new(
        data: Vec<u8>,
        original_size: usize,
        compression_type: CompressionType,
        level: CompressionLevel,
        content_type: ContentType,
    ) -> Self {
        Self {
            compressed_size: data.len(),
            data,
            original_size,
            compression_type,
            level,
            content_type,
        }
    }

    /// Result that stores `data` unchanged
    pub fn stored(data: &[u8], content_type: ContentType) -> Self {
        Self::new(
            data.to_vec(),
            data.len(),
            CompressionType::None,
            CompressionLevel::None,
            content_type,
        )
    }

    /// Compressed size over original size; 1.0 for empty input
    pub fn ratio(&self) -> f64 {
        if self.original_size > 0 {
            self.compressed_size as f64 / self.original_size as f64
        } else {
            1.0
        }
    }

    /// Calculate space saved (percentage)
    pub fn space_saved_percent(&self) -> f64 {
        (1.0 - self.ratio()) * 100.0
    }
}

/// Compressor selected for a segment
#[derive(Debug, Clone)]
pub enum CompressionStrategy {
    Adaptive(AdaptiveCompressor),
    Sparse(SparseCompressor),
    Solid(SolidCompressor),
}

impl CompressionStrategy {
    pub fn compress(&self, data: &[u8], content_type: Option<ContentType>) -> Result<CompressionResult> {
        match self {
            CompressionStrategy::Adaptive(c) => c.compress(data, content_type),
            CompressionStrategy::Sparse(c) => {
                let content_type = content_type.unwrap_or_else(|| ContentTypeDetector::detect(data));
                Ok(c.compress(data, content_type))
            }
            CompressionStrategy::Solid(c) => c.compress(data, content_type),
        }
    }
}

/// Whether `data` starts like a zstd or zlib stream
pub fn is_compressed(data: &[u8]) -> bool {
    adaptive::is_zstd(data) || adaptive::is_zlib(data)
}

/// Decode a stored segment of a known type
///
/// A result whose length differs from `expected_size` is a
/// [`Error::SizeMismatch`].
pub fn decompress(
    data: &[u8],
    compression_type: CompressionType,
    expected_size: usize,
    dictionary: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let output = match compression_type {
        CompressionType::None => data.to_vec(),
        CompressionType::Zstd => adaptive::zstd_decompress(data, Some(expected_size))?,
        CompressionType::Deflate => adaptive::zlib_decompress(data, Some(expected_size))?,
        CompressionType::Sparse => sparse::decompress(data, expected_size)?,
        CompressionType::ZstdDictionary => {
            let dictionary = dictionary.ok_or_else(|| {
                Error::Format("Dictionary-compressed segment without a dictionary".to_string())
            })?;
            SolidCompressor::from_dictionary(dictionary.to_vec()).decompress(data, expected_size)?
        }
    };

    if output.len() != expected_size {
        return Err(Error::SizeMismatch {
            expected: expected_size as u64,
            actual: output.len() as u64,
        });
    }
    Ok(output)
}
