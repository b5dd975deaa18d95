//! Adaptive zstd / zlib compression

use super::{CompressionLevel, CompressionResult, CompressionType, ContentType, ContentTypeDetector};
use crate::error::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::warn;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Primary stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionBackend {
    #[default]
    Zstd,
    /// zlib, readable by any deflate implementation
    Deflate,
}

pub(crate) fn is_zstd(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

pub(crate) fn is_zlib(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0F == 8 && ((*cmf as u16) << 8 | *flg as u16) % 31 == 0,
        _ => false,
    }
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)
        .map_err(|e| Error::Compression(format!("Failed to create zstd encoder: {}", e)))?;
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(format!("Failed to compress: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("Failed to finish compression: {}", e)))
}

fn zlib_compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(format!("Failed to deflate: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("Failed to finish deflate: {}", e)))
}

/// Largest up-front reservation for a decoded stream
pub(crate) const PREALLOC_LIMIT: usize = 16 << 20;

/// Read a decoder to its end, or to one byte past `limit`
///
/// The extra byte lets the caller report an over-long stream as a size
/// mismatch without inflating all of it.
pub(crate) fn read_bounded<R: Read>(mut reader: R, limit: Option<usize>) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::new();
    match limit {
        Some(limit) => {
            output.reserve(limit.min(PREALLOC_LIMIT));
            reader.take(limit as u64 + 1).read_to_end(&mut output)?;
        }
        None => {
            reader.read_to_end(&mut output)?;
        }
    }
    Ok(output)
}

pub(crate) fn zstd_decompress(data: &[u8], limit: Option<usize>) -> Result<Vec<u8>> {
    let decoder = zstd::Decoder::new(data)
        .map_err(|e| Error::Compression(format!("Failed to create zstd decoder: {}", e)))?;
    read_bounded(decoder, limit)
        .map_err(|e| Error::Compression(format!("Failed to decompress: {}", e)))
}

pub(crate) fn zlib_decompress(data: &[u8], limit: Option<usize>) -> Result<Vec<u8>> {
    read_bounded(ZlibDecoder::new(data), limit)
        .map_err(|e| Error::Compression(format!("Failed to inflate: {}", e)))
}

/// Picks a level from the content type and compresses with one backend
#[derive(Debug, Clone, Default)]
pub struct AdaptiveCompressor {
    backend: CompressionBackend,
    level: Option<CompressionLevel>,
}

impl AdaptiveCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: CompressionBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Use `level` for every content type
    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn backend(&self) -> CompressionBackend {
        self.backend
    }

    pub fn select_level(&self, content_type: ContentType) -> CompressionLevel {
        self.level.unwrap_or_else(|| content_type.default_level())
    }

    /// Compress `data`, detecting its content type unless given
    pub fn compress(&self, data: &[u8], content_type: Option<ContentType>) -> Result<CompressionResult> {
        let content_type = content_type.unwrap_or_else(|| ContentTypeDetector::detect(data));
        let level = self.select_level(content_type);
        if level == CompressionLevel::None {
            return Ok(CompressionResult::stored(data, content_type));
        }

        let (compressed, compression_type) = match self.backend {
            CompressionBackend::Zstd => match zstd_compress(data, level.zstd_level()) {
                Ok(compressed) => (compressed, CompressionType::Zstd),
                Err(e) => {
                    warn!("zstd failed, falling back to deflate: {}", e);
                    (zlib_compress(data, level.deflate_level())?, CompressionType::Deflate)
                }
            },
            CompressionBackend::Deflate => {
                (zlib_compress(data, level.deflate_level())?, CompressionType::Deflate)
            }
        };

        Ok(CompressionResult::new(
            compressed,
            data.len(),
            compression_type,
            level,
            content_type,
        ))
    }

    /// Decompress a zstd or zlib stream, recognised by its header
    ///
    /// With `expected_size`, decoding stops just past that length.
    pub fn decompress(data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let output = if data.is_empty() {
            Vec::new()
        } else if is_zstd(data) {
            zstd_decompress(data, expected_size)?
        } else if is_zlib(data) {
            zlib_decompress(data, expected_size)?
        } else {
            return Err(Error::Compression(
                "Unrecognised compressed stream header".to_string(),
            ));
        };

        match expected_size {
            Some(expected) if output.len() != expected => Err(Error::SizeMismatch {
                expected: expected as u64,
                actual: output.len() as u64,
            }),
            _ => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_round_trip() -> Result<()> {
        let data = b"Hello, World! This is a test of zstd compression. ".repeat(10);
        let result = AdaptiveCompressor::new().compress(&data, None)?;

        assert_eq!(result.compression_type, CompressionType::Zstd);
        assert_eq!(result.content_type, ContentType::Text);
        assert_eq!(result.level, CompressionLevel::Medium);
        assert!(result.compressed_size < data.len());
        assert!(is_zstd(&result.data));

        let restored = AdaptiveCompressor::decompress(&result.data, Some(data.len()))?;
        assert_eq!(restored, data);
        Ok(())
    }

    #[test]
    fn test_deflate_round_trip() -> Result<()> {
        let data = vec![42u8; 4000];
        let compressor = AdaptiveCompressor::new().with_backend(CompressionBackend::Deflate);
        let result = compressor.compress(&data, Some(ContentType::Data))?;

        assert_eq!(result.compression_type, CompressionType::Deflate);
        assert!(is_zlib(&result.data));
        assert_eq!(AdaptiveCompressor::decompress(&result.data, None)?, data);
        Ok(())
    }

    #[test]
    fn test_level_override_wins() -> Result<()> {
        let compressor = AdaptiveCompressor::new().with_level(CompressionLevel::High);
        assert_eq!(compressor.select_level(ContentType::Code), CompressionLevel::High);

        let stored = AdaptiveCompressor::new()
            .with_level(CompressionLevel::None)
            .compress(b"abc", None)?;
        assert_eq!(stored.compression_type, CompressionType::None);
        assert_eq!(stored.data, b"abc");
        Ok(())
    }

    #[test]
    fn test_code_uses_low_level() -> Result<()> {
        let module = [b"\0asm\x01\0\0\0".to_vec(), vec![0x20; 64]].concat();
        let result = AdaptiveCompressor::new().compress(&module, None)?;
        assert_eq!(result.content_type, ContentType::Code);
        assert_eq!(result.level, CompressionLevel::Low);
        Ok(())
    }

    #[test]
    fn test_size_mismatch() -> Result<()> {
        let result = AdaptiveCompressor::new().compress(&[1u8; 100], None)?;
        let err = AdaptiveCompressor::decompress(&result.data, Some(99));
        assert!(matches!(
            err,
            Err(Error::SizeMismatch {
                expected: 99,
                actual: 100
            })
        ));
        Ok(())
    }

    #[test]
    fn test_oversized_stream_stops_at_limit() -> Result<()> {
        let data = vec![0u8; 8 << 20];
        for backend in [CompressionBackend::Zstd, CompressionBackend::Deflate] {
            let result = AdaptiveCompressor::new()
                .with_backend(backend)
                .compress(&data, Some(ContentType::Data))?;
            let err = AdaptiveCompressor::decompress(&result.data, Some(1000));
            assert!(matches!(
                err,
                Err(Error::SizeMismatch {
                    expected: 1000,
                    actual: 1001
                })
            ));
        }
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_stream() {
        assert!(AdaptiveCompressor::decompress(b"not a stream", None).is_err());
        assert_eq!(AdaptiveCompressor::decompress(&[], Some(0)).ok(), Some(Vec::new()));
    }

    #[test]
    fn test_header_sniffing() {
        assert!(is_zlib(&[0x78, 0x9C]));
        assert!(is_zlib(&[0x78, 0xDA]));
        assert!(is_zlib(&[0x78, 0x01]));
        assert!(!is_zlib(&[0x78, 0x00]));
        assert!(is_zstd(&ZSTD_MAGIC));
    }
}
