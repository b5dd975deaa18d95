//! Shared-dictionary compression for many small, similar segments

use super::adaptive::read_bounded;
use super::{CompressionLevel, CompressionResult, CompressionType, ContentType, ContentTypeDetector};
use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Largest dictionary built from samples
pub const MAX_DICTIONARY_SIZE: usize = 32 * 1024;
const PATTERN_LEN: usize = 4;

/// zstd compression against a dictionary built from sample segments
///
/// The dictionary is needed again for decompression, so callers persist
/// [`SolidCompressor::dictionary`] next to the compressed data.
#[derive(Debug, Clone)]
pub struct SolidCompressor {
    dictionary: Vec<u8>,
    level: CompressionLevel,
}

impl SolidCompressor {
    /// Build a dictionary from samples
    ///
    /// Uses the zstd trainer when the samples are large enough, otherwise a
    /// raw dictionary of the most common 4-byte patterns.
    pub fn train<S: AsRef<[u8]>>(samples: &[S]) -> Self {
        let dictionary = match zstd::dict::from_samples(samples, MAX_DICTIONARY_SIZE) {
            Ok(dictionary) => dictionary,
            Err(e) => {
                debug!("zstd dictionary training failed ({}), using pattern dictionary", e);
                pattern_dictionary(samples)
            }
        };
        debug!(
            samples = samples.len(),
            dictionary_size = dictionary.len(),
            "Built solid dictionary"
        );
        Self::from_dictionary(dictionary)
    }

    /// Compressor for an existing dictionary
    pub fn from_dictionary(dictionary: Vec<u8>) -> Self {
        Self {
            dictionary,
            level: CompressionLevel::Medium,
        }
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn dictionary(&self) -> &[u8] {
        &self.dictionary
    }

    pub fn compress(&self, data: &[u8], content_type: Option<ContentType>) -> Result<CompressionResult> {
        let content_type = content_type.unwrap_or_else(|| ContentTypeDetector::detect(data));
        let mut compressor =
            zstd::bulk::Compressor::with_dictionary(self.level.zstd_level(), &self.dictionary)
                .map_err(|e| Error::Compression(format!("Failed to load dictionary: {}", e)))?;
        let compressed = compressor
            .compress(data)
            .map_err(|e| Error::Compression(format!("Failed to compress: {}", e)))?;

        Ok(CompressionResult::new(
            compressed,
            data.len(),
            CompressionType::ZstdDictionary,
            self.level,
            content_type,
        ))
    }

    /// Decompress using only the dictionary and the compressed bytes
    pub fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let decoder = zstd::Decoder::with_dictionary(data, &self.dictionary)
            .map_err(|e| Error::Compression(format!("Failed to load dictionary: {}", e)))?;
        let output = read_bounded(decoder, Some(expected_size))
            .map_err(|e| Error::Compression(format!("Failed to decompress: {}", e)))?;
        if output.len() != expected_size {
            return Err(Error::SizeMismatch {
                expected: expected_size as u64,
                actual: output.len() as u64,
            });
        }
        Ok(output)
    }
}

/// Most frequent 4-byte windows, ties broken by byte order
fn pattern_dictionary<S: AsRef<[u8]>>(samples: &[S]) -> Vec<u8> {
    let mut counts: HashMap<&[u8], usize> = HashMap::new();
    for sample in samples {
        for window in sample.as_ref().windows(PATTERN_LEN) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }

    let mut patterns: Vec<(&[u8], usize)> = counts.into_iter().collect();
    patterns.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    patterns
        .into_iter()
        .take(MAX_DICTIONARY_SIZE / PATTERN_LEN)
        .flat_map(|(pattern, _)| pattern.iter().copied())
        .collect()
}
