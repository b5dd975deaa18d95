//! Zero-run encoding
//!
//! ```text
//! "SPAR" | LEB128 original length | body
//! body:  literal byte (not 0xFF)
//!      | 0xFF 0x00          literal 0xFF
//!      | 0xFF LEB128(n>=1)  n zero bytes
//! ```

use super::adaptive::PREALLOC_LIMIT;
use super::{CompressionLevel, CompressionResult, CompressionType, ContentType};
use crate::error::{Error, Result};

pub const SPARSE_MAGIC: &[u8; 4] = b"SPAR";
const ESCAPE: u8 = 0xFF;
pub const DEFAULT_MIN_RUN: usize = 64;

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| Error::Compression("Truncated sparse varint".to_string()))?;
        *pos += 1;
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::Compression("Sparse varint overflow".to_string()))
}

/// Collapses long zero runs into markers
#[derive(Debug, Clone, Copy)]
pub struct SparseCompressor {
    min_run: usize,
}

impl Default for SparseCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RUN)
    }
}

impl SparseCompressor {
    /// Runs shorter than `min_run` stay literal
    pub fn new(min_run: usize) -> Self {
        Self {
            min_run: min_run.max(1),
        }
    }

    pub fn min_run(&self) -> usize {
        self.min_run
    }

    pub fn compress(&self, data: &[u8], content_type: ContentType) -> CompressionResult {
        let mut out = Vec::with_capacity(data.len() / 2 + 8);
        out.extend_from_slice(SPARSE_MAGIC);
        write_varint(&mut out, data.len() as u64);

        let mut i = 0;
        while i < data.len() {
            match data[i] {
                0 => {
                    let run = data[i..].iter().take_while(|&&b| b == 0).count();
                    if run >= self.min_run {
                        out.push(ESCAPE);
                        write_varint(&mut out, run as u64);
                    } else {
                        out.resize(out.len() + run, 0);
                    }
                    i += run;
                }
                ESCAPE => {
                    out.extend_from_slice(&[ESCAPE, 0x00]);
                    i += 1;
                }
                b => {
                    out.push(b);
                    i += 1;
                }
            }
        }

        CompressionResult::new(
            out,
            data.len(),
            CompressionType::Sparse,
            CompressionLevel::Low,
            content_type,
        )
    }

    pub fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        decompress(data, expected_size)
    }
}

/// Decode a sparse stream that should hold `expected_size` bytes
///
/// A header declaring any other length is rejected before decoding.
pub fn decompress(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let body = data
        .strip_prefix(SPARSE_MAGIC.as_slice())
        .ok_or_else(|| Error::Compression("Missing sparse header".to_string()))?;
    let mut pos = 0;
    let declared = read_varint(body, &mut pos)?;
    if declared != expected_size as u64 {
        return Err(Error::SizeMismatch {
            expected: expected_size as u64,
            actual: declared,
        });
    }
    let original = expected_size;

    let mut out = Vec::with_capacity(original.min(PREALLOC_LIMIT));
    while pos < body.len() {
        let byte = body[pos];
        pos += 1;
        if out.len() == original {
            return Err(Error::Compression(format!(
                "Sparse stream continues past declared length {}",
                original
            )));
        }
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match read_varint(body, &mut pos)? {
            0 => out.push(ESCAPE),
            run => {
                if run > (original - out.len()) as u64 {
                    return Err(Error::Compression(format!(
                        "Sparse run overflows declared length {}",
                        original
                    )));
                }
                out.resize(out.len() + run as usize, 0);
            }
        }
    }

    if out.len() != original {
        return Err(Error::SizeMismatch {
            expected: original as u64,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}
