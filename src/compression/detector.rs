//! Content type detection from magic bytes and byte statistics

use super::ContentType;

/// Bytes inspected for the printable ratio
const SAMPLE_LEN: usize = 256;
const TEXT_THRESHOLD: f64 = 0.8;
const NULL_THRESHOLD: f64 = 0.5;
/// Samples shorter than this get halved confidence
const SMALL_SAMPLE: usize = 16;

/// Executable and bytecode module headers
const CODE_MAGIC: &[&[u8]] = &[
    b"\0asm",
    b"\x7fELF",
    b"MZ",
    &[0xFE, 0xED, 0xFA, 0xCE],
    &[0xFE, 0xED, 0xFA, 0xCF],
    &[0xCE, 0xFA, 0xED, 0xFE],
    &[0xCF, 0xFA, 0xED, 0xFE],
    &[0xCA, 0xFE, 0xBA, 0xBE],
];

/// Image, audio and video headers
const ASSET_MAGIC: &[&[u8]] = &[
    &[0x89, b'P', b'N', b'G'],
    &[0xFF, 0xD8, 0xFF],
    b"GIF8",
    b"RIFF",
    b"OggS",
    b"fLaC",
    b"ID3",
];

fn is_printable(b: u8) -> bool {
    (32..=126).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r')
}

fn has_prefix(data: &[u8], table: &[&[u8]]) -> bool {
    table.iter().any(|magic| data.starts_with(magic))
}

fn is_asset(data: &[u8]) -> bool {
    // ISO media files carry "ftyp" after the box size
    has_prefix(data, ASSET_MAGIC) || data.get(4..8) == Some(b"ftyp")
}

fn printable_ratio(data: &[u8]) -> f64 {
    let sample = &data[..data.len().min(SAMPLE_LEN)];
    if sample.is_empty() {
        return 0.0;
    }
    sample.iter().filter(|&&b| is_printable(b)).count() as f64 / sample.len() as f64
}

fn null_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().filter(|&&b| b == 0).count() as f64 / data.len() as f64
}

/// Classifies byte buffers for level selection
pub struct ContentTypeDetector;

impl ContentTypeDetector {
    pub fn detect(data: &[u8]) -> ContentType {
        if data.is_empty() {
            ContentType::Unknown
        } else if has_prefix(data, CODE_MAGIC) {
            ContentType::Code
        } else if is_asset(data) {
            ContentType::Assets
        } else if printable_ratio(data) > TEXT_THRESHOLD {
            ContentType::Text
        } else if null_ratio(data) > NULL_THRESHOLD {
            ContentType::Data
        } else {
            ContentType::Unknown
        }
    }

    /// How well `data` supports being `claimed`, in `[0, 1]`
    pub fn get_confidence(data: &[u8], claimed: ContentType) -> f64 {
        if data.is_empty() {
            return if claimed == ContentType::Unknown { 1.0 } else { 0.0 };
        }

        let evidence = match claimed {
            ContentType::Code => {
                if has_prefix(data, CODE_MAGIC) {
                    1.0
                } else {
                    0.0
                }
            }
            ContentType::Assets => {
                if is_asset(data) {
                    1.0
                } else {
                    0.0
                }
            }
            ContentType::Text => printable_ratio(data),
            ContentType::Data => null_ratio(data),
            ContentType::Unknown => {
                if Self::detect(data) == ContentType::Unknown {
                    0.5
                } else {
                    0.0
                }
            }
        };

        let confidence = if data.len() < SMALL_SAMPLE {
            evidence * 0.5
        } else {
            evidence
        };
        confidence.clamp(0.0, 1.0)
    }
}
