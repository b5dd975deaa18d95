//! Container metadata record
//!
//! Embedded as a raster text chunk and written as a `.meta.json` sidecar.

use crate::compression::{CompressionLevel, CompressionType, ContentType};
use crate::error::{Error, Result};
use crate::grid::EncodingMode;
use crate::layout::LayoutMetadata;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const FORMAT_ID: &str = "PixelRTS-2.0";
pub const FORMAT_VERSION: u32 = 2;

/// Keys owned by the record; caller fields may not use them
pub const RESERVED_KEYS: &[&str] = &[
    "format",
    "version",
    "grid_size",
    "encoding_mode",
    "segments",
    "data_size",
    "data_hash",
    "stream_size",
    "dictionary",
    "layout",
    "inline",
];

/// Lowercase hex SHA-256
pub fn hash_data(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn default_level() -> CompressionLevel {
    CompressionLevel::None
}

/// A named range of the payload and where its stored bytes live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// Offset in the original payload
    pub offset: u64,
    /// Original length
    pub size: u64,
    /// Hash of the original bytes
    pub hash: String,
    #[serde(default)]
    pub compression: CompressionType,
    #[serde(default = "default_level")]
    pub level: CompressionLevel,
    #[serde(default)]
    pub content_type: ContentType,
    /// Offset in the placed stream
    #[serde(default)]
    pub stored_offset: u64,
    #[serde(default)]
    pub stored_size: u64,
}

impl SegmentRecord {
    /// Range of the placed stream holding this segment
    ///
    /// Records written without stored positions describe raw bytes at
    /// their payload offset.
    pub fn stored_range(&self) -> Range<u64> {
        if self.stored_size == 0 && self.compression == CompressionType::None {
            self.offset..self.offset.saturating_add(self.size)
        } else {
            self.stored_offset..self.stored_offset.saturating_add(self.stored_size)
        }
    }
}

/// Everything needed to rebuild the payload from the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub format: String,
    pub version: u32,
    pub grid_size: u32,
    pub encoding_mode: EncodingMode,
    #[serde(default)]
    pub segments: BTreeMap<String, SegmentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    /// Bytes placed on the grid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_size: Option<u64>,
    /// Base64 solid-compression dictionary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutMetadata>,
    /// Base64 inline values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inline: BTreeMap<String, String>,
    /// Caller-supplied fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerMetadata {
    pub fn new(grid_size: u32, encoding_mode: EncodingMode) -> Self {
        Self {
            format: FORMAT_ID.to_string(),
            version: FORMAT_VERSION,
            grid_size,
            encoding_mode,
            segments: BTreeMap::new(),
            data_size: None,
            data_hash: None,
            stream_size: None,
            dictionary: None,
            layout: None,
            inline: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize metadata: {}", e)))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize metadata: {}", e)))
    }

    /// Parse and check the format id
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let metadata: ContainerMetadata = serde_json::from_slice(bytes)
            .map_err(|e| Error::Format(format!("Invalid metadata: {}", e)))?;
        if !metadata.format.starts_with("PixelRTS") {
            return Err(Error::Format(format!(
                "Not a PixelRTS container: {}",
                metadata.format
            )));
        }
        Ok(metadata)
    }

    /// Segments ordered by their position in the placed stream
    pub fn segments_by_stream_offset(&self) -> Vec<(&String, &SegmentRecord)> {
        let mut segments: Vec<_> = self.segments.iter().collect();
        segments.sort_by_key(|(name, record)| (record.stored_range().start, *name));
        segments
    }

    /// Segments ordered by their offset in the payload
    pub fn segments_by_payload_offset(&self) -> Vec<(&String, &SegmentRecord)> {
        let mut segments: Vec<_> = self.segments.iter().collect();
        segments.sort_by_key(|(name, record)| (record.offset, *name));
        segments
    }

    pub fn set_dictionary(&mut self, dictionary: &[u8]) {
        self.dictionary = Some(B64.encode(dictionary));
    }

    pub fn dictionary_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.dictionary
            .as_deref()
            .map(|encoded| {
                B64.decode(encoded)
                    .map_err(|e| Error::Serialization(format!("Invalid dictionary: {}", e)))
            })
            .transpose()
    }

    pub fn set_inline(&mut self, values: &BTreeMap<String, Vec<u8>>) {
        self.inline = encode_inline(values);
    }

    pub fn inline_bytes(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        decode_inline(&self.inline)
    }
}

pub(crate) fn encode_inline(values: &BTreeMap<String, Vec<u8>>) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), B64.encode(v)))
        .collect()
}

pub(crate) fn decode_inline(values: &BTreeMap<String, String>) -> Result<BTreeMap<String, Vec<u8>>> {
    values
        .iter()
        .map(|(k, v)| {
            B64.decode(v)
                .map(|bytes| (k.clone(), bytes))
                .map_err(|e| Error::Serialization(format!("Invalid inline value {}: {}", k, e)))
        })
        .collect()
}

/// Sidecar document path for a container path
///
/// `x.rts.png` and `x.png` become `x.meta.json`; anything else gets
/// `.meta.json` appended.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".rts.png")
        .or_else(|| name.strip_suffix(".png"))
        .unwrap_or(&name);
    path.with_file_name(format!("{}.meta.json", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_data() {
        assert_eq!(
            hash_data(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(hash_data(&[]).len(), 64);
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("out/kernel.rts.png")),
            PathBuf::from("out/kernel.meta.json")
        );
        assert_eq!(sidecar_path(Path::new("a.png")), PathBuf::from("a.meta.json"));
        assert_eq!(sidecar_path(Path::new("blob.bin")), PathBuf::from("blob.bin.meta.json"));
    }

    #[test]
    fn test_json_round_trip_keeps_extra_fields() -> Result<()> {
        let mut metadata = ContainerMetadata::new(64, EncodingMode::Code);
        metadata.data_size = Some(11);
        metadata.data_hash = Some(hash_data(b"hello world"));
        metadata
            .extra
            .insert("name".to_string(), Value::String("demo".to_string()));
        metadata.set_dictionary(&[1, 2, 3]);

        let json = metadata.to_json()?;
        assert!(json.contains("\"encoding_mode\":\"RGBA-code\""));
        assert!(json.contains("\"name\":\"demo\""));

        let parsed = ContainerMetadata::from_json(json.as_bytes())?;
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.dictionary_bytes()?, Some(vec![1, 2, 3]));
        Ok(())
    }

    #[test]
    fn test_legacy_record_without_segments() -> Result<()> {
        let json = br#"{"format":"PixelRTS-2.0","version":2,"grid_size":4,"encoding_mode":"RGB-dense","data_size":5}"#;
        let parsed = ContainerMetadata::from_json(json)?;
        assert!(parsed.segments.is_empty());
        assert_eq!(parsed.data_size, Some(5));
        Ok(())
    }

    #[test]
    fn test_rejects_foreign_format() {
        let json = br#"{"format":"Other","version":1,"grid_size":4,"encoding_mode":"RGB-dense"}"#;
        assert!(matches!(
            ContainerMetadata::from_json(json),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_stored_range_defaults_to_payload_range() {
        let record = SegmentRecord {
            offset: 10,
            size: 5,
            hash: String::new(),
            compression: CompressionType::None,
            level: CompressionLevel::None,
            content_type: ContentType::Unknown,
            stored_offset: 0,
            stored_size: 0,
        };
        assert_eq!(record.stored_range(), 10..15);
    }

    #[test]
    fn test_inline_values() -> Result<()> {
        let mut metadata = ContainerMetadata::new(2, EncodingMode::Dense);
        let mut values = BTreeMap::new();
        values.insert("cmdline".to_string(), b"quiet".to_vec());
        metadata.set_inline(&values);
        assert_eq!(metadata.inline["cmdline"], "cXVpZXQ=");
        assert_eq!(metadata.inline_bytes()?, values);
        Ok(())
    }
}
