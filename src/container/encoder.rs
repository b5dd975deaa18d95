//! Payload and file-set encoding

use super::metadata::{hash_data, ContainerMetadata, SegmentRecord, RESERVED_KEYS};
use super::raster::encode_png;
use super::{INLINE_KEYWORD, METADATA_KEYWORD};
use crate::compression::{
    CompressionResult, CompressionStrategy, CompressionType, ContentType, ContentTypeDetector,
    SolidCompressor, SparseCompressor,
};
use crate::config::CodecConfig;
use crate::curve::{self, CurveCache};
use crate::error::{Error, Result};
use crate::grid::sizer::MAX_GRID_SIZE;
use crate::grid::{GridSizer, PixelGrid};
use crate::layout::{AccessFrequency, LayoutOptimizer, Zone};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A named byte range of the payload
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpec {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    /// Skips detection when set
    pub content_type: Option<ContentType>,
}

/// How a payload splits into segments, plus extra metadata
#[derive(Debug, Clone, Default)]
pub struct PayloadManifest {
    pub segments: Vec<SegmentSpec>,
    pub inline: BTreeMap<String, Vec<u8>>,
    pub extra: Map<String, Value>,
}

impl PayloadManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(mut self, name: &str, offset: u64, size: u64) -> Self {
        self.segments.push(SegmentSpec {
            name: name.to_string(),
            offset,
            size,
            content_type: None,
        });
        self
    }

    pub fn typed_segment(mut self, name: &str, offset: u64, size: u64, content_type: ContentType) -> Self {
        self.segments.push(SegmentSpec {
            name: name.to_string(),
            offset,
            size,
            content_type: Some(content_type),
        });
        self
    }

    pub fn inline(mut self, key: &str, value: &[u8]) -> Self {
        self.inline.insert(key.to_string(), value.to_vec());
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// A named file for a layout container
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub name: String,
    pub data: Vec<u8>,
    pub zone: Option<Zone>,
    pub frequency: Option<AccessFrequency>,
}

/// Files placed by zone instead of linearly
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    pub files: Vec<FileSpec>,
    pub inline: BTreeMap<String, Vec<u8>>,
    pub extra: Map<String, Value>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file classified by its name
    pub fn file(self, name: &str, data: Vec<u8>) -> Self {
        self.file_with(name, data, None, None)
    }

    pub fn file_with(
        mut self,
        name: &str,
        data: Vec<u8>,
        zone: Option<Zone>,
        frequency: Option<AccessFrequency>,
    ) -> Self {
        self.files.push(FileSpec {
            name: name.to_string(),
            data,
            zone,
            frequency,
        });
        self
    }

    pub fn inline(mut self, key: &str, value: &[u8]) -> Self {
        self.inline.insert(key.to_string(), value.to_vec());
        self
    }
}

/// Output of an encode
#[derive(Debug, Clone)]
pub struct EncodedContainer {
    /// PNG bytes with the metadata chunk embedded
    pub png: Vec<u8>,
    pub grid: PixelGrid,
    pub metadata: ContainerMetadata,
}

impl EncodedContainer {
    /// Metadata document for the `.meta.json` sidecar
    pub fn sidecar_json(&self) -> Result<String> {
        self.metadata.to_json_pretty()
    }

    /// Write the image and its sidecar; returns the sidecar path
    pub fn write_to(&self, path: &Path) -> Result<PathBuf> {
        std::fs::write(path, &self.png)?;
        let sidecar = super::metadata::sidecar_path(path);
        std::fs::write(&sidecar, self.sidecar_json()?)?;
        Ok(sidecar)
    }
}

/// Serialize a grid and its metadata into PNG bytes
pub fn write_container(grid: &PixelGrid, metadata: &ContainerMetadata) -> Result<Vec<u8>> {
    let json = metadata.to_json()?;
    let inline_json = if metadata.inline.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&metadata.inline).map_err(|e| {
            Error::Serialization(format!("Failed to serialize inline values: {}", e))
        })?)
    };

    let mut texts = vec![(METADATA_KEYWORD, json.as_str())];
    if let Some(inline) = &inline_json {
        texts.push((INLINE_KEYWORD, inline.as_str()));
    }
    encode_png(grid, &texts)
}

/// Prefix of segments covering bytes no declared segment names
const GAP_PREFIX: &str = "gap@";

/// Stored form of one segment
struct StoredSegment {
    name: String,
    offset: u64,
    hash: String,
    result: CompressionResult,
}

/// Encoding session
///
/// Owns its curve cache; create one per thread.
pub struct Encoder {
    config: CodecConfig,
    curves: CurveCache,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Encoder {
    pub fn new(config: CodecConfig) -> Self {
        let curves = CurveCache::new(config.curve_cache_capacity);
        Self { config, curves }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn curve_cache(&self) -> &CurveCache {
        &self.curves
    }

    /// Encode a payload along the curve
    ///
    /// # Arguments
    /// * `payload` - Bytes to store
    /// * `manifest` - Optional segment split, inline values and extra fields
    /// * `grid_size` - Forced grid side; must be a power of two and large enough
    pub fn encode(
        &mut self,
        payload: &[u8],
        manifest: Option<&PayloadManifest>,
        grid_size: Option<u32>,
    ) -> Result<EncodedContainer> {
        let mode = self.config.mode;
        info!(bytes = payload.len(), %mode, "Encoding payload");

        let specs = resolve_segments(payload.len() as u64, manifest.map(|m| m.segments.as_slice()))?;
        let (stored, dictionary) = self.compress_segments(payload, &specs)?;

        let mut stream = Vec::with_capacity(stored.iter().map(|s| s.result.data.len()).sum());
        let mut metadata = ContainerMetadata::new(0, mode);
        for segment in stored {
            let record = SegmentRecord {
                offset: segment.offset,
                size: segment.result.original_size as u64,
                hash: segment.hash,
                compression: segment.result.compression_type,
                level: segment.result.level,
                content_type: segment.result.content_type,
                stored_offset: stream.len() as u64,
                stored_size: segment.result.data.len() as u64,
            };
            stream.extend_from_slice(&segment.result.data);
            metadata.segments.insert(segment.name, record);
        }

        let size = self.resolve_grid_size(stream.len() as u64, grid_size)?;
        let mut grid = PixelGrid::new(size, mode)?;
        let table = self.curves.table(curve::order_of(size)?)?;
        for (chunk, &(x, y)) in stream.chunks(mode.bytes_per_pixel()).zip(table) {
            grid.put(x, y, chunk);
        }

        metadata.grid_size = size;
        metadata.data_size = Some(payload.len() as u64);
        metadata.data_hash = Some(hash_data(payload));
        metadata.stream_size = Some(stream.len() as u64);
        if let Some(dictionary) = dictionary {
            metadata.set_dictionary(&dictionary);
        }
        if let Some(manifest) = manifest {
            metadata.set_inline(&manifest.inline);
            metadata.extra = checked_extra(&manifest.extra)?;
        }

        let png = write_container(&grid, &metadata)?;
        info!(
            grid_size = size,
            segments = metadata.segments.len(),
            stream_size = stream.len(),
            png_size = png.len(),
            "Encoded payload"
        );
        Ok(EncodedContainer {
            png,
            grid,
            metadata,
        })
    }

    /// Encode named files into zone-aware blocks
    ///
    /// Without an explicit size the grid starts at the smallest that holds
    /// the stored bytes and doubles until the layout fits.
    pub fn encode_files(&mut self, files: &FileSet, grid_size: Option<u32>) -> Result<EncodedContainer> {
        let mode = self.config.mode;
        let bpp = mode.bytes_per_pixel();
        info!(files = files.files.len(), %mode, "Encoding file set");

        let mut names = HashSet::new();
        if let Some(duplicate) = files.files.iter().find(|f| !names.insert(f.name.as_str())) {
            return Err(Error::InvalidArgument(format!(
                "Duplicate file name: {}",
                duplicate.name
            )));
        }

        let stored: Vec<CompressionResult> = files
            .files
            .iter()
            .map(|f| self.compress_one(&f.data, None))
            .collect::<Result<_>>()?;
        let stored_total: u64 = stored.iter().map(|r| r.data.len() as u64).sum();

        let layout = match grid_size {
            Some(size) => {
                check_power_of_two(size)?;
                self.layout_files(files, &stored, size)?
            }
            None => {
                let mut size = GridSizer::new(bpp, self.config.grid_slack_bytes).grid_size(stored_total);
                loop {
                    match self.layout_files(files, &stored, size) {
                        Ok(layout) => break layout,
                        Err(Error::Capacity { .. }) if size < MAX_GRID_SIZE => {
                            debug!(grid_size = size, "Layout does not fit, doubling grid");
                            size *= 2;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        let size = layout.grid_size();
        let mut grid = PixelGrid::new(size, mode)?;

        // Stored bytes of each fragment end here
        let mut fragment_end = HashMap::new();
        for entry in layout.files() {
            for fragment in &entry.fragments {
                fragment_end.insert(
                    (entry.file_id, fragment.fragment_id),
                    fragment.offset + fragment.size,
                );
            }
        }
        for ((x, y), owner) in layout.get_pixel_mapping()? {
            let data = &stored[owner.file_id as usize].data;
            let end = fragment_end
                .get(&(owner.file_id, owner.fragment_id))
                .copied()
                .unwrap_or(data.len() as u64)
                .min(owner.byte_offset + bpp as u64);
            grid.put(x, y, &data[owner.byte_offset as usize..end as usize]);
        }

        let mut metadata = ContainerMetadata::new(size, mode);
        let mut payload_offset = 0u64;
        let mut joined = Vec::with_capacity(files.files.iter().map(|f| f.data.len()).sum());
        for (file, result) in files.files.iter().zip(&stored) {
            metadata.segments.insert(
                file.name.clone(),
                SegmentRecord {
                    offset: payload_offset,
                    size: file.data.len() as u64,
                    hash: hash_data(&file.data),
                    compression: result.compression_type,
                    level: result.level,
                    content_type: result.content_type,
                    stored_offset: 0,
                    stored_size: result.data.len() as u64,
                },
            );
            payload_offset += file.data.len() as u64;
            joined.extend_from_slice(&file.data);
        }
        metadata.data_size = Some(payload_offset);
        metadata.data_hash = Some(hash_data(&joined));
        metadata.set_inline(layout.inline_metadata());
        metadata.layout = Some(layout.get_layout_metadata());
        metadata.extra = checked_extra(&files.extra)?;

        let png = write_container(&grid, &metadata)?;
        info!(
            grid_size = size,
            files = files.files.len(),
            fragmentation = layout.allocator().get_fragmentation_score(),
            png_size = png.len(),
            "Encoded file set"
        );
        Ok(EncodedContainer {
            png,
            grid,
            metadata,
        })
    }

    fn layout_files(
        &self,
        files: &FileSet,
        stored: &[CompressionResult],
        grid_size: u32,
    ) -> Result<LayoutOptimizer> {
        let mut layout = LayoutOptimizer::new(grid_size, self.config.mode.bytes_per_pixel());
        for (file, result) in files.files.iter().zip(stored) {
            layout.add_file_typed(
                &file.name,
                result.data.len() as u64,
                file.zone,
                file.frequency,
                Some(result.content_type),
            )?;
        }
        for (key, value) in &files.inline {
            layout.set_inline_metadata(key, value)?;
        }
        Ok(layout)
    }

    fn resolve_grid_size(&self, stream_len: u64, grid_size: Option<u32>) -> Result<u32> {
        let sizer = GridSizer::new(self.config.mode.bytes_per_pixel(), self.config.grid_slack_bytes);
        let size = match grid_size {
            Some(size) => {
                check_power_of_two(size)?;
                size
            }
            None => sizer.grid_size(stream_len),
        };
        let available = sizer.capacity(size);
        if available < stream_len {
            return Err(Error::Capacity {
                required: stream_len,
                available,
            });
        }
        Ok(size)
    }

    /// Compress every segment, sharing a dictionary when they are many and small
    fn compress_segments(
        &self,
        payload: &[u8],
        specs: &[SegmentSpec],
    ) -> Result<(Vec<StoredSegment>, Option<Vec<u8>>)> {
        let solid = &self.config.solid;
        let use_solid = self.config.should_compress()
            && specs.len() >= solid.min_segments
            && specs
                .iter()
                .all(|s| s.size > 0 && s.size as usize <= solid.max_segment_size);

        let (strategy, dictionary) = if use_solid {
            let samples: Vec<&[u8]> = specs.iter().map(|s| segment_bytes(payload, s)).collect();
            let compressor = SolidCompressor::train(&samples);
            let dictionary = compressor.dictionary().to_vec();
            (Some(CompressionStrategy::Solid(compressor)), Some(dictionary))
        } else {
            (None, None)
        };

        let mut stored = Vec::with_capacity(specs.len());
        let mut uses_dictionary = false;
        for spec in specs {
            let data = segment_bytes(payload, spec);
            let result = match &strategy {
                Some(strategy) => {
                    let content_type = spec
                        .content_type
                        .unwrap_or_else(|| ContentTypeDetector::detect(data));
                    raw_if_larger(data, strategy.compress(data, Some(content_type))?)
                }
                None => self.compress_one(data, spec.content_type)?,
            };
            uses_dictionary |= result.compression_type == CompressionType::ZstdDictionary;
            debug!(
                segment = %spec.name,
                size = spec.size,
                stored = result.data.len(),
                compression = ?result.compression_type,
                "Stored segment"
            );
            stored.push(StoredSegment {
                name: spec.name.clone(),
                offset: spec.offset,
                hash: hash_data(data),
                result,
            });
        }

        Ok((stored, dictionary.filter(|_| uses_dictionary)))
    }

    /// Compress one buffer, keeping it raw when that is smaller
    fn compress_one(&self, data: &[u8], content_type: Option<ContentType>) -> Result<CompressionResult> {
        let content_type = content_type.unwrap_or_else(|| ContentTypeDetector::detect(data));
        if !self.config.should_compress() || data.is_empty() {
            return Ok(CompressionResult::stored(data, content_type));
        }

        let adaptive = CompressionStrategy::Adaptive(self.config.adaptive_compressor());
        let mut best = adaptive.compress(data, Some(content_type))?;
        if content_type == ContentType::Data {
            let sparse = CompressionStrategy::Sparse(SparseCompressor::new(self.config.sparse_min_run))
                .compress(data, Some(content_type))?;
            if sparse.data.len() < best.data.len() {
                best = sparse;
            }
        }
        Ok(raw_if_larger(data, best))
    }
}

fn segment_bytes<'a>(payload: &'a [u8], spec: &SegmentSpec) -> &'a [u8] {
    &payload[spec.offset as usize..(spec.offset + spec.size) as usize]
}

fn raw_if_larger(data: &[u8], result: CompressionResult) -> CompressionResult {
    if result.data.len() >= data.len() {
        CompressionResult::stored(data, result.content_type)
    } else {
        result
    }
}

fn check_power_of_two(size: u32) -> Result<()> {
    if size == 0 || !size.is_power_of_two() || size > MAX_GRID_SIZE {
        return Err(Error::Format(format!(
            "Grid size must be a power of two up to {}, got {}",
            MAX_GRID_SIZE, size
        )));
    }
    Ok(())
}

fn checked_extra(extra: &Map<String, Value>) -> Result<Map<String, Value>> {
    if let Some(key) = extra.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
        return Err(Error::InvalidArgument(format!(
            "Metadata field {} is reserved",
            key
        )));
    }
    Ok(extra.clone())
}

/// Validate declared segments and cover any gaps with generated ones
fn resolve_segments(payload_len: u64, declared: Option<&[SegmentSpec]>) -> Result<Vec<SegmentSpec>> {
    let declared = match declared {
        Some(segments) if !segments.is_empty() => segments,
        _ => {
            return Ok(vec![SegmentSpec {
                name: "data".to_string(),
                offset: 0,
                size: payload_len,
                content_type: None,
            }]);
        }
    };

    // Generated names must not collide with declared ones
    if let Some(reserved) = declared.iter().find(|s| s.name.starts_with(GAP_PREFIX)) {
        return Err(Error::InvalidArgument(format!(
            "Segment name {} is reserved",
            reserved.name
        )));
    }

    let mut names = HashSet::new();
    let mut sorted: Vec<&SegmentSpec> = declared.iter().collect();
    sorted.sort_by_key(|s| s.offset);

    let mut resolved = Vec::with_capacity(sorted.len() + 1);
    let mut cursor = 0u64;
    for spec in sorted {
        if !names.insert(spec.name.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "Duplicate segment name: {}",
                spec.name
            )));
        }
        let end = spec.offset.checked_add(spec.size).unwrap_or(u64::MAX);
        if end > payload_len {
            return Err(Error::InvalidArgument(format!(
                "Segment {} ends at {} beyond payload of {} bytes",
                spec.name, end, payload_len
            )));
        }
        if spec.offset < cursor {
            return Err(Error::InvalidArgument(format!(
                "Segment {} overlaps the previous segment",
                spec.name
            )));
        }
        if spec.offset > cursor {
            resolved.push(gap_segment(cursor, spec.offset - cursor));
        }
        resolved.push(spec.clone());
        cursor = end;
    }
    if cursor < payload_len {
        resolved.push(gap_segment(cursor, payload_len - cursor));
    }

    Ok(resolved)
}

fn gap_segment(offset: u64, size: u64) -> SegmentSpec {
    SegmentSpec {
        name: format!("{}{}", GAP_PREFIX, offset),
        offset,
        size,
        content_type: None,
    }
}
