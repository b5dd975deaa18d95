//! Container decoding

use super::metadata::{decode_inline, hash_data, sidecar_path, ContainerMetadata, SegmentRecord};
use super::raster::{decode_png, read_texts};
use super::{INLINE_KEYWORD, METADATA_KEYWORD};
use crate::compression;
use crate::config::CodecConfig;
use crate::curve::{self, CurveCache};
use crate::error::{Error, Result};
use crate::grid::{EncodingMode, PixelGrid};
use crate::layout::{LayoutMetadata, LayoutOptimizer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Per-call decode settings
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Length the caller expects back
    pub expected_size: Option<u64>,
    /// Check recorded hashes
    pub verify: bool,
    /// Used when the image carries no metadata chunk
    pub sidecar: Option<ContainerMetadata>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            expected_size: None,
            verify: true,
            sidecar: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub payload: Vec<u8>,
    pub metadata: ContainerMetadata,
}

/// Decoding session
pub struct Decoder {
    config: CodecConfig,
    curves: CurveCache,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Decoder {
    pub fn new(config: CodecConfig) -> Self {
        let curves = CurveCache::new(config.curve_cache_capacity);
        Self { config, curves }
    }

    pub fn curve_cache(&self) -> &CurveCache {
        &self.curves
    }

    /// Recover the payload of a container
    pub fn decode(&mut self, bytes: &[u8], expected_size: Option<u64>) -> Result<Vec<u8>> {
        let options = DecodeOptions {
            expected_size,
            verify: self.config.verify_on_decode,
            sidecar: None,
        };
        Ok(self.decode_with(bytes, &options)?.payload)
    }

    /// Decode a container file, reading its `.meta.json` sidecar when present
    pub fn decode_path(&mut self, path: &Path) -> Result<Decoded> {
        let bytes = std::fs::read(path)?;
        let sidecar = sidecar_path(path);
        let sidecar = if sidecar.exists() {
            Some(ContainerMetadata::from_json(&std::fs::read(&sidecar)?)?)
        } else {
            None
        };
        let options = DecodeOptions {
            verify: self.config.verify_on_decode,
            sidecar,
            ..DecodeOptions::default()
        };
        self.decode_with(&bytes, &options)
    }

    pub fn decode_with(&mut self, bytes: &[u8], options: &DecodeOptions) -> Result<Decoded> {
        let (grid, metadata) = open(bytes, options.sidecar.as_ref())?;
        info!(
            grid_size = metadata.grid_size,
            mode = %metadata.encoding_mode,
            segments = metadata.segments.len(),
            "Decoding container"
        );

        let payload = if let Some(layout) = &metadata.layout {
            let files = read_layout_files(&grid, &metadata, layout, options.verify)?;
            assemble(&metadata, files)?
        } else if !metadata.segments.is_empty() {
            self.read_segments(&grid, &metadata, options.verify)?
        } else {
            self.read_legacy(&grid, &metadata, options.expected_size)?
        };

        if let Some(expected) = options.expected_size {
            if expected != payload.len() as u64 {
                return Err(Error::SizeMismatch {
                    expected,
                    actual: payload.len() as u64,
                });
            }
        }
        if options.verify {
            if let Some(expected) = &metadata.data_hash {
                check_hash("payload", expected, &payload)?;
            }
        }

        info!(bytes = payload.len(), "Decoded container");
        Ok(Decoded { payload, metadata })
    }

    /// Recover each named file of a layout container
    ///
    /// Linear containers yield their segments instead.
    pub fn decode_files(
        &mut self,
        bytes: &[u8],
        sidecar: Option<&ContainerMetadata>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let (grid, metadata) = open(bytes, sidecar)?;
        let verify = self.config.verify_on_decode;
        match &metadata.layout {
            Some(layout) => read_layout_files(&grid, &metadata, layout, verify),
            None => {
                let stream = self.read_stream(&grid, &metadata)?;
                let dictionary = metadata.dictionary_bytes()?;
                metadata
                    .segments_by_payload_offset()
                    .into_iter()
                    .map(|(name, record)| {
                        let data = restore_segment(name, record, &stream, dictionary.as_deref(), verify)?;
                        Ok((name.clone(), data))
                    })
                    .collect()
            }
        }
    }

    fn read_segments(&mut self, grid: &PixelGrid, metadata: &ContainerMetadata, verify: bool) -> Result<Vec<u8>> {
        let stream = self.read_stream(grid, metadata)?;
        let dictionary = metadata.dictionary_bytes()?;
        let mut files = Vec::with_capacity(metadata.segments.len());
        for (name, record) in metadata.segments_by_payload_offset() {
            let data = restore_segment(name, record, &stream, dictionary.as_deref(), verify)?;
            files.push((name.clone(), data));
        }
        assemble(metadata, files)
    }

    /// Bytes placed along the curve, up to the recorded stream length
    fn read_stream(&mut self, grid: &PixelGrid, metadata: &ContainerMetadata) -> Result<Vec<u8>> {
        let len = metadata.stream_size.unwrap_or_else(|| {
            metadata
                .segments
                .values()
                .map(|r| r.stored_range().end)
                .max()
                .unwrap_or(0)
        });
        let capacity = grid.capacity();
        if len > capacity {
            return Err(Error::Format(format!(
                "Stream of {} bytes exceeds grid capacity {}",
                len, capacity
            )));
        }
        let mut stream = self.read_curve(grid)?;
        stream.truncate(len as usize);
        Ok(stream)
    }

    fn read_legacy(
        &mut self,
        grid: &PixelGrid,
        metadata: &ContainerMetadata,
        expected_size: Option<u64>,
    ) -> Result<Vec<u8>> {
        let mut data = self.read_curve(grid)?;
        match metadata.data_size.or(expected_size) {
            Some(len) => {
                if len > data.len() as u64 {
                    return Err(Error::SizeMismatch {
                        expected: len,
                        actual: data.len() as u64,
                    });
                }
                data.truncate(len as usize);
            }
            None => {
                warn!("Container records no payload size, trimming trailing padding");
                let free = grid.mode().free_pixel();
                let bpp = grid.mode().bytes_per_pixel();
                if grid.mode() == EncodingMode::Code {
                    while data.len() >= bpp && data[data.len() - bpp..] == *free {
                        data.truncate(data.len() - bpp);
                    }
                }
                while data.last() == Some(&0) {
                    data.pop();
                }
            }
        }
        Ok(data)
    }

    /// Every cell's bytes in curve order
    fn read_curve(&mut self, grid: &PixelGrid) -> Result<Vec<u8>> {
        let table = self.curves.table(curve::order_of(grid.size())?)?;
        let mut data = Vec::with_capacity(grid.capacity() as usize);
        for &(x, y) in table {
            data.extend_from_slice(grid.pixel(x, y));
        }
        Ok(data)
    }
}

/// Embedded or sidecar metadata
///
/// Returns just the inline values, decoding no pixel data.
pub fn read_inline(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let texts = read_texts(bytes)?;
    if let Some(inline) = texts.get(INLINE_KEYWORD) {
        let values: BTreeMap<String, String> = serde_json::from_str(inline)
            .map_err(|e| Error::Format(format!("Invalid inline chunk: {}", e)))?;
        return decode_inline(&values);
    }
    match texts.get(METADATA_KEYWORD) {
        Some(json) => ContainerMetadata::from_json(json.as_bytes())?.inline_bytes(),
        None => Ok(BTreeMap::new()),
    }
}

/// Parse the image and pick its metadata
fn open(bytes: &[u8], sidecar: Option<&ContainerMetadata>) -> Result<(PixelGrid, ContainerMetadata)> {
    let image = decode_png(bytes)?;
    let metadata = match image.texts.get(METADATA_KEYWORD) {
        Some(json) => ContainerMetadata::from_json(json.as_bytes())?,
        None => {
            debug!("No embedded metadata, using sidecar");
            sidecar
                .cloned()
                .ok_or_else(|| Error::Format("Container has no metadata".to_string()))?
        }
    };

    if image.grid.size() != metadata.grid_size {
        return Err(Error::Format(format!(
            "Image is {}x{} but metadata records grid size {}",
            image.grid.size(),
            image.grid.size(),
            metadata.grid_size
        )));
    }
    if image.grid.mode() != metadata.encoding_mode {
        return Err(Error::Format(format!(
            "Image is {} but metadata records {}",
            image.grid.mode(),
            metadata.encoding_mode
        )));
    }
    Ok((image.grid, metadata))
}

fn restore_segment(
    name: &str,
    record: &SegmentRecord,
    stream: &[u8],
    dictionary: Option<&[u8]>,
    verify: bool,
) -> Result<Vec<u8>> {
    let range = record.stored_range();
    let stored = stream
        .get(range.start as usize..range.end as usize)
        .ok_or_else(|| {
            Error::Format(format!(
                "Segment {} stored at {:?} beyond stream of {} bytes",
                name,
                range,
                stream.len()
            ))
        })?;
    let data = compression::decompress(stored, record.compression, record.size as usize, dictionary)?;
    if verify {
        check_hash(name, &record.hash, &data)?;
    }
    Ok(data)
}

/// Files of a layout container, in payload order
fn read_layout_files(
    grid: &PixelGrid,
    metadata: &ContainerMetadata,
    layout: &LayoutMetadata,
    verify: bool,
) -> Result<Vec<(String, Vec<u8>)>> {
    let optimizer = LayoutOptimizer::from_metadata(layout)?;
    let dictionary = metadata.dictionary_bytes()?;
    let bpp = grid.mode().bytes_per_pixel();
    if layout.bytes_per_pixel != bpp {
        return Err(Error::Format(format!(
            "Layout packs {} bytes per cell, image holds {}",
            layout.bytes_per_pixel, bpp
        )));
    }

    let mut files = Vec::with_capacity(layout.files.len());
    for (name, record) in metadata.segments_by_payload_offset() {
        let entry = optimizer
            .file_by_name(name)
            .ok_or_else(|| Error::Format(format!("Segment {} has no layout entry", name)))?;

        let mut stored = Vec::with_capacity((entry.size as usize).min(grid.as_bytes().len()));
        let mut fragments: Vec<_> = entry.fragments.iter().collect();
        fragments.sort_by_key(|f| f.offset);
        for fragment in fragments {
            let start = stored.len();
            for &(x, y) in optimizer.fragment_cells(fragment)? {
                stored.extend_from_slice(grid.pixel(x, y));
            }
            stored.truncate(start + fragment.size as usize);
        }

        let data = compression::decompress(&stored, record.compression, record.size as usize, dictionary.as_deref())?;
        if verify {
            check_hash(name, &record.hash, &data)?;
        }
        files.push((name.clone(), data));
    }
    Ok(files)
}

/// Join segments at their recorded payload offsets
///
/// Segments must tile the payload: each starts where the previous one
/// ends, and the last ends at the recorded data size.
fn assemble(metadata: &ContainerMetadata, parts: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>> {
    let mut placed = Vec::with_capacity(parts.len());
    for (name, data) in parts {
        let record = metadata
            .segments
            .get(&name)
            .ok_or_else(|| Error::Format(format!("Segment {} has no record", name)))?;
        placed.push((record.offset, name, data));
    }
    placed.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    let mut end = 0u64;
    for (offset, name, data) in &placed {
        if *offset != end {
            return Err(Error::Format(format!(
                "Segment {} starts at {}, expected {}",
                name, offset, end
            )));
        }
        end = offset.checked_add(data.len() as u64).ok_or_else(|| {
            Error::Format(format!("Segment {} at {} overflows the payload", name, offset))
        })?;
    }
    if let Some(expected) = metadata.data_size {
        if expected != end {
            return Err(Error::SizeMismatch {
                expected,
                actual: end,
            });
        }
    }

    let mut payload = Vec::with_capacity(end as usize);
    for (_, _, data) in placed {
        payload.extend_from_slice(&data);
    }
    Ok(payload)
}

fn check_hash(segment: &str, expected: &str, data: &[u8]) -> Result<()> {
    let actual = hash_data(data);
    if actual != expected {
        return Err(Error::Integrity {
            segment: segment.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
