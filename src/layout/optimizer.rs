//! File placement over zones and block groups

use super::allocator::{BlockAllocator, GroupRecord};
use super::block::{BlockRef, BlockSize};
use super::zone::{AccessFrequency, Zone, ZoneClassifier};
use crate::compression::{ContentType, ContentTypeDetector};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Largest value accepted by the inline store
pub const INLINE_VALUE_LIMIT: usize = 4096;

/// On-grid placement of part of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: u32,
    pub block: BlockRef,
    /// Byte offset of this fragment within the file
    pub offset: u64,
    pub size: u64,
    pub primary: bool,
}

/// A placed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_id: u32,
    pub name: String,
    pub size: u64,
    pub zone: Zone,
    pub frequency: AccessFrequency,
    pub block_size: BlockSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    pub fragments: Vec<Fragment>,
}

/// Owner of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRef {
    pub file_id: u32,
    pub fragment_id: u32,
    /// Offset within the file of the first byte stored in the cell
    pub byte_offset: u64,
}

/// Exported layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutMetadata {
    pub grid_size: u32,
    pub bytes_per_pixel: usize,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub groups: Vec<GroupRecord>,
    pub fragmentation_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefragmentStats {
    pub before: f64,
    pub after: f64,
    pub improvement: f64,
    pub files_processed: usize,
}

/// Places files into zone-aware blocks of one grid
pub struct LayoutOptimizer {
    allocator: BlockAllocator,
    files: Vec<FileEntry>,
    next_file_id: u32,
    inline: BTreeMap<String, Vec<u8>>,
}

impl LayoutOptimizer {
    pub fn new(grid_size: u32, bytes_per_pixel: usize) -> Self {
        Self {
            allocator: BlockAllocator::new(grid_size, bytes_per_pixel),
            files: Vec::new(),
            next_file_id: 0,
            inline: BTreeMap::new(),
        }
    }

    /// Restore a session from an exported layout
    pub fn from_metadata(metadata: &LayoutMetadata) -> Result<Self> {
        let mut optimizer = Self::new(metadata.grid_size, metadata.bytes_per_pixel);
        let used: Vec<BlockRef> = metadata
            .files
            .iter()
            .flat_map(|f| f.fragments.iter().map(|frag| frag.block))
            .collect();
        optimizer.allocator.restore(&metadata.groups, &used)?;

        // Every fragment must resolve to cells
        for file in &metadata.files {
            for fragment in &file.fragments {
                optimizer.allocator.block_cells(fragment.block)?;
            }
        }

        optimizer.files = metadata.files.clone();
        optimizer.next_file_id = metadata
            .files
            .iter()
            .map(|f| f.file_id + 1)
            .max()
            .unwrap_or(0);
        Ok(optimizer)
    }

    pub fn grid_size(&self) -> u32 {
        self.allocator.zones().grid_size()
    }

    pub fn zones(&self) -> &ZoneClassifier {
        self.allocator.zones()
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, file_id: u32) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.file_id == file_id)
    }

    pub fn file_by_name(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Place a file of `size` bytes
    ///
    /// Zone and frequency default to the naming heuristics of
    /// [`ZoneClassifier::classify_file`]. Each allocated block carries one
    /// fragment; the first is primary.
    pub fn add_file(
        &mut self,
        name: &str,
        size: u64,
        zone: Option<Zone>,
        frequency: Option<AccessFrequency>,
    ) -> Result<FileEntry> {
        self.add_file_typed(name, size, zone, frequency, None)
    }

    /// Place a file and record the detected content type of its bytes
    pub fn add_file_bytes(
        &mut self,
        name: &str,
        data: &[u8],
        zone: Option<Zone>,
        frequency: Option<AccessFrequency>,
    ) -> Result<FileEntry> {
        let content_type = ContentTypeDetector::detect(data);
        self.add_file_typed(name, data.len() as u64, zone, frequency, Some(content_type))
    }

    /// Place a file whose content type is already known
    pub fn add_file_typed(
        &mut self,
        name: &str,
        size: u64,
        zone: Option<Zone>,
        frequency: Option<AccessFrequency>,
        content_type: Option<ContentType>,
    ) -> Result<FileEntry> {
        let (default_zone, default_frequency) = ZoneClassifier::classify_file(name, size);
        let zone = zone.unwrap_or(default_zone);
        let frequency = frequency.unwrap_or(default_frequency);

        let file_id = self.next_file_id;
        let entry = place(
            &mut self.allocator,
            file_id,
            name,
            size,
            zone,
            frequency,
            content_type,
        )?;
        self.next_file_id += 1;
        self.files.push(entry.clone());
        Ok(entry)
    }

    /// Release a file's blocks
    pub fn remove_file(&mut self, file_id: u32) -> Result<FileEntry> {
        let index = self
            .files
            .iter()
            .position(|f| f.file_id == file_id)
            .ok_or_else(|| Error::NotFound(format!("File id {}", file_id)))?;
        let entry = self.files.remove(index);
        for fragment in &entry.fragments {
            self.allocator.free(fragment.block)?;
        }
        debug!(file_id, name = %entry.name, "Removed file");
        Ok(entry)
    }

    /// Store a small value retrievable without the segment table
    pub fn set_inline_metadata(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if value.len() > INLINE_VALUE_LIMIT {
            return Err(Error::InvalidArgument(format!(
                "Inline value for {} is {} bytes, limit is {}",
                key,
                value.len(),
                INLINE_VALUE_LIMIT
            )));
        }
        self.inline.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    pub fn get_inline_metadata(&self, key: &str) -> Option<&[u8]> {
        self.inline.get(key).map(Vec::as_slice)
    }

    pub fn inline_metadata(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.inline
    }

    pub fn get_layout_metadata(&self) -> LayoutMetadata {
        LayoutMetadata {
            grid_size: self.grid_size(),
            bytes_per_pixel: self.allocator.bytes_per_pixel(),
            files: self.files.clone(),
            groups: self.allocator.group_records(),
            fragmentation_score: self.allocator.get_fragmentation_score(),
        }
    }

    /// Repack every file, largest first within each zone
    ///
    /// File ids, sizes and fragment offsets are kept; only blocks move.
    /// Running it again on the result reproduces the same layout. When the
    /// repacked files do not fit the grid, the current layout is kept and
    /// the stats report no change.
    pub fn defragment(&mut self) -> Result<DefragmentStats> {
        let before = self.allocator.get_fragmentation_score();

        let mut order: Vec<&FileEntry> = self.files.iter().collect();
        order.sort_by_key(|f| (f.zone, Reverse(f.size), f.file_id));

        // Repack into a fresh allocator; the current layout stays until all files fit
        let mut allocator = BlockAllocator::new(self.grid_size(), self.allocator.bytes_per_pixel());
        let mut placed = Vec::with_capacity(order.len());
        for file in order {
            let entry = match place(
                &mut allocator,
                file.file_id,
                &file.name,
                file.size,
                file.zone,
                file.frequency,
                file.content_type,
            ) {
                Ok(entry) => entry,
                Err(Error::Capacity {
                    required,
                    available,
                }) => {
                    warn!(
                        file_id = file.file_id,
                        name = %file.name,
                        required,
                        available,
                        "Repacked layout does not fit, keeping current layout"
                    );
                    return Ok(DefragmentStats {
                        before,
                        after: before,
                        improvement: 0.0,
                        files_processed: 0,
                    });
                }
                Err(e) => return Err(e),
            };
            placed.push(entry);
        }
        self.allocator = allocator;
        self.files = placed;

        let after = self.allocator.get_fragmentation_score();
        let stats = DefragmentStats {
            before,
            after,
            improvement: before - after,
            files_processed: self.files.len(),
        };
        info!(
            before = stats.before,
            after = stats.after,
            files = stats.files_processed,
            "Defragmented layout"
        );
        Ok(stats)
    }

    /// Cells holding a fragment's bytes, in order
    pub fn fragment_cells(&self, fragment: &Fragment) -> Result<&[(u32, u32)]> {
        let cells = self.allocator.block_cells(fragment.block)?;
        let bpp = self.allocator.bytes_per_pixel() as u64;
        let used = fragment.size.div_ceil(bpp) as usize;
        cells.get(..used).ok_or_else(|| {
            Error::Format(format!(
                "Fragment {} of {} bytes overflows {}",
                fragment.fragment_id, fragment.size, fragment.block
            ))
        })
    }

    /// Owner of every occupied cell
    pub fn get_pixel_mapping(&self) -> Result<HashMap<(u32, u32), PixelRef>> {
        let bpp = self.allocator.bytes_per_pixel() as u64;
        let mut mapping = HashMap::new();
        for file in &self.files {
            for fragment in &file.fragments {
                for (i, &cell) in self.fragment_cells(fragment)?.iter().enumerate() {
                    mapping.insert(
                        cell,
                        PixelRef {
                            file_id: file.file_id,
                            fragment_id: fragment.fragment_id,
                            byte_offset: fragment.offset + i as u64 * bpp,
                        },
                    );
                }
            }
        }
        Ok(mapping)
    }
}

/// Allocate blocks for a file and cut it into one fragment per block
fn place(
    allocator: &mut BlockAllocator,
    file_id: u32,
    name: &str,
    size: u64,
    zone: Zone,
    frequency: AccessFrequency,
    content_type: Option<ContentType>,
) -> Result<FileEntry> {
    let block_size = allocator.recommend_block_size(size, frequency);
    let blocks = allocator.allocate(size, zone, frequency)?;
    let span = block_size.bytes() as u64;

    let fragments = blocks
        .into_iter()
        .enumerate()
        .map(|(i, block)| {
            let offset = i as u64 * span;
            Fragment {
                fragment_id: i as u32,
                block,
                offset,
                size: span.min(size - offset),
                primary: i == 0,
            }
        })
        .collect::<Vec<_>>();

    debug!(
        file_id,
        name,
        size,
        %zone,
        ?frequency,
        fragments = fragments.len(),
        "Placed file"
    );

    Ok(FileEntry {
        file_id,
        name: name.to_string(),
        size,
        zone,
        frequency,
        block_size,
        content_type,
        fragments,
    })
}
