//! Zone-aware block allocator

use super::block::{BlockGroup, BlockRef, BlockSize, Extent, GROUP_SPAN};
use super::zone::{AccessFrequency, Zone, ZoneClassifier};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Block allocator over the zones of one grid
///
/// Groups are created lazily per (zone, block size) and grow by reserving
/// further cells of their zone. When a zone runs out of cells the
/// allocation spills to the next cooler zone, then to hotter ones.
pub struct BlockAllocator {
    zones: ZoneClassifier,
    bytes_per_pixel: usize,
    /// Groups, indexed by id
    groups: Vec<BlockGroup>,
    by_class: HashMap<(Zone, BlockSize), u32>,
    /// Cells reserved so far in each zone
    zone_cursor: [usize; 5],
}

impl BlockAllocator {
    /// Create an allocator for a grid
    ///
    /// # Arguments
    /// * `grid_size` - Side of the square grid
    /// * `bytes_per_pixel` - Payload bytes per cell (3 dense, 4 code)
    pub fn new(grid_size: u32, bytes_per_pixel: usize) -> Self {
        info!(grid_size, bytes_per_pixel, "Initializing block allocator");
        Self {
            zones: ZoneClassifier::new(grid_size),
            bytes_per_pixel: bytes_per_pixel.max(1),
            groups: Vec::new(),
            by_class: HashMap::new(),
            zone_cursor: [0; 5],
        }
    }

    pub fn zones(&self) -> &ZoneClassifier {
        &self.zones
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Block size for a file: grows with size and with criticality
    ///
    /// CRITICAL always gets the largest block; other files under 1KB get
    /// the smallest.
    pub fn recommend_block_size(&self, file_size: u64, frequency: AccessFrequency) -> BlockSize {
        if frequency == AccessFrequency::Critical {
            return BlockSize::MAX;
        }
        let tier = match file_size {
            0..=1023 => return BlockSize::MIN,
            1024..=4095 => 1,
            4096..=16_383 => 2,
            16_384..=65_535 => 3,
            65_536..=262_143 => 4,
            262_144..=1_048_575 => 5,
            _ => 6,
        };
        let boost = match frequency {
            AccessFrequency::Critical | AccessFrequency::High => 2,
            AccessFrequency::Medium => 1,
            AccessFrequency::Low | AccessFrequency::Rare => 0,
        };
        BlockSize::from_index(tier + boost)
    }

    /// Allocate enough blocks to hold `size` bytes
    ///
    /// Returns the blocks in order; their groups may lie in a different zone
    /// than requested when `zone` is full.
    pub fn allocate(
        &mut self,
        size: u64,
        zone: Zone,
        frequency: AccessFrequency,
    ) -> Result<Vec<BlockRef>> {
        let block_size = self.recommend_block_size(size, frequency);
        let mut needed = size.div_ceil(block_size.bytes() as u64);
        let mut blocks = Vec::with_capacity(needed as usize);

        for candidate in zone.spill_order() {
            while needed > 0 {
                match self.allocate_in_zone(candidate, block_size) {
                    Some(block) => {
                        blocks.push(block);
                        needed -= 1;
                    }
                    None => break,
                }
            }
            if needed == 0 {
                break;
            }
        }

        if needed > 0 {
            let allocated = blocks.len() as u64 * block_size.bytes() as u64;
            for block in blocks {
                self.free(block)?;
            }
            return Err(Error::Capacity {
                required: size,
                available: allocated,
            });
        }

        debug!(size, %zone, ?block_size, blocks = blocks.len(), "Allocated blocks");
        Ok(blocks)
    }

    /// Free a previously allocated block
    pub fn free(&mut self, block: BlockRef) -> Result<()> {
        let group = self
            .groups
            .get_mut(block.group as usize)
            .ok_or_else(|| Error::NotFound(format!("Invalid block group: {}", block.group)))?;

        if !group.free(block.block) {
            return Err(Error::InvalidArgument(format!(
                "{} is not allocated",
                block
            )));
        }
        debug!("Freed {}", block);
        Ok(())
    }

    /// Share of reserved blocks that are holes below a group's high-water mark
    ///
    /// 0.0 when every group is packed from the front, approaching 1.0 as
    /// free blocks scatter between used ones.
    pub fn get_fragmentation_score(&self) -> f64 {
        let total: u64 = self.groups.iter().map(|g| g.total_blocks() as u64).sum();
        if total == 0 {
            return 0.0;
        }
        let holes: u64 = self.groups.iter().map(|g| g.hole_count() as u64).sum();
        holes as f64 / total as f64
    }

    pub fn group(&self, id: u32) -> Option<&BlockGroup> {
        self.groups.get(id as usize)
    }

    pub fn groups(&self) -> &[BlockGroup] {
        &self.groups
    }

    /// Grid cells covered by a block, in placement order
    pub fn block_cells(&self, block: BlockRef) -> Result<&[(u32, u32)]> {
        let group = self
            .group(block.group)
            .ok_or_else(|| Error::NotFound(format!("Invalid block group: {}", block.group)))?;
        let range = group
            .block_cells(block.block)
            .ok_or_else(|| Error::NotFound(format!("{} is outside its group", block)))?;
        let cells = self.zones.zone_cells(group.zone);
        cells.get(range.clone()).ok_or_else(|| {
            Error::Format(format!(
                "{} spans cells {:?} beyond zone {} ({} cells)",
                block,
                range,
                group.zone,
                cells.len()
            ))
        })
    }

    /// Drop every group and reservation
    pub fn reset(&mut self) {
        self.groups.clear();
        self.by_class.clear();
        self.zone_cursor = [0; 5];
    }

    /// Rebuild groups from exported records and the blocks in use
    pub fn restore(&mut self, records: &[GroupRecord], used: &[BlockRef]) -> Result<()> {
        self.reset();
        for (expected_id, record) in records.iter().enumerate() {
            if record.group_id as usize != expected_id {
                return Err(Error::Format(format!(
                    "Block groups out of order: expected id {}, got {}",
                    expected_id, record.group_id
                )));
            }
            let mut group = BlockGroup::new(
                record.group_id,
                record.zone,
                record.block_size,
                self.bytes_per_pixel,
            );
            let capacity = self.zones.zone_capacity(record.zone);
            for extent in &record.extents {
                let end = extent.start_cell + extent.block_count as usize * group.cells_per_block;
                if end > capacity {
                    return Err(Error::Format(format!(
                        "Group {} extent ends at cell {} beyond zone {} ({} cells)",
                        record.group_id, end, record.zone, capacity
                    )));
                }
                let cursor = &mut self.zone_cursor[record.zone.index()];
                *cursor = (*cursor).max(end);
                group.extend(extent.start_cell, extent.block_count);
            }
            let in_group: Vec<u32> = used
                .iter()
                .filter(|b| b.group == record.group_id)
                .map(|b| b.block)
                .collect();
            if !group.restore_used(&in_group) {
                return Err(Error::Format(format!(
                    "Group {} references blocks beyond its extents",
                    record.group_id
                )));
            }
            self.by_class
                .insert((record.zone, record.block_size), record.group_id);
            self.groups.push(group);
        }
        Ok(())
    }

    /// Export group geometry
    pub fn group_records(&self) -> Vec<GroupRecord> {
        self.groups
            .iter()
            .map(|g| GroupRecord {
                group_id: g.id,
                zone: g.zone,
                block_size: g.block_size,
                utilization: g.utilization(),
                extents: g.extents().to_vec(),
            })
            .collect()
    }

    /// Get statistics about the allocator
    pub fn stats(&self) -> AllocatorStats {
        let mut stats = AllocatorStats::default();

        for g in &self.groups {
            let group_stats = GroupStats {
                id: g.id,
                zone: g.zone,
                block_size: g.block_size,
                total_blocks: g.total_blocks(),
                free_blocks: g.free_count(),
                allocated_blocks: g.allocated_count(),
            };
            stats.groups.push(group_stats);
            stats.total_allocated += group_stats.allocated_blocks as u64 * g.block_size.bytes() as u64;
        }
        stats.fragmentation_score = self.get_fragmentation_score();

        stats
    }

    fn group_for(&mut self, zone: Zone, block_size: BlockSize) -> u32 {
        if let Some(&id) = self.by_class.get(&(zone, block_size)) {
            return id;
        }
        let id = self.groups.len() as u32;
        self.groups
            .push(BlockGroup::new(id, zone, block_size, self.bytes_per_pixel));
        self.by_class.insert((zone, block_size), id);
        debug!(group = id, %zone, ?block_size, "Created block group");
        id
    }

    /// Take one block from the (zone, block size) group
    ///
    /// An exhausted or missing group reserves another extent from the zone;
    /// the group is only created once the zone has room for it.
    fn allocate_in_zone(&mut self, zone: Zone, block_size: BlockSize) -> Option<BlockRef> {
        if let Some(&id) = self.by_class.get(&(zone, block_size)) {
            if let Some(block) = self.groups[id as usize].allocate() {
                return Some(BlockRef::new(id, block));
            }
        }

        let cells_per_block = (block_size.bytes() as usize).div_ceil(self.bytes_per_pixel);
        let cursor = self.zone_cursor[zone.index()];
        let remaining = self.zones.zone_capacity(zone).saturating_sub(cursor);
        let fit = (remaining / cells_per_block) as u32;
        let block_count = fit.min(GROUP_SPAN / block_size.bytes());
        if block_count == 0 {
            return None;
        }

        let group_id = self.group_for(zone, block_size);
        let group = &mut self.groups[group_id as usize];
        group.extend(cursor, block_count);
        self.zone_cursor[zone.index()] = cursor + block_count as usize * cells_per_block;
        debug!(group = group_id, %zone, start = cursor, block_count, "Extended block group");
        group.allocate().map(|block| BlockRef::new(group_id, block))
    }
}

/// Exported block group geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: u32,
    pub zone: Zone,
    pub block_size: BlockSize,
    pub utilization: f64,
    pub extents: Vec<Extent>,
}

/// Statistics for the block allocator
#[derive(Debug, Default)]
pub struct AllocatorStats {
    pub groups: Vec<GroupStats>,
    pub total_allocated: u64,
    pub fragmentation_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupStats {
    pub id: u32,
    pub zone: Zone,
    pub block_size: BlockSize,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub allocated_blocks: u32,
}
