//! Block groups for the layout allocator

use super::zone::Zone;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::Range;

/// Allocation unit size, 1KB to 64KB
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum BlockSize {
    Size1Kb,
    Size2Kb,
    Size4Kb,
    Size8Kb,
    Size16Kb,
    Size32Kb,
    Size64Kb,
}

impl BlockSize {
    pub const ALL: [BlockSize; 7] = [
        BlockSize::Size1Kb,
        BlockSize::Size2Kb,
        BlockSize::Size4Kb,
        BlockSize::Size8Kb,
        BlockSize::Size16Kb,
        BlockSize::Size32Kb,
        BlockSize::Size64Kb,
    ];
    pub const MIN: BlockSize = BlockSize::Size1Kb;
    pub const MAX: BlockSize = BlockSize::Size64Kb;

    /// Size in bytes
    pub fn bytes(self) -> u32 {
        1024 << (self as u32)
    }

    /// Size class by index, clamped to the largest
    pub fn from_index(index: usize) -> BlockSize {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }
}

impl From<BlockSize> for u32 {
    fn from(size: BlockSize) -> u32 {
        size.bytes()
    }
}

impl TryFrom<u32> for BlockSize {
    type Error = String;

    fn try_from(bytes: u32) -> Result<Self, Self::Error> {
        BlockSize::ALL
            .into_iter()
            .find(|size| size.bytes() == bytes)
            .ok_or_else(|| format!("Invalid block size: {}", bytes))
    }
}

/// Bytes spanned by one extent of a block group
pub const GROUP_SPAN: u32 = 64 * 1024;

/// Identifier of a block within the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Owning block group
    pub group: u32,
    /// Block index within the group
    pub block: u32,
}

impl BlockRef {
    pub fn new(group: u32, block: u32) -> Self {
        Self { group, block }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block(group={}, id={})", self.group, self.block)
    }
}

/// Run of consecutive zone cells owned by a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First zone-local cell position
    pub start_cell: usize,
    /// Block id stored at `start_cell`
    pub first_block: u32,
    pub block_count: u32,
}

/// Pool of fixed-size blocks inside one zone
///
/// Uses a min-heap of freed ids so the lowest hole is reused first.
#[derive(Debug)]
pub struct BlockGroup {
    pub id: u32,
    pub zone: Zone,
    pub block_size: BlockSize,
    /// Cells covered by one block
    pub cells_per_block: usize,
    extents: Vec<Extent>,
    /// Freed ids below `next_block`
    free_blocks: BinaryHeap<Reverse<u32>>,
    /// Next never-used id
    next_block: u32,
    in_use: Vec<bool>,
}

impl BlockGroup {
    /// Create an empty group; extents are added by the allocator
    pub fn new(id: u32, zone: Zone, block_size: BlockSize, bytes_per_pixel: usize) -> Self {
        Self {
            id,
            zone,
            block_size,
            cells_per_block: (block_size.bytes() as usize).div_ceil(bytes_per_pixel.max(1)),
            extents: Vec::new(),
            free_blocks: BinaryHeap::new(),
            next_block: 0,
            in_use: Vec::new(),
        }
    }

    /// Blocks per full extent
    pub fn blocks_per_extent(&self) -> u32 {
        GROUP_SPAN / self.block_size.bytes()
    }

    /// Append `block_count` blocks starting at zone cell `start_cell`
    pub fn extend(&mut self, start_cell: usize, block_count: u32) {
        let first_block = self.total_blocks();
        self.extents.push(Extent {
            start_cell,
            first_block,
            block_count,
        });
        self.in_use
            .resize((first_block + block_count) as usize, false);
    }

    /// Allocate a block, lowest free id first
    pub fn allocate(&mut self) -> Option<u32> {
        let block = if let Some(Reverse(block)) = self.free_blocks.pop() {
            block
        } else if self.next_block < self.total_blocks() {
            let block = self.next_block;
            self.next_block += 1;
            block
        } else {
            return None;
        };
        self.in_use[block as usize] = true;
        Some(block)
    }

    /// Return a block to the free list; false if it was not allocated
    pub fn free(&mut self, block: u32) -> bool {
        match self.in_use.get_mut(block as usize) {
            Some(used) if *used => {
                *used = false;
                self.free_blocks.push(Reverse(block));
                true
            }
            _ => false,
        }
    }

    /// Rebuild allocation state from a set of used block ids
    pub fn restore_used(&mut self, used: &[u32]) -> bool {
        let total = self.total_blocks();
        if used.iter().any(|&b| b >= total) {
            return false;
        }
        self.in_use.iter_mut().for_each(|u| *u = false);
        for &b in used {
            self.in_use[b as usize] = true;
        }
        self.next_block = used.iter().map(|&b| b + 1).max().unwrap_or(0);
        self.free_blocks = (0..self.next_block)
            .filter(|&b| !self.in_use[b as usize])
            .map(Reverse)
            .collect();
        true
    }

    pub fn is_allocated(&self, block: u32) -> bool {
        self.in_use.get(block as usize).copied().unwrap_or(false)
    }

    /// Zone-local cells covered by a block
    pub fn block_cells(&self, block: u32) -> Option<Range<usize>> {
        let extent = self
            .extents
            .iter()
            .find(|e| block >= e.first_block && block < e.first_block + e.block_count)?;
        let start = extent.start_cell + (block - extent.first_block) as usize * self.cells_per_block;
        Some(start..start + self.cells_per_block)
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Blocks reserved across all extents
    pub fn total_blocks(&self) -> u32 {
        self.extents.iter().map(|e| e.block_count).sum()
    }

    pub fn allocated_count(&self) -> u32 {
        self.in_use.iter().filter(|&&u| u).count() as u32
    }

    /// Free blocks, including the never-used tail
    pub fn free_count(&self) -> u32 {
        self.total_blocks() - self.allocated_count()
    }

    /// Free blocks sitting below the high-water mark
    pub fn hole_count(&self) -> u32 {
        self.free_blocks.len() as u32
    }

    pub fn utilization(&self) -> f64 {
        let total = self.total_blocks();
        if total == 0 {
            return 0.0;
        }
        self.allocated_count() as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> BlockGroup {
        let mut g = BlockGroup::new(0, Zone::Warm, BlockSize::Size4Kb, 4);
        g.extend(0, g.blocks_per_extent());
        g
    }

    #[test]
    fn test_block_size_bytes() {
        assert_eq!(BlockSize::MIN.bytes(), 1024);
        assert_eq!(BlockSize::Size4Kb.bytes(), 4096);
        assert_eq!(BlockSize::MAX.bytes(), 65536);
        assert_eq!(BlockSize::from_index(99), BlockSize::MAX);
        assert_eq!(BlockSize::try_from(2048), Ok(BlockSize::Size2Kb));
        assert!(BlockSize::try_from(3000).is_err());
    }

    #[test]
    fn test_group_allocation() {
        let mut g = group();
        assert_eq!(g.total_blocks(), 16);
        assert_eq!(g.cells_per_block, 1024);

        assert_eq!(g.allocate(), Some(0));
        assert_eq!(g.allocate(), Some(1));
        assert_eq!(g.allocate(), Some(2));
        assert_eq!(g.allocated_count(), 3);
        assert_eq!(g.free_count(), 13);
        assert_eq!(g.hole_count(), 0);
    }

    #[test]
    fn test_group_reuse_lowest_hole() {
        let mut g = group();
        for _ in 0..4 {
            g.allocate();
        }

        assert!(g.free(2));
        assert!(g.free(1));
        assert!(!g.free(1));
        assert_eq!(g.hole_count(), 2);

        assert_eq!(g.allocate(), Some(1));
        assert_eq!(g.allocate(), Some(2));
        assert_eq!(g.allocate(), Some(4));
    }

    #[test]
    fn test_group_exhaustion_and_extend() {
        let mut g = BlockGroup::new(3, Zone::Cold, BlockSize::MAX, 4);
        assert_eq!(g.allocate(), None);

        g.extend(100, 1);
        assert_eq!(g.allocate(), Some(0));
        assert_eq!(g.allocate(), None);

        g.extend(20_000, 2);
        assert_eq!(g.allocate(), Some(1));
        assert_eq!(g.block_cells(0), Some(100..100 + 16384));
        assert_eq!(g.block_cells(1), Some(20_000..20_000 + 16384));
        assert_eq!(g.block_cells(2), Some(20_000 + 16384..20_000 + 32768));
        assert_eq!(g.block_cells(3), None);
    }

    #[test]
    fn test_dense_cells_round_up() {
        let g = BlockGroup::new(0, Zone::Hot, BlockSize::Size1Kb, 3);
        assert_eq!(g.cells_per_block, 342);
    }

    #[test]
    fn test_restore_used() {
        let mut g = group();
        assert!(g.restore_used(&[0, 3, 5]));
        assert_eq!(g.allocated_count(), 3);
        assert_eq!(g.hole_count(), 3);
        assert_eq!(g.allocate(), Some(1));
        assert!(!g.restore_used(&[99]));
    }

    #[test]
    fn test_block_ref_serde() {
        let r = BlockRef::new(2, 7);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"group":2,"block":7}"#);
        assert_eq!(r.to_string(), "Block(group=2, id=7)");
        assert_eq!(serde_json::to_string(&BlockSize::Size8Kb).unwrap(), "8192");
    }
}
