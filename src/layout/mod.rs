//! Zone-aware layout
//!
//! Places named files into fixed-size blocks so that hot data sits near
//! the grid centre.
//!
//! # Architecture
//!
//! ```text
//! LayoutOptimizer
//!   ├─→ files: [FileEntry { fragments: [Fragment(block=(g, id))] }]
//!   ├─→ inline: { key → bytes }
//!   └─→ BlockAllocator
//!         ├─→ ZoneClassifier  → cells sorted by distance from centre
//!         │     HOT | WARM | TEMPERATE | COOL | COLD
//!         ├─→ Group 0 (HOT, 64KB)  → Free: [1]
//!         ├─→ Group 1 (WARM, 4KB)  → Free: []
//!         └─→ Group 2 (COLD, 1KB)  → Free: [0, 5]
//! ```
//!
//! A group owns extents of its zone's cells; a full zone spills outwards,
//! then inwards.

pub mod allocator;
pub mod block;
pub mod optimizer;
pub mod zone;

pub use allocator::{AllocatorStats, BlockAllocator, GroupRecord, GroupStats};
pub use block::{BlockGroup, BlockRef, BlockSize, Extent};
pub use optimizer::{
    DefragmentStats, FileEntry, Fragment, LayoutMetadata, LayoutOptimizer, PixelRef,
};
pub use zone::{AccessFrequency, Zone, ZoneClassifier};
