//! Container codec
//!
//! ```text
//! payload ──► segments ──► compress ──► stream ──► curve ──► grid ──► PNG
//!                                                                  │
//!                           metadata (iTXt "pixelrts") ◄───────────┘
//! ```
//!
//! File sets take the layout path instead: each file is compressed on its
//! own and placed in zone blocks by [`crate::layout::LayoutOptimizer`].

pub mod batch;
pub mod decoder;
pub mod encoder;
pub mod metadata;
pub mod raster;

pub use batch::{decode_batch, encode_batch};
pub use decoder::{read_inline, DecodeOptions, Decoded, Decoder};
pub use encoder::{
    write_container, EncodedContainer, Encoder, FileSet, FileSpec, PayloadManifest, SegmentSpec,
};
pub use metadata::{hash_data, sidecar_path, ContainerMetadata, SegmentRecord};

/// Text chunk keyword carrying the metadata record
pub const METADATA_KEYWORD: &str = "pixelrts";
/// Text chunk keyword carrying inline values alone
pub const INLINE_KEYWORD: &str = "pixelrts:inline";
