// PixelRTS - Rust Implementation
// A geometric binary container codec

#![warn(rust_2018_idioms)]

pub mod compression;
pub mod config;
pub mod container;
pub mod curve;
pub mod grid;
pub mod layout;
pub mod telemetry;

// Re-exports for convenience
pub use compression::{AdaptiveCompressor, ContentType, ContentTypeDetector};
pub use config::CodecConfig;
pub use container::{Decoder, EncodedContainer, Encoder};
pub use curve::{CurveCache, HilbertCurve};
pub use grid::{calculate_grid_size, EncodingMode, PixelGrid};
pub use layout::{AccessFrequency, BlockAllocator, LayoutOptimizer, Zone, ZoneClassifier};

/// PixelRTS error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// Malformed container, bad grid size, or no recoverable metadata
        #[error("Format error: {0}")]
        Format(String),

        #[error("Integrity error in {segment}: expected hash {expected}, got {actual}")]
        Integrity {
            segment: String,
            expected: String,
            actual: String,
        },

        #[error("Size mismatch: expected {expected} bytes, got {actual}")]
        SizeMismatch { expected: u64, actual: u64 },

        #[error("Capacity error: {required} bytes required, {available} available")]
        Capacity { required: u64, available: u64 },

        #[error("Compression error: {0}")]
        Compression(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Serialization error: {0}")]
        Serialization(String),

        #[error("Not found: {0}")]
        NotFound(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
