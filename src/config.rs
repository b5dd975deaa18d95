//! Codec configuration
//!
//! Read from TOML, optionally layered with `PIXELRTS__*` environment
//! variables (`PIXELRTS__MODE=RGBA-code`, `PIXELRTS__LOGGING__LEVEL=debug`).

use crate::compression::{AdaptiveCompressor, CompressionBackend, CompressionLevel};
use crate::grid::EncodingMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// When payload segments share a dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolidConfig {
    /// Fewest segments worth a dictionary
    pub min_segments: usize,
    /// Largest segment that still counts as small
    pub max_segment_size: usize,
}

impl Default for SolidConfig {
    fn default() -> Self {
        Self {
            min_segments: 8,
            max_segment_size: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// JSON lines instead of pretty output
    pub json: bool,
    pub ansi: bool,
    /// Also write daily-rotated files here
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
            directory: None,
            file_prefix: "pixelrts.log".to_string(),
        }
    }
}

/// Settings for an encode/decode session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub mode: EncodingMode,
    /// Compress segments; unset means only in code mode
    pub compress: Option<bool>,
    pub backend: CompressionBackend,
    /// Level for every content type
    pub level: Option<CompressionLevel>,
    pub sparse_min_run: usize,
    pub solid: SolidConfig,
    pub verify_on_decode: bool,
    pub curve_cache_capacity: usize,
    /// Bytes reserved on top of the payload when sizing the grid
    pub grid_slack_bytes: usize,
    pub logging: LoggingConfig,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            mode: EncodingMode::default(),
            compress: None,
            backend: CompressionBackend::default(),
            level: None,
            sparse_min_run: crate::compression::sparse::DEFAULT_MIN_RUN,
            solid: SolidConfig::default(),
            verify_on_decode: true,
            curve_cache_capacity: crate::curve::cache::DEFAULT_CAPACITY,
            grid_slack_bytes: 0,
            logging: LoggingConfig::default(),
        }
    }
}

impl CodecConfig {
    /// Default settings for a mode
    pub fn for_mode(mode: EncodingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn should_compress(&self) -> bool {
        self.compress
            .unwrap_or_else(|| self.mode.compresses_by_default())
    }

    pub fn adaptive_compressor(&self) -> AdaptiveCompressor {
        let compressor = AdaptiveCompressor::new().with_backend(self.backend);
        match self.level {
            Some(level) => compressor.with_level(level),
            None => compressor,
        }
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: CodecConfig = toml::from_str(text).context("Invalid codec configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then `PIXELRTS__*` environment variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("PIXELRTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read codec configuration")?;

        let config: CodecConfig = settings
            .try_deserialize()
            .context("Invalid codec configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.sparse_min_run > 0, "sparse_min_run must be at least 1");
        anyhow::ensure!(
            self.curve_cache_capacity > 0,
            "curve_cache_capacity must be at least 1"
        );
        anyhow::ensure!(
            self.solid.min_segments > 0,
            "solid.min_segments must be at least 1"
        );
        Ok(())
    }
}
