//! Logging setup

use crate::config::LoggingConfig;
use anyhow::Context;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
///
/// Console output goes to stderr, pretty or as JSON lines; with a
/// `directory` configured a daily-rotated file is written too. `RUST_LOG`
/// directives are honoured on top of the configured level. Returns `false`
/// when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<bool> {
    let level = config
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);

    let console = fmt::layer().with_writer(std::io::stderr);
    layers.push(if config.json {
        console.json().boxed()
    } else {
        console.with_ansi(config.ansi).pretty().boxed()
    });

    if let Some(dir) = &config.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);
        layers.push(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .boxed(),
        );
    }

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok();
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() -> anyhow::Result<()> {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ansi: false,
            ..LoggingConfig::default()
        };
        init_logging(&config)?;
        assert!(!init_logging(&config)?);
        Ok(())
    }

    #[test]
    fn test_unknown_level_falls_back() -> anyhow::Result<()> {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            json: true,
            ..LoggingConfig::default()
        };
        init_logging(&config)?;
        Ok(())
    }
}
