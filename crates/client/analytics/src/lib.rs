//! Log output for the `kestrel` binary.

use formatter::CustomFormatter;
use tracing_core::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

mod formatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set.
    pub default_level: LevelFilter,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { default_level: LevelFilter::INFO }
    }
}

impl LoggingConfig {
    pub fn default_level(self, default_level: LevelFilter) -> Self {
        Self { default_level, ..self }
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        Ok(EnvFilter::builder().with_default_directive(self.default_level.into()).from_env()?)
    }
}

/// Installs the global subscriber. Fails if one is already installed or `RUST_LOG` does not parse.
pub fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().event_format(CustomFormatter::new()))
        .with(config.env_filter()?)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = LoggingConfig::default().default_level(LevelFilter::DEBUG);
        assert_eq!(config.default_level, LevelFilter::DEBUG);
        assert_eq!(LoggingConfig::default().default_level, LevelFilter::INFO);
    }
}
