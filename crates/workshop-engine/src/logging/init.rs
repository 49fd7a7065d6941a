use std::sync::Once;

use log::LevelFilter;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "workshop_engine=debug,wgpu_core=warn"). When unset, `RUST_LOG` is used,
/// then `default_level` with the graphics backend crates capped at `warn`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    pub default_level: LevelFilter,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            default_level: LevelFilter::Info,
        }
    }
}

/// Crates that are chatty at `info`.
const NOISY_CRATES: &[&str] = &["wgpu_core", "wgpu_hal", "naga"];

static INIT: Once = Once::new();

/// Initializes the global logger once. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match config.env_filter.or_else(|| std::env::var("RUST_LOG").ok()) {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => {
                builder.filter_level(config.default_level);
                for name in NOISY_CRATES {
                    builder.filter_module(name, config.default_level.min(LevelFilter::Warn));
                }
            }
        }

        builder.write_style(config.write_style);

        // Another logger may already be installed (e.g. by a test harness).
        if builder.try_init().is_err() {
            log::debug!("global logger already set; keeping it");
            return;
        }

        log::debug!("logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LoggingConfig {
            env_filter: Some("warn".to_string()),
            ..LoggingConfig::default()
        });
        init_logging(LoggingConfig::default());
        log::warn!("logging still works");
    }
}
