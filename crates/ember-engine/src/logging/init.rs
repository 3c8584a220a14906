use std::sync::Once;

use log::LevelFilter;

/// Log target prefix used by every module under `ember_engine::gl`.
///
/// Streaming downgrades and per-call GL traces are emitted here, so this target
/// is usually tuned separately from the rest of the engine.
pub const GL_TARGET: &str = "ember_engine::gl";

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info", "warn",
/// "ember_engine=debug,ember_engine::gl=trace").
///
/// `gl_level` overrides the level of [`GL_TARGET`] after the filter string is
/// applied. `None` leaves whatever the filter string decided.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    pub gl_level: Option<LevelFilter>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            gl_level: None,
        }
    }
}

impl LoggingConfig {
    /// Configuration used by test harnesses: everything at `debug`, GL traffic
    /// at `warn` so capability downgrades still show up.
    pub fn for_tests() -> Self {
        Self {
            env_filter: Some("debug".to_string()),
            write_style: env_logger::WriteStyle::Never,
            gl_level: Some(LevelFilter::Warn),
        }
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once.
///
/// Subsequent calls are ignored, including calls made after another crate
/// already installed a logger.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter.as_deref() {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(LevelFilter::Info);
        }

        if let Some(level) = config.gl_level {
            builder.filter_module(GL_TARGET, level);
        }

        builder.write_style(config.write_style);

        if builder.try_init().is_err() {
            log::debug!("logger already installed; keeping existing backend");
            return;
        }

        log::debug!("logging initialized");
    });
}
