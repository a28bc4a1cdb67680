//! Logging setup for binaries and tests embedding the recovery engine
//!
//! The engine itself only emits `tracing` events; this module installs a
//! subscriber for them with:
//! - an `EnvFilter` honoring `RUST_LOG`
//! - stderr output, plain or JSON
//! - optional daily-rotated file output

use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level
    pub level: Level,

    /// Log to file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of text
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            config.level = level_from_filter(&rust_log).unwrap_or(config.level);
        }

        if let Ok(log_file) = std::env::var("RECOVERY_LOG_FILE") {
            config.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(log_stderr) = std::env::var("RECOVERY_LOG_STDERR") {
            config.stderr = log_stderr.to_lowercase() != "false";
        }

        if let Ok(log_json) = std::env::var("RECOVERY_LOG_JSON") {
            config.json = matches!(log_json.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }
}

/// Most verbose level mentioned in a `RUST_LOG` style filter
fn level_from_filter(filter: &str) -> Option<Level> {
    let filter = filter.to_lowercase();
    [
        ("trace", Level::TRACE),
        ("debug", Level::DEBUG),
        ("info", Level::INFO),
        ("warn", Level::WARN),
        ("error", Level::ERROR),
    ]
    .into_iter()
    .find(|(name, _)| filter.contains(name))
    .map(|(_, level)| level)
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn output_layer<W>(writer: W, ansi: bool, config: &LogConfig) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(config.thread_ids);

    if config.json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.stderr {
        layers.push(output_layer(std::io::stderr, true, &config));
    }

    if let Some(file_path) = &config.file_path {
        let directory = file_path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory)?;

        let file_appender = tracing_appender::rolling::daily(
            directory,
            file_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("recovery-engine.log")),
        );
        layers.push(output_layer(file_appender, false, &config));
    }

    let subscriber = tracing_subscriber::registry().with(layers).with(env_filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_filter() {
        assert_eq!(level_from_filter("debug"), Some(Level::DEBUG));
        assert_eq!(
            level_from_filter("recovery_engine=trace,hyper=warn"),
            Some(Level::TRACE)
        );
        assert_eq!(level_from_filter("WARN"), Some(Level::WARN));
        assert_eq!(level_from_filter("off"), None);
    }

    #[test]
    fn test_from_env_flags() {
        temp_env::with_vars(
            [
                ("RUST_LOG", Some("debug")),
                ("RECOVERY_LOG_STDERR", Some("false")),
                ("RECOVERY_LOG_JSON", Some("true")),
                ("RECOVERY_LOG_FILE", Some("/tmp/recovery/engine.log")),
            ],
            || {
                let config = LogConfig::from_env();
                assert_eq!(config.level, Level::DEBUG);
                assert!(!config.stderr);
                assert!(config.json);
                assert_eq!(
                    config.file_path,
                    Some(PathBuf::from("/tmp/recovery/engine.log"))
                );
            },
        );
    }
}
