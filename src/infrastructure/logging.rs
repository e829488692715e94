//! Logging system configuration and initialization
//!
//! Console output, an optional non-blocking log file and optional JSON
//! formatting, all driven by [`LoggingConfig`]. `RUST_LOG` always wins over
//! the configured level.

#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use tracing::{Subscriber, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::ConfigManager;

/// Keeps the file writer alive for the life of the process
static LOG_GUARDS: Lazy<Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

/// Dependencies that are chatty below `warn` unless tracing is requested
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("reqwest", "info"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("html5ever", "warn"),
    ("selectors", "warn"),
    ("tokio", "info"),
];

/// Resolve the log directory: the configured one, else `<config dir>/logs`.
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    config.log_dir.clone().unwrap_or_else(|| {
        ConfigManager::get_config_dir()
            .or_else(|_| std::env::current_dir().context("no working directory"))
            .unwrap_or_default()
            .join("logs")
    })
}

pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Build the env filter: `RUST_LOG` if set, otherwise the configured level,
/// quieter dependency targets and the per-module overrides.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    if !config.level.to_lowercase().contains("trace") {
        for (target, level) in QUIET_TARGETS {
            filter = filter.add_directive(format!("{target}={level}").parse()?);
        }
    }
    for (module, level) in &config.module_filters {
        let directive = format!("{module}={level}")
            .parse()
            .with_context(|| format!("Invalid module filter '{module}={level}'"))?;
        filter = filter.add_directive(directive);
    }
    filter = filter.add_directive(format!("catalog_lens={}", config.level).parse()?);

    Ok(filter)
}

/// Plain stdout layer, built per stack so it fits whatever it is layered on.
fn console_layer<S>(enabled: bool) -> Option<impl Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    enabled.then(|| fmt::Layer::new().with_writer(std::io::stdout).with_target(false))
}

/// Initialize the global subscriber. Fails when called twice in one process.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let registry = Registry::default().with(env_filter);

    let file_writer = if config.file_output {
        let log_dir = get_log_directory(config);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

        let (writer, guard) = non_blocking(rolling::never(&log_dir, &config.file_name));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);
        info!("Log directory: {:?}", log_dir);
        Some(writer)
    } else {
        None
    };

    match (file_writer, config.json_format) {
        (Some(writer), true) => {
            let file_layer = fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false);
            registry
                .with(file_layer)
                .with(console_layer(config.console_output))
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        (Some(writer), false) => {
            let file_layer = fmt::Layer::new()
                .with_writer(writer)
                .with_target(false)
                .with_ansi(false);
            registry
                .with(file_layer)
                .with(console_layer(config.console_output))
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        (None, _) if config.console_output => {
            registry
                .with(console_layer(true))
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        (None, _) => return Err(anyhow!("No logging output configured")),
    }

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    info!("Console output: {}", config.console_output);
    info!("File output: {}", config.file_output);
    Ok(())
}

/// Log build and platform information for diagnostics
pub fn log_system_info() {
    info!("=== Catalog Lens ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
}
