//! JSONL logging for Quill nodes
//!
//! Sets up the global `tracing` subscriber the way every Quill binary and
//! test harness expects it, and holds the span and field names shared by
//! the other crates. Console output is JSON lines unless a terminal wants
//! [`ConsoleOutput::Pretty`]; files written through `tracing-appender`
//! always carry JSON lines, rotated daily or hourly.
//!
//! ```ignore
//! use quill_logging::{LogConfig, QuillSubscriberBuilder};
//!
//! let _guard = QuillSubscriberBuilder::new().init();
//!
//! let _guard = QuillSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;
pub mod names;

pub use config::{ConsoleOutput, FileConfig, LogConfig, RotationStrategy};
pub use names::{fields, spans};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid filter directive: {0}")]
    InvalidFilter(String),

    #[error("Failed to open log output: {0}")]
    Output(String),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Builder for configuring and initializing the Quill logging subscriber
///
/// Console output is JSON lines unless the config asks for
/// [`ConsoleOutput::Pretty`]; file output is always JSON lines.
pub struct QuillSubscriberBuilder {
    config: LogConfig,
}

impl QuillSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleOutput) -> Self {
        self.config.console = console;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    ///
    /// The returned guard flushes file output when dropped and must outlive
    /// every event that should reach the file.
    pub fn build(self) -> Result<(impl Subscriber + Send + Sync, Option<WorkerGuard>), LogError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.filter_directives())
                .map_err(|e| LogError::InvalidFilter(e.to_string()))?,
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        match self.config.console {
            ConsoleOutput::Off => {}
            ConsoleOutput::Jsonl => layers.push(jsonl_layer(std::io::stdout)),
            ConsoleOutput::Pretty => layers.push(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .boxed(),
            ),
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(jsonl_layer(writer));
            guard = Some(file_guard);
        }

        let subscriber = Registry::default().with(layers).with(env_filter);
        Ok((subscriber, guard))
    }

    /// Install the subscriber globally
    ///
    /// Fails if a global subscriber has already been set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let (subscriber, guard) = self.build()?;
        subscriber
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Install the subscriber globally, reporting setup failures on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {}", e);
                None
            }
        }
    }
}

impl Default for QuillSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One JSON object per event: fields at the top level, the innermost span
/// under `span` and the whole stack under `spans`
fn jsonl_layer<W>(writer: W) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
        .boxed()
}

/// Non-blocking file writer; a single file is truncated, rotated files append
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory).map_err(|e| LogError::Output(e.to_string()))?;
            let file = File::create(config.single_file_path())
                .map_err(|e| LogError::Output(e.to_string()))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LogError::Output(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    QuillSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    QuillSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = QuillSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
