//! What a node logs and where it goes
//!
//! Every line a Quill node writes is JSON with the event fields flattened
//! and the enclosing span attached; the only knobs are the level, the
//! console format, and an optional file sink.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Logging setup of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for every target without an override; `RUST_LOG` wins over it
    pub level: String,
    /// Per-target levels, e.g. `quill_coordinator = "debug"`
    pub targets: BTreeMap<String, String>,
    pub console: ConsoleOutput,
    pub file: Option<FileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            console: ConsoleOutput::Jsonl,
            file: None,
        }
    }
}

impl LogConfig {
    /// Debug level, human-readable console
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleOutput::Pretty,
            ..Default::default()
        }
    }

    /// JSON lines under `log_dir`, one file per day, console off
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleOutput::Off,
            file: Some(FileConfig::new(log_dir)),
            ..Default::default()
        }
    }

    /// Warnings only, so test output stays readable
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// `EnvFilter` directives: the level, then target overrides in name order
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.targets
                    .iter()
                    .map(|(target, level)| format!("{}={}", target, level)),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Format of the stdout sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleOutput {
    Off,
    #[default]
    Jsonl,
    /// Colored multi-line events for a terminal
    Pretty,
}

/// JSON lines file sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File names start with this, typically the node id
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Rotated files kept; older ones are deleted
    pub max_files: Option<usize>,
}

impl FileConfig {
    /// Daily files named `quill.*.log` in `directory`, a month kept
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            prefix: "quill".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: Some(30),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_rotation(mut self, rotation: RotationStrategy) -> Self {
        self.rotation = rotation;
        self
    }

    /// Where output goes with [`RotationStrategy::Never`]
    pub fn single_file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.prefix))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated when the node starts
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logs_jsonl_to_console() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleOutput::Jsonl);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_production_writes_daily_files_only() {
        let config = LogConfig::production(PathBuf::from("/var/log/quill"));
        assert_eq!(config.console, ConsoleOutput::Off);
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "quill");
        assert_eq!(file.rotation, RotationStrategy::Daily);
        assert_eq!(file.max_files, Some(30));
    }

    #[test]
    fn test_filter_directives() {
        assert_eq!(LogConfig::default().filter_directives(), "info");

        let config = LogConfig::testing()
            .with_target("redb", "off")
            .with_target("quill_coordinator", "debug");
        assert_eq!(
            config.filter_directives(),
            "warn,quill_coordinator=debug,redb=off"
        );
    }

    #[test]
    fn test_single_file_path() {
        let file = FileConfig::new(PathBuf::from("/tmp/logs"))
            .with_prefix("node-a")
            .with_rotation(RotationStrategy::Never);
        assert_eq!(file.single_file_path(), PathBuf::from("/tmp/logs/node-a.log"));
    }
}
