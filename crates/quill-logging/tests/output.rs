//! End-to-end checks of the JSONL file output
//!
//! Each test builds a subscriber scoped to the test with
//! `tracing::subscriber::with_default`, so tests do not fight over the
//! global default.

use std::fs;

use quill_logging::{
    ConsoleOutput, FileConfig, LogConfig, QuillSubscriberBuilder, RotationStrategy, fields, spans,
};
use serde_json::Value;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> FileConfig {
    FileConfig::new(dir.path().to_path_buf())
        .with_prefix("node-a")
        .with_rotation(RotationStrategy::Never)
}

fn read_lines(config: &FileConfig) -> Vec<Value> {
    let text = fs::read_to_string(config.single_file_path()).unwrap();
    text.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ============================================================================
// File output
// ============================================================================

#[test]
fn test_events_are_written_as_json_lines() {
    let dir = TempDir::new().unwrap();
    let file = file_config(&dir);

    let (subscriber, guard) = QuillSubscriberBuilder::new()
        .with_console(ConsoleOutput::Off)
        .with_file_output(file.clone())
        .build()
        .unwrap();

    tracing::subscriber::with_default(subscriber, || {
        let span = tracing::info_span!(spans::DETACH_DOCUMENT, doc_key = "notes");
        let _enter = span.enter();
        tracing::info!(pushed = 1, "Detached document");
    });
    drop(guard);

    let lines = read_lines(&file);
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line["message"], "Detached document");
    assert_eq!(line[fields::PUSHED], 1);
    assert_eq!(line["span"]["name"], spans::DETACH_DOCUMENT);
    assert_eq!(line["span"][fields::DOC_KEY], "notes");
}

#[test]
fn test_default_level_filters_file_output() {
    let dir = TempDir::new().unwrap();
    let file = file_config(&dir);

    let mut config = LogConfig::testing();
    config.console = ConsoleOutput::Off;
    config.file = Some(file.clone());
    let (subscriber, guard) = QuillSubscriberBuilder::new()
        .with_config(config)
        .build()
        .unwrap();

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!("Filtered out");
        tracing::warn!("Kept");
    });
    drop(guard);

    let lines = read_lines(&file);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["message"], "Kept");
}

#[test]
fn test_rotated_output_directory_is_created() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("nested");
    let file = FileConfig::new(nested.clone());

    let (subscriber, guard) = QuillSubscriberBuilder::new()
        .with_console(ConsoleOutput::Off)
        .with_file_output(file)
        .build()
        .unwrap();
    tracing::subscriber::with_default(subscriber, || tracing::warn!("Rotated"));
    drop(guard);

    let entries: Vec<_> = fs::read_dir(&nested).unwrap().collect();
    assert_eq!(entries.len(), 1);
}
