//! Lifecycle: drain on stop, terminal stopped state, post-stop no-ops.

use std::fs;
use std::time::Duration;

use flashlog::{info, BackendOptions, FileSink, FileSinkConfig, LoggerConfig, PatternOptions};

#[test]
fn stop_drains_everything_enqueued_before() {
  flashlog::start_with(BackendOptions {
    shutdown_timeout: Duration::from_secs(10),
    ..Default::default()
  })
  .unwrap();

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("drain.log");
  let sink =
    flashlog::create_or_get_sink::<FileSink>(path.to_str().unwrap(), FileSinkConfig::default())
      .unwrap();
  let logger = flashlog::create_or_get_logger(
    "drain",
    vec![sink],
    LoggerConfig { pattern: PatternOptions::new("%(message)"), ..Default::default() },
  )
  .unwrap();

  const N: usize = 500;
  for i in 0..N {
    info!(logger, "record {}", i);
  }
  flashlog::stop().unwrap();

  let text = fs::read_to_string(&path).unwrap();
  let lines: Vec<&str> = text.lines().collect();
  assert_eq!(lines.len(), N, "all records enqueued before stop() must be in the sink");
  for (i, line) in lines.iter().enumerate() {
    assert_eq!(*line, format!("record {i}"));
  }

  // Stopping again is fine; restarting is not.
  assert!(flashlog::stop().is_ok());
  assert!(flashlog::start().is_err());

  // Logging after stop is a documented no-op.
  info!(logger, "late {}", 1);
  assert!(!flashlog::flush_sync(logger, Duration::from_millis(100)));
  assert_eq!(fs::read_to_string(&path).unwrap(), text);
}
