//! Unbounded overflow policy: a tiny initial ring grows instead of
//! dropping, and oversized records get a jumbo ring.

use std::fs;
use std::time::Duration;

use flashlog::{
  info, BackendOptions, FileSink, FileSinkConfig, LoggerConfig, OverflowPolicy, PatternOptions,
};

#[test]
fn growth_never_drops() {
  flashlog::start_with(BackendOptions {
    default_queue_capacity: 256,
    shutdown_timeout: Duration::from_secs(30),
    ..Default::default()
  })
  .unwrap();

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("unbounded.log");
  let sink =
    flashlog::create_or_get_sink::<FileSink>(path.to_str().unwrap(), FileSinkConfig::default())
      .unwrap();
  let logger = flashlog::create_or_get_logger(
    "unbounded",
    vec![sink],
    LoggerConfig {
      pattern: PatternOptions::new("%(message)"),
      overflow_policy: OverflowPolicy::Unbounded,
      ..Default::default()
    },
  )
  .unwrap();

  const N: usize = 5000;
  for i in 0..N {
    info!(logger, "r {}", i);
  }
  // A record far beyond the initial 256-byte ring.
  let big = "y".repeat(2000);
  info!(logger, "big {}", big);
  flashlog::stop().unwrap();

  let text = fs::read_to_string(&path).unwrap();
  let lines: Vec<&str> = text.lines().collect();
  assert_eq!(lines.len(), N + 1, "unbounded queues must not drop");
  for (i, line) in lines[..N].iter().enumerate() {
    assert_eq!(*line, format!("r {i}"));
  }
  assert_eq!(lines[N], format!("big {big}"));
}
