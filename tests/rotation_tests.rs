//! Size rotation under sustained load: every file stays under the limit
//! and the concatenation in rotation order preserves producer order.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use flashlog::{
  info, BackendOptions, FileSink, FileSinkConfig, LoggerConfig, PatternOptions, RotationPolicy,
};

const MAX_SIZE: u64 = 4096;
const RECORDS: usize = 10_000;

#[test]
fn size_rotation_preserves_order() {
  flashlog::start_with(BackendOptions {
    shutdown_timeout: Duration::from_secs(30),
    ..Default::default()
  })
  .unwrap();

  let dir = tempfile::tempdir().unwrap();
  let base = dir.path().join("rotated.log");
  let sink = flashlog::create_or_get_sink::<FileSink>(
    base.to_str().unwrap(),
    FileSinkConfig {
      rotation: Some(RotationPolicy { max_size: Some(MAX_SIZE), interval: None }),
      ..Default::default()
    },
  )
  .unwrap();
  let logger = flashlog::create_or_get_logger(
    "rotated",
    vec![sink],
    LoggerConfig { pattern: PatternOptions::new("%(message)"), ..Default::default() },
  )
  .unwrap();

  // ~100-byte lines.
  let filler = "x".repeat(88);
  for i in 0..RECORDS {
    info!(logger, "{} {}", i, filler);
  }
  flashlog::stop().unwrap();

  // Collect rotated files in rotation order, the live file last.
  let mut rotated: Vec<(u32, PathBuf)> = fs::read_dir(dir.path())
    .unwrap()
    .filter_map(|e| {
      let path = e.unwrap().path();
      let name = path.file_name()?.to_str()?.to_string();
      let index: u32 = name.strip_prefix("rotated.")?.strip_suffix(".log")?.parse().ok()?;
      Some((index, path))
    })
    .collect();
  rotated.sort_by_key(|(i, _)| *i);
  assert!(rotated.len() > 1, "expected multiple rotations, got {}", rotated.len());

  let mut paths: Vec<PathBuf> = rotated.into_iter().map(|(_, p)| p).collect();
  paths.push(base.clone());

  let mut expected = 0usize;
  for path in &paths {
    let meta = fs::metadata(path).unwrap();
    assert!(meta.len() <= MAX_SIZE, "{path:?} is {} bytes", meta.len());
    for line in fs::read_to_string(path).unwrap().lines() {
      let counter: usize = line.split_whitespace().next().unwrap().parse().unwrap();
      assert_eq!(counter, expected, "out of order in {path:?}");
      expected += 1;
    }
  }
  assert_eq!(expected, RECORDS);
}
