//! Registry semantics that need no running backend: idempotent creation,
//! kind checks, fail-fast configuration errors.

use flashlog::{
  Error, FileSink, FileSinkConfig, JsonFileSink, LoggerConfig, NullSink, PatternOptions,
};

#[test]
fn sink_kind_must_match_on_retrieval() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("kinds.log");
  let name = path.to_str().unwrap();

  let first = flashlog::create_or_get_sink::<FileSink>(name, FileSinkConfig::default()).unwrap();
  let again = flashlog::create_or_get_sink::<FileSink>(name, FileSinkConfig::default()).unwrap();
  assert!(std::sync::Arc::ptr_eq(&first, &again));

  let err = flashlog::create_or_get_sink::<JsonFileSink>(name, FileSinkConfig::default());
  assert!(matches!(err, Err(Error::SinkKindMismatch { .. })));
}

#[test]
fn unknown_sink_lookup_fails() {
  assert!(matches!(flashlog::get_sink("never-created"), Err(Error::UnknownSink(_))));
}

#[test]
fn loggers_are_idempotent_by_name() {
  let sink = flashlog::create_or_get_sink::<NullSink>("null-reg", ()).unwrap();
  let a = flashlog::create_or_get_logger("same", vec![sink.clone()], LoggerConfig::default()).unwrap();
  // Second creation with a different pattern is ignored.
  let b = flashlog::create_or_get_logger(
    "same",
    vec![],
    LoggerConfig { pattern: PatternOptions::new("%(message)"), ..Default::default() },
  )
  .unwrap();
  assert!(std::ptr::eq(a, b));
  assert_eq!(flashlog::get_logger("same").map(|l| l.name()), Some("same"));
}

#[test]
fn bad_patterns_fail_at_creation() {
  let sink = flashlog::create_or_get_sink::<NullSink>("null-pat", ()).unwrap();
  let err = flashlog::create_or_get_logger(
    "bad-attr",
    vec![sink.clone()],
    LoggerConfig { pattern: PatternOptions::new("%(bogus)"), ..Default::default() },
  );
  assert!(matches!(err, Err(Error::UnknownAttribute(_))));

  let err = flashlog::create_or_get_logger(
    "bad-time",
    vec![sink],
    LoggerConfig {
      pattern: PatternOptions::new("%(time)").with_time_format("%Qxs", flashlog::Timezone::Gmt),
      ..Default::default()
    },
  );
  assert!(matches!(err, Err(Error::BadTimeFormat(_))));
}
