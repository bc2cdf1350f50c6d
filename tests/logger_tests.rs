//! End-to-end scenarios through a running backend: formatting, hybrid
//! JSON output, multi-threaded ordering, custom argument codecs.
//!
//! All tests share one backend (the lifecycle is process-wide), so each
//! test uses its own logger and its own sink files and none of them stops
//! the backend.

use std::fs;
use std::sync::Once;
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use flashlog::codec::{PayloadReader, PayloadWriter, SizeCache};
use flashlog::{
  info, info_v, warning, ArgValue, BackendOptions, Encode, FileSink, FileSinkConfig, JsonFileSink,
  Level, LoggerConfig, NullSink, OpenMode, PatternOptions, StrRef,
};

fn ensure_backend() {
  static START: Once = Once::new();
  START.call_once(|| {
    flashlog::start_with(BackendOptions {
      flush_interval: Duration::from_millis(50),
      sleep_duration_min: Duration::from_micros(50),
      sleep_duration_max: Duration::from_millis(2),
      ..Default::default()
    })
    .unwrap();
  });
}

fn file_logger(name: &str, path: &std::path::Path, pattern: &str) -> &'static flashlog::Logger {
  let sink =
    flashlog::create_or_get_sink::<FileSink>(path.to_str().unwrap(), FileSinkConfig::default())
      .unwrap();
  let config = LoggerConfig { pattern: PatternOptions::new(pattern), ..Default::default() };
  flashlog::create_or_get_logger(name, vec![sink], config).unwrap()
}

#[test]
fn basic_info_line() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("basic.log");
  let logger = file_logger("basic", &path, "%(log_level) %(message)");

  info!(logger, "x={}", 42);
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  assert_eq!(fs::read_to_string(&path).unwrap(), "INFO x=42\n");
}

#[test]
fn hybrid_json_and_pattern_sinks() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let json_path = dir.path().join("hybrid.json");
  let text_path = dir.path().join("hybrid.log");
  let json_sink = flashlog::create_or_get_sink::<JsonFileSink>(
    json_path.to_str().unwrap(),
    FileSinkConfig { open_mode: OpenMode::Write, ..Default::default() },
  )
  .unwrap();
  let text_sink =
    flashlog::create_or_get_sink::<FileSink>(text_path.to_str().unwrap(), FileSinkConfig::default())
      .unwrap();
  let config = LoggerConfig {
    pattern: PatternOptions::new("%(message) [%(named_args)]"),
    ..Default::default()
  };
  let logger = flashlog::create_or_get_logger("hybrid", vec![json_sink, text_sink], config).unwrap();

  info!(logger, "{method} to {endpoint} took {elapsed} ms", "POST", "http://", 20);
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  let text = fs::read_to_string(&text_path).unwrap();
  assert_eq!(
    text,
    "POST to http:// took 20 ms [method: POST, endpoint: http://, elapsed: 20]\n"
  );

  let json_text = fs::read_to_string(&json_path).unwrap();
  let line = json_text.lines().next().unwrap();
  let v: serde_json::Value = serde_json::from_str(line).unwrap();
  assert_eq!(v["message"], "{method} to {endpoint} took {elapsed} ms");
  assert_eq!(v["method"], "POST");
  assert_eq!(v["endpoint"], "http://");
  assert_eq!(v["elapsed"], "20");
  assert_eq!(v["log_level"], "INFO");
  assert_eq!(v["logger"], "hybrid");
  assert!(v["timestamp"].is_string());
  assert!(v["file_name"].is_string());
  assert!(v["line_number"].is_number());
  assert!(v["thread_id"].is_number());
}

#[test]
fn json_lines_are_well_formed() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("wf.json");
  let sink = flashlog::create_or_get_sink::<JsonFileSink>(
    path.to_str().unwrap(),
    FileSinkConfig::default(),
  )
  .unwrap();
  let logger = flashlog::create_or_get_logger(
    "wf-json",
    vec![sink],
    LoggerConfig { pattern: PatternOptions::new(""), ..Default::default() },
  )
  .unwrap();

  for i in 0..50 {
    info!(logger, "iteration {n} of {total}", i, 50);
  }
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  let text = fs::read_to_string(&path).unwrap();
  let lines: Vec<&str> = text.lines().collect();
  assert_eq!(lines.len(), 50);
  for line in lines {
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    for field in ["timestamp", "file_name", "line_number", "thread_id", "logger", "log_level", "message"] {
      assert!(v.get(field).is_some(), "missing {field} in {line}");
    }
  }
}

#[test]
fn per_thread_order_is_strict() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("order.log");
  let logger = file_logger("order", &path, "%(message)");

  const PER_THREAD: usize = 10_000;
  let handles: Vec<_> = (0..2)
    .map(|t| {
      std::thread::spawn(move || {
        for i in 0..PER_THREAD {
          info!(logger, "c {} {}", t, i);
        }
      })
    })
    .collect();
  for h in handles {
    h.join().unwrap();
  }
  assert!(flashlog::flush_sync(logger, Duration::from_secs(10)));

  let text = fs::read_to_string(&path).unwrap();
  let mut counters = [Vec::new(), Vec::new()];
  for line in text.lines() {
    let mut parts = line.split_whitespace();
    assert_eq!(parts.next(), Some("c"));
    let t: usize = parts.next().unwrap().parse().unwrap();
    let i: usize = parts.next().unwrap().parse().unwrap();
    counters[t].push(i);
  }
  for t in 0..2 {
    assert_eq!(counters[t].len(), PER_THREAD, "thread {t} lost records");
    assert!(counters[t].windows(2).all(|w| w[0] < w[1]), "thread {t} reordered");
  }
}

#[test]
fn level_threshold_gates_records() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("gated.log");
  let logger = file_logger("gated", &path, "%(log_level_short_code) %(message)");
  logger.set_level(Level::Warning);

  info!(logger, "suppressed {}", 1);
  warning!(logger, "kept {}", 2);
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  assert_eq!(fs::read_to_string(&path).unwrap(), "W kept 2\n");
}

struct Order {
  symbol: String,
  price: f64,
  quantity: u32,
}

impl Encode for Order {
  fn encoded_size(&self, cache: &mut SizeCache) -> usize {
    self.symbol.encoded_size(cache)
      + self.price.encoded_size(cache)
      + self.quantity.encoded_size(cache)
  }

  fn encode(&self, w: &mut PayloadWriter<'_>) {
    self.symbol.encode(w);
    self.price.encode(w);
    self.quantity.encode(w);
  }

  fn decode(r: &mut PayloadReader<'_>) -> ArgValue {
    let symbol = String::decode(r);
    let price = f64::decode(r);
    let quantity = u32::decode(r);
    ArgValue::Str(format!("symbol={symbol} price={price} quantity={quantity}"))
  }
}

#[test]
fn custom_type_composes_with_builtins() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("order.log");
  let logger = file_logger("orders", &path, "%(message)");

  let order = Order { symbol: "AAPL".into(), price: 220.10, quantity: 100 };
  info!(logger, "Order is {}", order);
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  assert_eq!(
    fs::read_to_string(&path).unwrap(),
    "Order is symbol=AAPL price=220.1 quantity=100\n"
  );
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct Quote {
  bid: f64,
  ask: f64,
}

impl std::fmt::Display for Quote {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "bid={} ask={}", self.bid, self.ask)
  }
}

flashlog::impl_pod_encode!(Quote);

#[test]
fn pod_type_raw_copies() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("quote.log");
  let logger = file_logger("quotes", &path, "%(message)");

  let quote = Quote { bid: 99.5, ask: 100.25 };
  info!(logger, "quote {}", quote);
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  assert_eq!(fs::read_to_string(&path).unwrap(), "quote bid=99.5 ask=100.25\n");
}

#[test]
fn logv_builds_named_template() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("logv.log");
  let logger = file_logger("logv", &path, "%(message)");

  let addr = "1.2.3.4";
  let port = 80u16;
  info_v!(logger, "connected", addr, port);
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  assert_eq!(
    fs::read_to_string(&path).unwrap(),
    "connected [addr: 1.2.3.4, port: 80]\n"
  );
}

#[test]
fn static_str_reference_arguments() {
  ensure_backend();
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("sref.log");
  let logger = file_logger("sref", &path, "%(message)");

  info!(logger, "component {} ready", StrRef("scheduler"));
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  assert_eq!(fs::read_to_string(&path).unwrap(), "component scheduler ready\n");
}

#[test]
fn null_sink_discards() {
  ensure_backend();
  let sink = flashlog::create_or_get_sink::<NullSink>("null", ()).unwrap();
  let logger =
    flashlog::create_or_get_logger("null-logger", vec![sink], LoggerConfig::default()).unwrap();
  for i in 0..100 {
    info!(logger, "discarded {}", i);
  }
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));
}
