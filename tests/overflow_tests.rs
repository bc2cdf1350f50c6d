//! Drop-policy overflow: a stalled backend, a tiny ring, a flood of
//! records. Expect at least one delivered record and a WARNING summary
//! reporting the dropped count.

use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use flashlog::{
  info, BackendOptions, LoggerConfig, OverflowPolicy, PatternOptions, RecordView, Sink,
};

/// Blocks every write until the gate opens, then records lines.
struct GateSink {
  gate: Arc<(Mutex<bool>, Condvar)>,
  entered: mpsc::Sender<()>,
  lines: Arc<Mutex<Vec<String>>>,
}

impl Sink for GateSink {
  fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
    let _ = self.entered.send(());
    let (lock, cvar) = &*self.gate;
    let mut open = lock.lock().unwrap();
    while !*open {
      open = cvar.wait(open).unwrap();
    }
    self.lines.lock().unwrap().push(record.line.to_string());
    Ok(())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

#[test]
fn drop_policy_counts_and_reports() {
  flashlog::start_with(BackendOptions {
    default_queue_capacity: 256,
    flush_interval: Duration::from_millis(50),
    sleep_duration_min: Duration::from_micros(50),
    sleep_duration_max: Duration::from_millis(1),
    ..Default::default()
  })
  .unwrap();

  let gate = Arc::new((Mutex::new(false), Condvar::new()));
  let lines = Arc::new(Mutex::new(Vec::new()));
  let (entered_tx, entered_rx) = mpsc::channel();
  let sink = flashlog::add_custom_sink(
    "gate",
    Box::new(GateSink { gate: gate.clone(), entered: entered_tx, lines: lines.clone() }),
  )
  .unwrap();
  let logger = flashlog::create_or_get_logger(
    "flood",
    vec![sink],
    LoggerConfig {
      pattern: PatternOptions::new("%(message)"),
      overflow_policy: OverflowPolicy::Drop,
      ..Default::default()
    },
  )
  .unwrap();

  // Stall the backend inside the first write.
  info!(logger, "msg {}", 0);
  entered_rx.recv_timeout(Duration::from_secs(5)).expect("backend never reached the sink");

  // Flood a ring that holds only a handful of records.
  const FLOOD: usize = 1000;
  for i in 1..=FLOOD {
    info!(logger, "msg {}", i);
  }

  {
    let (lock, cvar) = &*gate;
    *lock.lock().unwrap() = true;
    cvar.notify_all();
  }

  // Wait for the drop summary to surface.
  let deadline = Instant::now() + Duration::from_secs(10);
  let summary_count = loop {
    {
      let lines = lines.lock().unwrap();
      if let Some(count) = lines.iter().find_map(parse_summary) {
        break count;
      }
    }
    assert!(Instant::now() < deadline, "no drop summary emitted");
    std::thread::sleep(Duration::from_millis(20));
  };

  let delivered = lines
    .lock()
    .unwrap()
    .iter()
    .filter(|l| l.starts_with("msg "))
    .count();
  assert!(delivered >= 1, "at least one record must get through");
  // Ring of 256 bytes holds at most a handful of 48-byte frames.
  assert!(
    summary_count as usize >= FLOOD - 10,
    "expected nearly all of the flood dropped, summary says {summary_count}"
  );

  flashlog::stop().unwrap();
}

fn parse_summary(line: &String) -> Option<u64> {
  let rest = line.split("dropped ").nth(1)?;
  rest.split_whitespace().next()?.parse().ok()
}
