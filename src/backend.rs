//! The backend thread.
//!
//! One dedicated consumer drains every producer queue, picks the record
//! with the smallest timestamp across queues, decodes it through the call
//! site's function pointer, formats it with the logger's compiled pattern
//! and hands it to the logger's sinks. Decoded records sit in a min-heap of
//! transit events between select and dispatch, which is also where the
//! optional strict-order grace window applies.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use smallvec::{smallvec, SmallVec};

use crate::clock;
use crate::codec::{ArgValue, PayloadReader};
use crate::context::QueueReg;
use crate::error::Error;
use crate::level::{Level, LEVEL_COUNT, LEVEL_LABELS};
use crate::logger::Logger;
use crate::pattern::{
  compile_template, format_message, render_named, CompiledPattern, CompiledTemplate, LineContext,
  PatternOptions,
};
use crate::record::{Metadata, RecordHeader, RecordKind, RECORD_HEADER_SIZE};
use crate::registry::{self, State};
use crate::sink::{RecordView, SinkErrorPolicy, SinkHandle};
use crate::spsc;

/// What producers do with new records while the backend is stopping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopPolicy {
  /// Count the record as dropped and return.
  Drop,
  /// Spin for at most this long for queue space, then drop.
  Block(Duration),
}

type ErrorHandler = Box<dyn Fn(&Error) + Send>;

/// Backend configuration, passed to [`start_with`](crate::start_with).
pub struct BackendOptions {
  pub backend_thread_name: String,
  /// Pin the backend thread to this core.
  pub thread_affinity: Option<usize>,
  /// Bound on the shutdown drain; remaining records are discarded and
  /// counted once it expires.
  pub shutdown_timeout: Duration,
  /// Idle backoff range: the sleep starts at `min` and doubles up to `max`
  /// while no queue has data.
  pub sleep_duration_min: Duration,
  pub sleep_duration_max: Duration,
  /// Sinks are flushed at least this often while records flow.
  pub flush_interval: Duration,
  /// …and after this many records, whichever comes first.
  pub flush_record_threshold: usize,
  /// Wait this long for late records with smaller timestamps before
  /// emitting. Off by default: best-effort global order, strict per-thread
  /// order.
  pub strict_order_grace: Option<Duration>,
  /// Start draining the transit heap early past this size.
  pub transit_events_soft_limit: usize,
  /// Never hold more transit events than this.
  pub transit_events_hard_limit: usize,
  /// Cadence of counter-to-wall-clock recalibration.
  pub rdtsc_resync_interval: Duration,
  /// User-visible level labels, `%(log_level)` and the JSON `log_level`
  /// field.
  pub log_level_descriptions: [&'static str; LEVEL_COUNT],
  /// Ring size for newly created producer queues, bytes, power of two.
  pub default_queue_capacity: usize,
  pub on_stop_policy: StopPolicy,
  /// Receives sink and backend errors; stderr when unset.
  pub error_handler: Option<ErrorHandler>,
}

impl Default for BackendOptions {
  fn default() -> Self {
    BackendOptions {
      backend_thread_name: "flashlog-backend".into(),
      thread_affinity: None,
      shutdown_timeout: Duration::from_secs(5),
      sleep_duration_min: Duration::from_micros(100),
      sleep_duration_max: Duration::from_millis(10),
      flush_interval: Duration::from_millis(500),
      flush_record_threshold: 4096,
      strict_order_grace: None,
      transit_events_soft_limit: 4096,
      transit_events_hard_limit: 65536,
      rdtsc_resync_interval: Duration::from_millis(700),
      log_level_descriptions: LEVEL_LABELS,
      default_queue_capacity: 128 * 1024,
      on_stop_policy: StopPolicy::Drop,
      error_handler: None,
    }
  }
}

/// Records drained per scheduling round before housekeeping runs again.
const PUMP_BUDGET: usize = 512;

struct QueueState {
  cons: spsc::Consumer,
  /// Stable registration order, the cross-queue tie-break.
  id: usize,
  thread_id: u32,
  thread_name: Arc<str>,
  dropped: Arc<AtomicU64>,
  reported: u64,
  retired: Arc<AtomicBool>,
  /// Converted timestamps are clamped nondecreasing per queue so clock
  /// recalibration can never reorder a single producer's records.
  last_ts: i64,
}

/// A decoded record waiting for dispatch, ordered by timestamp with
/// registration order and arrival sequence as tie-breaks.
struct TransitEvent {
  ts_ns: i64,
  qid: usize,
  seq: u64,
  logger: &'static Logger,
  meta: &'static Metadata,
  args: SmallVec<[ArgValue; 8]>,
  thread_id: u32,
  thread_name: Arc<str>,
}

impl TransitEvent {
  #[inline(always)]
  fn key(&self) -> (i64, usize, u64) {
    (self.ts_ns, self.qid, self.seq)
  }
}

impl PartialEq for TransitEvent {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}
impl Eq for TransitEvent {}
impl PartialOrd for TransitEvent {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for TransitEvent {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.key().cmp(&other.key())
  }
}

pub(crate) struct Backend {
  opts: BackendOptions,
  intake: Receiver<QueueReg>,
  queues: Vec<QueueState>,
  next_qid: usize,
  transit: BinaryHeap<Reverse<TransitEvent>>,
  seq: u64,
  templates: HashMap<usize, CompiledTemplate>,
  summary_pattern: &'static CompiledPattern,
  labels: [&'static str; LEVEL_COUNT],
  process_id: u32,
  ts_buf: String,
  msg_buf: String,
  named: Vec<(String, String)>,
  named_text: String,
  line_buf: String,
  backoff: Duration,
  last_flush: Instant,
  last_resync: Instant,
  records_since_flush: usize,
}

impl Backend {
  pub(crate) fn new(opts: BackendOptions, intake: Receiver<QueueReg>) -> Backend {
    let summary_pattern = CompiledPattern::compile(&PatternOptions::new(
      "%(time) [%(thread_id)] %(log_level) %(logger) %(message)",
    ))
    .expect("builtin summary pattern compiles");
    let backoff = opts.sleep_duration_min;
    let labels = opts.log_level_descriptions;
    Backend {
      opts,
      intake,
      queues: Vec::new(),
      next_qid: 0,
      transit: BinaryHeap::new(),
      seq: 0,
      templates: HashMap::new(),
      summary_pattern: Box::leak(Box::new(summary_pattern)),
      labels,
      process_id: std::process::id(),
      ts_buf: String::new(),
      msg_buf: String::new(),
      named: Vec::new(),
      named_text: String::new(),
      line_buf: String::new(),
      backoff,
      last_flush: Instant::now(),
      last_resync: Instant::now(),
      records_since_flush: 0,
    }
  }

  pub(crate) fn run(mut self) {
    if let Some(core) = self.opts.thread_affinity {
      core_affinity::set_for_current(core_affinity::CoreId { id: core });
    }
    loop {
      self.poll_intake();
      let popped = self.pump(PUMP_BUDGET);
      self.emit_due(false);
      if registry::state() == State::Stopping {
        self.shutdown();
        return;
      }
      if popped == 0 && self.transit.is_empty() {
        std::thread::sleep(self.backoff);
        self.backoff = (self.backoff * 2).min(self.opts.sleep_duration_max);
      } else {
        self.backoff = self.opts.sleep_duration_min;
      }
      self.housekeeping();
    }
  }

  fn poll_intake(&mut self) {
    while let Ok(reg) = self.intake.try_recv() {
      self.queues.push(QueueState {
        cons: reg.cons,
        id: self.next_qid,
        thread_id: reg.thread_id,
        thread_name: reg.thread_name,
        dropped: reg.dropped,
        reported: 0,
        retired: reg.retired,
        last_ts: 0,
      });
      self.next_qid += 1;
    }
  }

  /// Snapshot every queue head, repeatedly take the smallest timestamp.
  /// Returns how many records were moved into transit.
  fn pump(&mut self, budget: usize) -> usize {
    let mut moved = 0;
    while moved < budget {
      let mut best: Option<(usize, i64)> = None;
      for (i, q) in self.queues.iter_mut().enumerate() {
        if let Some(frame) = q.cons.front() {
          let tsc = RecordHeader::read_from(frame).tsc;
          if best.map_or(true, |(_, t)| tsc < t) {
            best = Some((i, tsc));
          }
        }
      }
      let Some((qi, _)) = best else { break };
      self.pop_record(qi);
      moved += 1;
      if self.transit.len() >= self.opts.transit_events_hard_limit {
        self.emit_due(true);
      }
    }
    moved
  }

  /// Decode the head record of queue `qi`, release its ring slot, and
  /// either buffer it in transit or service it if it is a sentinel.
  fn pop_record(&mut self, qi: usize) {
    enum Popped {
      Event(TransitEvent),
      Flush(usize),
    }
    let seq = self.seq;
    let popped = {
      let q = &mut self.queues[qi];
      let frame = q.cons.front().expect("selected queue has a record");
      let header = RecordHeader::read_from(frame);
      let meta = header.meta();
      let out = match meta.kind {
        RecordKind::Flush => {
          let bytes = &frame[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + std::mem::size_of::<usize>()];
          Popped::Flush(usize::from_ne_bytes(bytes.try_into().unwrap()))
        }
        RecordKind::Log => {
          let mut reader = PayloadReader::new(&frame[RECORD_HEADER_SIZE..]);
          let args = header.decoder()(&mut reader);
          let ts_ns = clock::to_epoch_nanos(header.tsc).max(q.last_ts);
          q.last_ts = ts_ns;
          Popped::Event(TransitEvent {
            ts_ns,
            qid: q.id,
            seq,
            logger: header.logger(),
            meta,
            args,
            thread_id: q.thread_id,
            thread_name: q.thread_name.clone(),
          })
        }
      };
      q.cons.consume();
      out
    };
    match popped {
      Popped::Event(ev) => {
        self.seq += 1;
        self.transit.push(Reverse(ev));
      }
      Popped::Flush(ptr) => {
        self.emit_due(true);
        self.flush_sinks();
        let ack = unsafe { Box::from_raw(ptr as *mut Sender<()>) };
        let _ = ack.send(());
      }
    }
  }

  /// Dispatch transit events that are old enough. `force` empties the
  /// heap; the soft limit drains early regardless of the grace window.
  fn emit_due(&mut self, force: bool) {
    let grace_ns = self.opts.strict_order_grace.map_or(0, |d| d.as_nanos() as i64);
    let soft = self.opts.transit_events_soft_limit;
    while let Some(Reverse(top)) = self.transit.peek() {
      let due = force
        || grace_ns == 0
        || self.transit.len() > soft
        || top.ts_ns <= clock::to_epoch_nanos(clock::read_tsc()) - grace_ns;
      if !due {
        break;
      }
      let Reverse(ev) = self.transit.pop().unwrap();
      self.emit(ev);
    }
  }

  fn emit(&mut self, ev: TransitEvent) {
    let TransitEvent { ts_ns, logger, meta, args, thread_id, thread_name, .. } = ev;
    self.render_and_dispatch(
      logger.pattern(),
      logger.name(),
      logger.sinks(),
      meta,
      &args,
      ts_ns,
      thread_id,
      &thread_name,
    );
  }

  #[allow(clippy::too_many_arguments)]
  fn render_and_dispatch(
    &mut self,
    pattern: &CompiledPattern,
    logger_name: &str,
    sinks: &[Arc<SinkHandle>],
    meta: &'static Metadata,
    args: &[ArgValue],
    ts_ns: i64,
    thread_id: u32,
    thread_name: &str,
  ) {
    let tmpl = self
      .templates
      .entry(meta as *const Metadata as usize)
      .or_insert_with(|| compile_template(meta.template));
    self.msg_buf.clear();
    self.named.clear();
    format_message(tmpl, args, &mut self.msg_buf, &mut self.named);
    self.named_text.clear();
    render_named(&self.named, &mut self.named_text);
    self.ts_buf.clear();
    pattern.time_formatter().format(ts_ns, &mut self.ts_buf);
    self.line_buf.clear();
    let level = meta.level;
    let label = self.labels[level as usize];
    if !pattern.is_empty() {
      let ctx = LineContext {
        timestamp_text: &self.ts_buf,
        level_label: label,
        level_short: level.short_code(),
        logger_name,
        message: &self.msg_buf,
        named_args_text: &self.named_text,
        meta,
        thread_id,
        thread_name,
        process_id: self.process_id,
      };
      pattern.format(&ctx, &mut self.line_buf);
    }
    let view = RecordView {
      epoch_ns: ts_ns,
      timestamp_text: &self.ts_buf,
      level,
      level_label: label,
      thread_id,
      thread_name,
      logger_name,
      file: meta.file,
      file_name: meta.file_name(),
      line_number: meta.line,
      template: meta.template,
      message: &self.msg_buf,
      named_args: &self.named,
      line: &self.line_buf,
    };
    for handle in sinks {
      self.write_sink(handle, &view);
    }
    self.records_since_flush += 1;
  }

  fn write_sink(&self, handle: &SinkHandle, view: &RecordView<'_>) {
    let mut sink = handle.lock();
    let Err(err) = sink.write(view) else { return };
    match sink.error_policy() {
      SinkErrorPolicy::Ignore => {}
      SinkErrorPolicy::Reopen => {
        if let Err(err) = sink.reopen().and_then(|()| sink.write(view)) {
          self.report(handle.name(), err);
        }
      }
      SinkErrorPolicy::Report => self.report(handle.name(), err),
    }
  }

  fn report(&self, sink: &str, source: std::io::Error) {
    self.report_error(Error::SinkIo { sink: sink.to_string(), source });
  }

  fn report_error(&self, err: Error) {
    match &self.opts.error_handler {
      Some(handler) => handler(&err),
      None => eprintln!("flashlog backend: {err}"),
    }
  }

  fn housekeeping(&mut self) {
    let now = Instant::now();
    if now.duration_since(self.last_flush) >= self.opts.flush_interval
      || self.records_since_flush >= self.opts.flush_record_threshold
    {
      let now_ns = clock::to_epoch_nanos(clock::read_tsc());
      for handle in registry::all_sinks() {
        let mut sink = handle.lock();
        if let Err(err) = sink.rotate_if_needed(now_ns).and_then(|()| sink.flush()) {
          if sink.error_policy() != SinkErrorPolicy::Ignore {
            drop(sink);
            self.report(handle.name(), err);
          }
        }
      }
      self.last_flush = now;
      self.records_since_flush = 0;
    }
    if now.duration_since(self.last_resync) >= self.opts.rdtsc_resync_interval {
      clock::calibrate();
      self.last_resync = now;
    }
    self.summaries();
    self
      .queues
      .retain_mut(|q| !(q.retired.load(Ordering::Acquire) && q.cons.front().is_none()));
  }

  /// Surface dropped-record counters as WARNING summary records, routed to
  /// every registered sink.
  fn summaries(&mut self) {
    for i in 0..self.queues.len() {
      let q = &mut self.queues[i];
      let delta = q.dropped.load(Ordering::Relaxed) - q.reported;
      if delta == 0 {
        continue;
      }
      q.reported += delta;
      let thread_id = q.thread_id;
      let thread_name = q.thread_name.clone();
      self.emit_summary(thread_id, &thread_name, delta);
    }
  }

  fn emit_summary(&mut self, thread_id: u32, thread_name: &str, count: u64) {
    static DROP_META: Metadata = Metadata::new(
      Level::Warning,
      "dropped {count} log records from producer thread {thread_id}",
      file!(),
      0,
      module_path!(),
      "",
    );
    let args: SmallVec<[ArgValue; 8]> =
      smallvec![ArgValue::U64(count), ArgValue::U64(thread_id as u64)];
    let sinks = registry::all_sinks();
    let ts_ns = clock::to_epoch_nanos(clock::read_tsc());
    let pattern = self.summary_pattern;
    self.render_and_dispatch(pattern, "flashlog", &sinks, &DROP_META, &args, ts_ns, thread_id, thread_name);
  }

  fn flush_sinks(&mut self) {
    for handle in registry::all_sinks() {
      let mut sink = handle.lock();
      if let Err(err) = sink.flush() {
        if sink.error_policy() != SinkErrorPolicy::Ignore {
          drop(sink);
          self.report(handle.name(), err);
        }
      }
    }
    self.last_flush = Instant::now();
    self.records_since_flush = 0;
  }

  /// Stop requested: drain everything, bounded by the shutdown timeout,
  /// then flush and exit.
  fn shutdown(&mut self) {
    let deadline = Instant::now() + self.opts.shutdown_timeout;
    loop {
      self.poll_intake();
      let moved = self.pump(PUMP_BUDGET);
      if moved == 0 {
        let all_empty = self.queues.iter_mut().all(|q| q.cons.front().is_none());
        if all_empty {
          break;
        }
      }
      if Instant::now() >= deadline {
        self.discard_remaining();
        break;
      }
    }
    self.emit_due(true);
    self.summaries();
    self.flush_sinks();
  }

  /// Shutdown timeout expired: count whatever is still queued as dropped.
  fn discard_remaining(&mut self) {
    for i in 0..self.queues.len() {
      let mut discarded = 0u64;
      {
        let q = &mut self.queues[i];
        while q.cons.front().is_some() {
          q.cons.consume();
          discarded += 1;
        }
      }
      if discarded > 0 {
        let q = &self.queues[i];
        let (thread_id, thread_name) = (q.thread_id, q.thread_name.clone());
        self.emit_summary(thread_id, &thread_name, discarded);
      }
    }
  }
}
