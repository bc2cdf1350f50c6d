//! Named loggers and the call-site API.
//!
//! A [`Logger`] ties a name to an ordered sink list, a compiled layout
//! pattern, a level threshold and an overflow policy. Loggers are created
//! through the registry, leaked to `'static` and never destroyed before
//! backend teardown, which is what lets record headers carry plain
//! pointers to them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::StopPolicy;
use crate::clock;
use crate::codec::EncodeArgs;
use crate::context;
use crate::error::Result;
use crate::level::Level;
use crate::pattern::{CompiledPattern, PatternOptions};
use crate::record::{Metadata, RecordHeader, RECORD_HEADER_SIZE};
use crate::registry::{self, State};
use crate::sink::SinkHandle;
use crate::spsc::OverflowPolicy;

/// Logger creation options: the layout, the threshold and the queue
/// overflow policy for statements issued through this logger.
#[derive(Clone, Debug)]
pub struct LoggerConfig {
  pub pattern: PatternOptions,
  pub level: Level,
  pub overflow_policy: OverflowPolicy,
}

impl Default for LoggerConfig {
  fn default() -> Self {
    LoggerConfig {
      pattern: PatternOptions::default(),
      level: Level::Info,
      overflow_policy: OverflowPolicy::Block,
    }
  }
}

impl From<PatternOptions> for LoggerConfig {
  fn from(pattern: PatternOptions) -> Self {
    LoggerConfig { pattern, ..Default::default() }
  }
}

pub struct Logger {
  name: String,
  sinks: Vec<Arc<SinkHandle>>,
  pattern: CompiledPattern,
  level: AtomicU8,
  policy: OverflowPolicy,
}

impl Logger {
  pub(crate) fn new(name: String, sinks: Vec<Arc<SinkHandle>>, config: LoggerConfig) -> Result<Logger> {
    Ok(Logger {
      name,
      sinks,
      pattern: CompiledPattern::compile(&config.pattern)?,
      level: AtomicU8::new(config.level as u8),
      policy: config.overflow_policy,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn sinks(&self) -> &[Arc<SinkHandle>] {
    &self.sinks
  }

  pub(crate) fn pattern(&self) -> &CompiledPattern {
    &self.pattern
  }

  pub fn level(&self) -> Level {
    Level::from_u8(self.level.load(Ordering::Relaxed))
  }

  pub fn set_level(&self, level: Level) {
    self.level.store(level as u8, Ordering::Relaxed);
  }

  /// Constant-time level gate. False also before `start` and after `stop`,
  /// so gated statements encode nothing at all.
  #[inline(always)]
  pub fn should_log(&self, level: Level) -> bool {
    (level as u8) >= self.level.load(Ordering::Relaxed) && registry::is_active()
  }

  /// Encode `args` and publish one record on the calling thread's queue.
  /// Never returns an error to the caller: full-queue outcomes follow the
  /// logger's overflow policy and are counted, not thrown.
  #[inline]
  pub fn enqueue<A: EncodeArgs>(&'static self, meta: &'static Metadata, args: &A) {
    let deadline = match registry::state() {
      State::Running => None,
      State::Stopping => match registry::on_stop_policy() {
        StopPolicy::Drop => {
          context::count_drop(self.policy);
          return;
        }
        StopPolicy::Block(limit) => Some(Instant::now() + limit),
      },
      _ => return,
    };
    context::with_producer(self.policy, |prod, scratch, dropped| {
      scratch.reset();
      let payload = args.encoded_size(scratch);
      let total = RECORD_HEADER_SIZE + payload;
      match prod.reserve(total, deadline) {
        Ok(frame) => {
          let header = RecordHeader::new(total as u32, clock::read_tsc(), meta, self, A::DECODER);
          header.write_to(frame);
          let mut w = crate::codec::PayloadWriter::new(&mut frame[RECORD_HEADER_SIZE..], scratch);
          args.encode(&mut w);
          prod.commit();
        }
        Err(_) => {
          dropped.fetch_add(1, Ordering::Relaxed);
        }
      }
    });
  }

  /// Block until the backend has drained everything this thread enqueued
  /// before the call and flushed all sinks, or until `timeout`. Returns
  /// whether the flush was acknowledged.
  pub fn flush_sync(&'static self, timeout: Duration) -> bool {
    if registry::state() != State::Running {
      return false;
    }
    static FLUSH_META: Metadata = Metadata::flush_sentinel();
    let deadline = Instant::now() + timeout;
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    let sent = context::with_producer(self.policy, |prod, _scratch, _dropped| {
      let total = RECORD_HEADER_SIZE + std::mem::size_of::<usize>();
      match prod.reserve_blocking(total, deadline) {
        Ok(frame) => {
          let ptr = Box::into_raw(Box::new(tx.clone())) as usize;
          let header =
            RecordHeader::new(total as u32, clock::read_tsc(), &FLUSH_META, self, <() as EncodeArgs>::DECODER);
          header.write_to(frame);
          frame[RECORD_HEADER_SIZE..total].copy_from_slice(&ptr.to_ne_bytes());
          prod.commit();
          true
        }
        Err(_) => false,
      }
    })
    .unwrap_or(false);
    sent && rx.recv_timeout(timeout).is_ok()
  }
}
