//! Sink interface, console and null sinks.
//!
//! Sinks are driven exclusively by the backend thread, so implementations
//! need no internal locking; the `Mutex` in [`SinkHandle`] exists to make
//! the shared handle `Sync` and is never contended.

use std::io::{self, Write};

use parking_lot::{Mutex, MutexGuard};

use crate::level::{Level, LEVEL_COUNT};

/// Which constructor a named sink was created with. Retrieval with a
/// different kind is a configuration error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SinkKind {
  Console,
  File,
  JsonFile,
  Null,
  Custom,
}

/// What the backend does when a sink's write or flush fails.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SinkErrorPolicy {
  /// Swallow the error.
  Ignore,
  /// Ask the sink to reopen its device, then report if that fails too.
  Reopen,
  /// Hand the error to the backend error handler.
  #[default]
  Report,
}

/// One fully formatted record as handed to sinks. Pattern-oriented sinks
/// write [`line`](Self::line); structured sinks pick the fields they need.
pub struct RecordView<'a> {
  pub epoch_ns: i64,
  pub timestamp_text: &'a str,
  pub level: Level,
  pub level_label: &'a str,
  pub thread_id: u32,
  pub thread_name: &'a str,
  pub logger_name: &'a str,
  /// Full source path of the call site.
  pub file: &'a str,
  /// Last component of [`file`](Self::file).
  pub file_name: &'a str,
  pub line_number: u32,
  /// Raw message template, named placeholders preserved verbatim.
  pub template: &'a str,
  /// Message with arguments substituted.
  pub message: &'a str,
  pub named_args: &'a [(String, String)],
  /// The formatted pattern line, without a trailing newline.
  pub line: &'a str,
}

/// Output adapter capability set. `write` is called for every record routed
/// to the sink; `flush` at least on the periodic interval, the record-count
/// threshold, explicit flush requests and shutdown.
pub trait Sink: Send {
  fn write(&mut self, record: &RecordView<'_>) -> io::Result<()>;
  fn flush(&mut self) -> io::Result<()>;

  /// Time-based rotation hook; called from backend housekeeping.
  fn rotate_if_needed(&mut self, _now_epoch_ns: i64) -> io::Result<()> {
    Ok(())
  }

  /// Recovery hook for the `Reopen` error policy.
  fn reopen(&mut self) -> io::Result<()> {
    Ok(())
  }

  fn error_policy(&self) -> SinkErrorPolicy {
    SinkErrorPolicy::Report
  }
}

/// Constructor trait behind `create_or_get_sink`.
pub trait MakeSink: Sink + Sized + 'static {
  type Config;
  const KIND: SinkKind;
  fn make(name: &str, config: Self::Config) -> crate::error::Result<Self>;
}

/// Named, reference-counted sink shared by any number of loggers.
pub struct SinkHandle {
  name: String,
  kind: SinkKind,
  inner: Mutex<Box<dyn Sink>>,
}

impl SinkHandle {
  pub(crate) fn new(name: String, kind: SinkKind, sink: Box<dyn Sink>) -> Self {
    SinkHandle { name, kind, inner: Mutex::new(sink) }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> SinkKind {
    self.kind
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Sink>> {
    self.inner.lock()
  }
}

/// Default ANSI colour codes per level.
pub const DEFAULT_LEVEL_COLOURS: [&str; LEVEL_COUNT] = [
  "\x1b[2m",  // TRACE_L3
  "\x1b[2m",  // TRACE_L2
  "\x1b[2m",  // TRACE_L1
  "\x1b[36m", // DEBUG
  "\x1b[32m", // INFO
  "\x1b[33m", // WARNING
  "\x1b[31m", // ERROR
  "\x1b[1;31m", // CRITICAL
  "\x1b[35m", // BACKTRACE
];

const COLOUR_RESET: &str = "\x1b[0m";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ConsoleStream {
  #[default]
  Stdout,
  Stderr,
}

#[derive(Clone, Debug)]
pub struct ConsoleSinkConfig {
  pub stream: ConsoleStream,
  /// `None` disables colours; `Some` gives one escape prefix per level.
  pub colours: Option<[&'static str; LEVEL_COUNT]>,
  /// Flush the stream after every record. On by default.
  pub flush_each_write: bool,
  pub error_policy: SinkErrorPolicy,
}

impl Default for ConsoleSinkConfig {
  fn default() -> Self {
    ConsoleSinkConfig {
      stream: ConsoleStream::Stdout,
      colours: None,
      flush_each_write: true,
      error_policy: SinkErrorPolicy::Report,
    }
  }
}

/// Writes one line per record to stdout or stderr.
pub struct ConsoleSink {
  config: ConsoleSinkConfig,
}

impl ConsoleSink {
  fn write_line(&self, out: &mut dyn Write, record: &RecordView<'_>) -> io::Result<()> {
    if let Some(colours) = &self.config.colours {
      out.write_all(colours[record.level as usize].as_bytes())?;
      out.write_all(record.line.as_bytes())?;
      out.write_all(COLOUR_RESET.as_bytes())?;
    } else {
      out.write_all(record.line.as_bytes())?;
    }
    out.write_all(b"\n")
  }
}

impl Sink for ConsoleSink {
  fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
    match self.config.stream {
      ConsoleStream::Stdout => {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.write_line(&mut out, record)?;
        if self.config.flush_each_write {
          out.flush()?;
        }
      }
      ConsoleStream::Stderr => {
        let stderr = io::stderr();
        let mut out = stderr.lock();
        self.write_line(&mut out, record)?;
        if self.config.flush_each_write {
          out.flush()?;
        }
      }
    }
    Ok(())
  }

  fn flush(&mut self) -> io::Result<()> {
    match self.config.stream {
      ConsoleStream::Stdout => io::stdout().flush(),
      ConsoleStream::Stderr => io::stderr().flush(),
    }
  }

  fn error_policy(&self) -> SinkErrorPolicy {
    self.config.error_policy
  }
}

impl MakeSink for ConsoleSink {
  type Config = ConsoleSinkConfig;
  const KIND: SinkKind = SinkKind::Console;

  fn make(_name: &str, config: Self::Config) -> crate::error::Result<Self> {
    Ok(ConsoleSink { config })
  }
}

/// Discards everything. Used by tests and as a routing placeholder.
#[derive(Default)]
pub struct NullSink;

impl Sink for NullSink {
  fn write(&mut self, _record: &RecordView<'_>) -> io::Result<()> {
    Ok(())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl MakeSink for NullSink {
  type Config = ();
  const KIND: SinkKind = SinkKind::Null;

  fn make(_name: &str, _config: Self::Config) -> crate::error::Result<Self> {
    Ok(NullSink)
  }
}
