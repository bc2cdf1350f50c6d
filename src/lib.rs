//! Low-latency asynchronous logging.
//!
//! Application threads encode log arguments into per-thread lock-free
//! queues and return in tens of nanoseconds; a single backend thread
//! merges the queues by timestamp, formats records and drives the sinks.
//!
//! ```no_run
//! use flashlog::{info, ConsoleSink, LoggerConfig};
//!
//! flashlog::start().unwrap();
//! let sink = flashlog::create_or_get_sink::<ConsoleSink>("console", Default::default()).unwrap();
//! let logger = flashlog::create_or_get_logger("app", vec![sink], LoggerConfig::default()).unwrap();
//! info!(logger, "hello {} number {}", "world", 42);
//! flashlog::stop().unwrap();
//! ```
//!
//! Formatting never happens on the calling thread: each statement stores a
//! `static` metadata block (template, source location, level) and a
//! monomorphized decoder function pointer, and copies the raw argument
//! bytes into the queue. Loggers own a `%(name)` layout pattern; sinks
//! include console, rotating text files and newline-delimited JSON.

pub mod backend;
pub mod clock;
pub mod codec;
mod context;
pub mod error;
pub mod file_sink;
pub mod json_sink;
pub mod level;
pub mod logger;
mod macros;
pub mod pattern;
pub mod record;
pub mod registry;
pub mod sink;
pub mod spsc;

// Used by the `impl_pod_encode!` expansion.
#[doc(hidden)]
pub use bytemuck;

pub use backend::{BackendOptions, StopPolicy};
pub use codec::{ArgValue, Blob, Encode, EncodeArgs, StrRef};
pub use error::{Error, Result};
pub use file_sink::{
  FileEventNotifier, FileSink, FileSinkConfig, FilenameAppend, OpenMode, RotationPolicy,
};
pub use json_sink::JsonFileSink;
pub use level::Level;
pub use logger::{Logger, LoggerConfig};
pub use pattern::{PatternOptions, Timezone};
pub use record::Metadata;
pub use registry::{
  add_custom_sink, create_or_get_logger, create_or_get_sink, get_logger, get_sink, State,
};
pub use sink::{
  ConsoleSink, ConsoleSinkConfig, ConsoleStream, NullSink, RecordView, Sink, SinkErrorPolicy,
  SinkHandle, SinkKind,
};
pub use spsc::OverflowPolicy;

use std::time::Duration;

/// Start the backend thread with default options.
pub fn start() -> Result<()> {
  registry::start(BackendOptions::default())
}

/// Start the backend thread with explicit options.
pub fn start_with(options: BackendOptions) -> Result<()> {
  registry::start(options)
}

/// Stop the backend: drain all queues (bounded by the shutdown timeout),
/// flush all sinks, join the thread.
pub fn stop() -> Result<()> {
  registry::stop()
}

/// Producer-side barrier: returns once the backend has drained past this
/// point and flushed the sinks, or when `timeout` expires.
pub fn flush_sync(logger: &'static Logger, timeout: Duration) -> bool {
  logger.flush_sync(timeout)
}
