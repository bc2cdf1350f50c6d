//! Error types.

use thiserror::Error;

/// Errors surfaced by registry and sink construction. Producer-side failures
/// (full queues, oversized records) are never returned to application code;
/// they are counted and reported by the backend (see `backend`).
#[derive(Error, Debug)]
pub enum Error {
  /// A queue rejected a record. Internal; surfaced only through drop
  /// summaries.
  #[error("queue full: record of {size} bytes rejected")]
  QueueFull { size: usize },

  /// A record that cannot fit a bounded ring even when empty.
  #[error("encoded record of {size} bytes exceeds queue capacity {capacity}")]
  EncodeOverflow { size: usize, capacity: usize },

  /// Sink write or flush failure, tagged with the sink name.
  #[error("sink '{sink}' I/O error: {source}")]
  SinkIo {
    sink: String,
    #[source]
    source: std::io::Error,
  },

  /// A sink was retrieved with a kind different from the one it was
  /// created with.
  #[error("sink '{name}' exists with kind {actual:?}, requested {requested:?}")]
  SinkKindMismatch {
    name: String,
    actual: crate::sink::SinkKind,
    requested: crate::sink::SinkKind,
  },

  /// Lookup of a sink that was never created.
  #[error("unknown sink '{0}'")]
  UnknownSink(String),

  /// Pattern string references an attribute outside the closed set.
  #[error("unknown pattern attribute '%({0})'")]
  UnknownAttribute(String),

  /// Timestamp format string rejected by the formatter.
  #[error("malformed timestamp format '{0}'")]
  BadTimeFormat(String),

  /// Invalid configuration value.
  #[error("configuration error: {0}")]
  Config(String),

  /// Lifecycle misuse: `start` twice, `stop` before `start`, …
  #[error("invalid lifecycle transition: {0}")]
  Lifecycle(&'static str),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
