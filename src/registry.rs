//! Process-wide registry and lifecycle.
//!
//! Lifecycle is `Uninitialized -> Running -> Stopping -> Stopped`, driven by
//! [`start`] and [`stop`]. Logger and sink maps sit behind a coarse mutex
//! touched only at creation and lookup, never on the hot path; producers
//! read a handful of atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::backend::{Backend, BackendOptions, StopPolicy};
use crate::clock;
use crate::context::QueueReg;
use crate::error::{Error, Result};
use crate::logger::{Logger, LoggerConfig};
use crate::sink::{MakeSink, Sink, SinkHandle, SinkKind};

/// Backend lifecycle states. `Stopped` is terminal: the backend cannot be
/// restarted within a process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
  Uninitialized = 0,
  Running = 1,
  Stopping = 2,
  Stopped = 3,
}

static STATE: AtomicU8 = AtomicU8::new(State::Uninitialized as u8);

pub fn state() -> State {
  match STATE.load(Ordering::Acquire) {
    1 => State::Running,
    2 => State::Stopping,
    3 => State::Stopped,
    _ => State::Uninitialized,
  }
}

/// Cheap gate used by `should_log`: true while records are still accepted
/// (the stopping drain included).
#[inline(always)]
pub(crate) fn is_active() -> bool {
  matches!(STATE.load(Ordering::Relaxed), 1 | 2)
}

struct Inner {
  loggers: HashMap<String, &'static Logger>,
  sinks: HashMap<String, Arc<SinkHandle>>,
  backend: Option<JoinHandle<()>>,
}

fn inner() -> &'static Mutex<Inner> {
  static INNER: OnceLock<Mutex<Inner>> = OnceLock::new();
  INNER.get_or_init(|| {
    Mutex::new(Inner { loggers: HashMap::new(), sinks: HashMap::new(), backend: None })
  })
}

static INTAKE: OnceLock<Sender<QueueReg>> = OnceLock::new();
static QUEUE_CAPACITY: AtomicUsize = AtomicUsize::new(128 * 1024);
static STOP_KIND: AtomicU8 = AtomicU8::new(0);
static STOP_BLOCK_NANOS: AtomicU64 = AtomicU64::new(0);

/// Spawn the backend thread. Errors unless the process is still
/// uninitialized.
pub fn start(options: BackendOptions) -> Result<()> {
  let cap = options.default_queue_capacity;
  if !cap.is_power_of_two() || cap < 64 {
    return Err(Error::Config(format!(
      "default_queue_capacity must be a power of two >= 64, got {cap}"
    )));
  }
  STATE
    .compare_exchange(
      State::Uninitialized as u8,
      State::Running as u8,
      Ordering::AcqRel,
      Ordering::Acquire,
    )
    .map_err(|_| Error::Lifecycle("start requires an uninitialized backend"))?;
  clock::init();
  QUEUE_CAPACITY.store(cap, Ordering::Relaxed);
  match options.on_stop_policy {
    StopPolicy::Drop => STOP_KIND.store(0, Ordering::Relaxed),
    StopPolicy::Block(limit) => {
      STOP_KIND.store(1, Ordering::Relaxed);
      STOP_BLOCK_NANOS.store(limit.as_nanos() as u64, Ordering::Relaxed);
    }
  }
  let (tx, rx) = crossbeam_channel::unbounded();
  let _ = INTAKE.set(tx);
  let thread_name = options.backend_thread_name.clone();
  let backend = Backend::new(options, rx);
  let spawned = std::thread::Builder::new().name(thread_name).spawn(move || backend.run());
  match spawned {
    Ok(handle) => {
      inner().lock().backend = Some(handle);
      Ok(())
    }
    Err(err) => {
      STATE.store(State::Uninitialized as u8, Ordering::Release);
      Err(Error::Io(err))
    }
  }
}

/// Raise the stop flag, wait for the backend to drain and exit. Idempotent
/// once stopping has begun; errors if the backend never started.
pub fn stop() -> Result<()> {
  match STATE.compare_exchange(
    State::Running as u8,
    State::Stopping as u8,
    Ordering::AcqRel,
    Ordering::Acquire,
  ) {
    Ok(_) => {
      let handle = inner().lock().backend.take();
      if let Some(handle) = handle {
        let _ = handle.join();
      }
      STATE.store(State::Stopped as u8, Ordering::Release);
      Ok(())
    }
    Err(s) if s == State::Stopping as u8 || s == State::Stopped as u8 => Ok(()),
    Err(_) => Err(Error::Lifecycle("stop requires a running backend")),
  }
}

/// Idempotent named-logger creation: an existing logger is returned
/// unchanged and the given sinks/config are ignored.
pub fn create_or_get_logger(
  name: &str,
  sinks: Vec<Arc<SinkHandle>>,
  config: LoggerConfig,
) -> Result<&'static Logger> {
  let mut inner = inner().lock();
  if let Some(logger) = inner.loggers.get(name) {
    return Ok(*logger);
  }
  let logger: &'static Logger = Box::leak(Box::new(Logger::new(name.to_string(), sinks, config)?));
  inner.loggers.insert(name.to_string(), logger);
  Ok(logger)
}

pub fn get_logger(name: &str) -> Option<&'static Logger> {
  inner().lock().loggers.get(name).copied()
}

/// Idempotent named-sink creation. Retrieving an existing name with a
/// different kind fails.
pub fn create_or_get_sink<S: MakeSink>(name: &str, config: S::Config) -> Result<Arc<SinkHandle>> {
  let mut inner = inner().lock();
  if let Some(handle) = inner.sinks.get(name) {
    if handle.kind() != S::KIND {
      return Err(Error::SinkKindMismatch {
        name: name.to_string(),
        actual: handle.kind(),
        requested: S::KIND,
      });
    }
    return Ok(handle.clone());
  }
  let sink = S::make(name, config)?;
  let handle = Arc::new(SinkHandle::new(name.to_string(), S::KIND, Box::new(sink)));
  inner.sinks.insert(name.to_string(), handle.clone());
  Ok(handle)
}

/// Register a user-implemented sink under `name`.
pub fn add_custom_sink(name: &str, sink: Box<dyn Sink>) -> Result<Arc<SinkHandle>> {
  let mut inner = inner().lock();
  if let Some(handle) = inner.sinks.get(name) {
    if handle.kind() != SinkKind::Custom {
      return Err(Error::SinkKindMismatch {
        name: name.to_string(),
        actual: handle.kind(),
        requested: SinkKind::Custom,
      });
    }
    return Ok(handle.clone());
  }
  let handle = Arc::new(SinkHandle::new(name.to_string(), SinkKind::Custom, sink));
  inner.sinks.insert(name.to_string(), handle.clone());
  Ok(handle)
}

/// Look up an existing sink.
pub fn get_sink(name: &str) -> Result<Arc<SinkHandle>> {
  inner()
    .lock()
    .sinks
    .get(name)
    .cloned()
    .ok_or_else(|| Error::UnknownSink(name.to_string()))
}

pub(crate) fn all_sinks() -> Vec<Arc<SinkHandle>> {
  inner().lock().sinks.values().cloned().collect()
}

/// Hand a fresh producer queue to the backend. False when the backend was
/// never started.
pub(crate) fn register_queue(reg: QueueReg) -> bool {
  match INTAKE.get() {
    Some(tx) => tx.send(reg).is_ok(),
    None => false,
  }
}

pub(crate) fn queue_capacity() -> usize {
  QUEUE_CAPACITY.load(Ordering::Relaxed)
}

pub(crate) fn on_stop_policy() -> StopPolicy {
  match STOP_KIND.load(Ordering::Relaxed) {
    1 => StopPolicy::Block(Duration::from_nanos(STOP_BLOCK_NANOS.load(Ordering::Relaxed))),
    _ => StopPolicy::Drop,
  }
}
