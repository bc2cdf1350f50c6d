//! File sink: open modes, filename suffixes, rotation and event callbacks.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;

use crate::error::Result;
use crate::sink::{MakeSink, RecordView, Sink, SinkErrorPolicy, SinkKind};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OpenMode {
  /// Truncate on open (`'w'`).
  Write,
  /// Append to an existing file (`'a'`).
  #[default]
  Append,
}

/// Suffix appended to the configured filename when the sink opens.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FilenameAppend {
  #[default]
  None,
  /// `app.log` becomes `app_20260802.log`.
  StartDate,
  /// `app.log` becomes `app_20260802_153045.log`.
  StartDateTime,
}

/// Rotate by size, by time, or both; whichever triggers first wins.
#[derive(Copy, Clone, Debug, Default)]
pub struct RotationPolicy {
  pub max_size: Option<u64>,
  pub interval: Option<Duration>,
}

type PathCallback = Box<dyn FnMut(&Path) + Send>;

/// Before/after open/close hooks, fired on the thread driving the sink.
#[derive(Default)]
pub struct FileEventNotifier {
  pub before_open: Option<PathCallback>,
  pub after_open: Option<PathCallback>,
  pub before_close: Option<PathCallback>,
  pub after_close: Option<PathCallback>,
}

pub struct FileSinkConfig {
  pub open_mode: OpenMode,
  pub filename_append: FilenameAppend,
  pub rotation: Option<RotationPolicy>,
  pub notifier: FileEventNotifier,
  pub error_policy: SinkErrorPolicy,
}

impl Default for FileSinkConfig {
  fn default() -> Self {
    FileSinkConfig {
      open_mode: OpenMode::Append,
      filename_append: FilenameAppend::None,
      rotation: None,
      notifier: FileEventNotifier::default(),
      error_policy: SinkErrorPolicy::Report,
    }
  }
}

/// Shared file management for the text and JSON file sinks: buffered
/// writes, size/time rotation, reopen recovery.
pub(crate) struct LogFile {
  path: PathBuf,
  writer: Option<BufWriter<File>>,
  config: FileSinkConfig,
  written: u64,
  opened_at: SystemTime,
  rotation_index: u32,
}

impl LogFile {
  pub(crate) fn create(name: &str, config: FileSinkConfig) -> Result<LogFile> {
    let path = suffixed_path(Path::new(name), config.filename_append);
    let mut f = LogFile {
      path,
      writer: None,
      config,
      written: 0,
      opened_at: SystemTime::now(),
      rotation_index: 0,
    };
    f.open()?;
    Ok(f)
  }

  pub(crate) fn error_policy(&self) -> SinkErrorPolicy {
    self.config.error_policy
  }

  fn open(&mut self) -> io::Result<()> {
    if let Some(cb) = &mut self.config.notifier.before_open {
      cb(&self.path);
    }
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }
    let mut opts = OpenOptions::new();
    opts.create(true).write(true);
    match self.config.open_mode {
      OpenMode::Write => opts.truncate(true),
      OpenMode::Append => opts.append(true),
    };
    let file = opts.open(&self.path)?;
    self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
    self.writer = Some(BufWriter::new(file));
    self.opened_at = SystemTime::now();
    if let Some(cb) = &mut self.config.notifier.after_open {
      cb(&self.path);
    }
    Ok(())
  }

  fn close(&mut self) -> io::Result<()> {
    if let Some(mut w) = self.writer.take() {
      if let Some(cb) = &mut self.config.notifier.before_close {
        cb(&self.path);
      }
      w.flush()?;
      drop(w);
      if let Some(cb) = &mut self.config.notifier.after_close {
        cb(&self.path);
      }
    }
    Ok(())
  }

  /// Write one record line; a trailing newline is appended. Size rotation
  /// happens *before* the write so no file exceeds the configured limit.
  pub(crate) fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
    let incoming = line.len() as u64 + 1;
    if let Some(max) = self.config.rotation.and_then(|r| r.max_size) {
      if self.written > 0 && self.written + incoming > max {
        self.rotate()?;
      }
    }
    let w = self.writer.as_mut().ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "log file closed"))?;
    w.write_all(line)?;
    w.write_all(b"\n")?;
    self.written += incoming;
    Ok(())
  }

  pub(crate) fn flush(&mut self) -> io::Result<()> {
    match self.writer.as_mut() {
      Some(w) => w.flush(),
      None => Ok(()),
    }
  }

  pub(crate) fn rotate_if_due(&mut self) -> io::Result<()> {
    if let Some(interval) = self.config.rotation.and_then(|r| r.interval) {
      let age = self.opened_at.elapsed().unwrap_or_default();
      if age >= interval && self.written > 0 {
        self.rotate()?;
      }
    }
    Ok(())
  }

  pub(crate) fn reopen(&mut self) -> io::Result<()> {
    self.close()?;
    self.open()
  }

  /// Close the active file, move it to the next numbered slot, reopen the
  /// base path. `app.log` rotates through `app.1.log`, `app.2.log`, …
  fn rotate(&mut self) -> io::Result<()> {
    self.close()?;
    self.rotation_index += 1;
    let rotated = numbered_path(&self.path, self.rotation_index);
    fs::rename(&self.path, &rotated)?;
    self.written = 0;
    // A rotated-out file must never be appended to again.
    let mode = std::mem::replace(&mut self.config.open_mode, OpenMode::Write);
    let out = self.open();
    self.config.open_mode = mode;
    out
  }
}

impl Drop for LogFile {
  fn drop(&mut self) {
    let _ = self.close();
  }
}

fn suffixed_path(base: &Path, append: FilenameAppend) -> PathBuf {
  let suffix = match append {
    FilenameAppend::None => return base.to_path_buf(),
    FilenameAppend::StartDate => Local::now().format("%Y%m%d").to_string(),
    FilenameAppend::StartDateTime => Local::now().format("%Y%m%d_%H%M%S").to_string(),
  };
  let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
  let name = match base.extension().and_then(|e| e.to_str()) {
    Some(ext) => format!("{stem}_{suffix}.{ext}"),
    None => format!("{stem}_{suffix}"),
  };
  base.with_file_name(name)
}

fn numbered_path(base: &Path, index: u32) -> PathBuf {
  let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
  let name = match base.extension().and_then(|e| e.to_str()) {
    Some(ext) => format!("{stem}.{index}.{ext}"),
    None => format!("{stem}.{index}"),
  };
  base.with_file_name(name)
}

/// Plain-text file sink: one pattern-formatted line per record, UTF-8.
pub struct FileSink {
  file: LogFile,
}

impl Sink for FileSink {
  fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
    self.file.write_line(record.line.as_bytes())
  }

  fn flush(&mut self) -> io::Result<()> {
    self.file.flush()
  }

  fn rotate_if_needed(&mut self, _now_epoch_ns: i64) -> io::Result<()> {
    self.file.rotate_if_due()
  }

  fn reopen(&mut self) -> io::Result<()> {
    self.file.reopen()
  }

  fn error_policy(&self) -> SinkErrorPolicy {
    self.file.error_policy()
  }
}

impl MakeSink for FileSink {
  type Config = FileSinkConfig;
  const KIND: SinkKind = SinkKind::File;

  fn make(name: &str, config: Self::Config) -> Result<Self> {
    Ok(FileSink { file: LogFile::create(name, config)? })
  }
}
