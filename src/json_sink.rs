//! JSON file sink: newline-delimited JSON, one object per record.
//!
//! The logger's layout pattern is ignored; each record becomes an object
//! with a fixed field set plus every named argument as a top-level key. The
//! `message` field keeps the template verbatim, named placeholders
//! included, so consumers can group records by call site.

use std::io;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::file_sink::{FileSinkConfig, LogFile};
use crate::sink::{MakeSink, RecordView, Sink, SinkErrorPolicy, SinkKind};

pub struct JsonFileSink {
  file: LogFile,
  buf: Vec<u8>,
}

impl Sink for JsonFileSink {
  fn write(&mut self, record: &RecordView<'_>) -> io::Result<()> {
    let mut obj = Map::new();
    obj.insert("timestamp".into(), json!(record.timestamp_text));
    obj.insert("file_name".into(), json!(record.file_name));
    obj.insert("line_number".into(), json!(record.line_number));
    obj.insert("thread_id".into(), json!(record.thread_id));
    obj.insert("logger".into(), json!(record.logger_name));
    obj.insert("log_level".into(), json!(record.level_label));
    obj.insert("message".into(), json!(record.template));
    for (k, v) in record.named_args {
      obj.insert(k.clone(), json!(v));
    }
    self.buf.clear();
    serde_json::to_writer(&mut self.buf, &Value::Object(obj))?;
    self.file.write_line(&self.buf)
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

impl MakeSink for JsonFileSink {
  type Config = FileSinkConfig;
  const KIND: SinkKind = SinkKind::JsonFile;

  fn make(name: &str, config: Self::Config) -> Result<Self> {
    Ok(JsonFileSink { file: LogFile::create(name, config)?, buf: Vec::with_capacity(256) })
  }
}
