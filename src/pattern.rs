//! Pattern formatter.
//!
//! Two templating layers live here: the *layout pattern* (`%(name)`
//! placeholders, compiled once per logger) and the *message template*
//! (`{}` / `{name}` / `{:spec}` placeholders, compiled once per call site
//! and cached by the backend). Both compile to segment lists so formatting
//! a record is a linear scan with no parsing.

use std::fmt::Write as _;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::codec::ArgValue;
use crate::error::{Error, Result};
use crate::record::Metadata;

/// Timezone used when rendering `%(time)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timezone {
  Local,
  Gmt,
}

/// Per-logger formatting options.
#[derive(Clone, Debug)]
pub struct PatternOptions {
  /// Layout pattern, e.g. `"%(time) [%(thread_id)] %(log_level) %(message)"`.
  pub pattern: String,
  /// `strftime` format for `%(time)`, extended with `%Qms`/`%Qus`/`%Qns`.
  pub time_format: String,
  pub timezone: Timezone,
  /// Directory depth for `%(source_location)`: 0 = filename only, N = last
  /// N path segments, -1 = full path.
  pub source_path_depth: i32,
}

impl PatternOptions {
  pub fn new(pattern: impl Into<String>) -> Self {
    PatternOptions { pattern: pattern.into(), ..Default::default() }
  }

  pub fn with_time_format(mut self, fmt: impl Into<String>, tz: Timezone) -> Self {
    self.time_format = fmt.into();
    self.timezone = tz;
    self
  }
}

impl Default for PatternOptions {
  fn default() -> Self {
    PatternOptions {
      pattern: "%(time) [%(thread_id)] %(short_source_location:<28) %(log_level:<9) %(logger:<12) %(message)".into(),
      time_format: "%H:%M:%S.%Qns".into(),
      timezone: Timezone::Local,
      source_path_depth: 0,
    }
  }
}

/// The closed set of layout attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Attribute {
  Time,
  FileName,
  FullPath,
  CallerFunction,
  LogLevel,
  LogLevelShortCode,
  LineNumber,
  Logger,
  Message,
  ThreadId,
  ThreadName,
  ProcessId,
  SourceLocation,
  ShortSourceLocation,
  Tags,
  NamedArgs,
}

fn parse_attribute(name: &str) -> Result<Attribute> {
  Ok(match name {
    "time" => Attribute::Time,
    "file_name" => Attribute::FileName,
    "full_path" => Attribute::FullPath,
    "caller_function" => Attribute::CallerFunction,
    "log_level" => Attribute::LogLevel,
    "log_level_short_code" => Attribute::LogLevelShortCode,
    "line_number" => Attribute::LineNumber,
    "logger" => Attribute::Logger,
    "message" => Attribute::Message,
    "thread_id" => Attribute::ThreadId,
    "thread_name" => Attribute::ThreadName,
    "process_id" => Attribute::ProcessId,
    "source_location" => Attribute::SourceLocation,
    "short_source_location" => Attribute::ShortSourceLocation,
    "tags" => Attribute::Tags,
    "named_args" => Attribute::NamedArgs,
    _ => return Err(Error::UnknownAttribute(name.to_string())),
  })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pad {
  None,
  Left(usize),
  Right(usize),
}

enum Segment {
  Literal(String),
  Attr(Attribute, Pad),
}

/// Everything the layout needs about one record, already stringified where
/// the backend owns the buffers.
pub struct LineContext<'a> {
  pub timestamp_text: &'a str,
  pub level_label: &'a str,
  pub level_short: &'a str,
  pub logger_name: &'a str,
  pub message: &'a str,
  pub named_args_text: &'a str,
  pub meta: &'a Metadata,
  pub thread_id: u32,
  pub thread_name: &'a str,
  pub process_id: u32,
}

/// A compiled layout pattern plus its timestamp formatter.
pub struct CompiledPattern {
  segments: Vec<Segment>,
  time: TimeFormatter,
  source_path_depth: i32,
}

impl CompiledPattern {
  pub fn compile(options: &PatternOptions) -> Result<CompiledPattern> {
    let mut segments = Vec::new();
    let mut lit = String::new();
    let src = options.pattern.as_str();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
      if bytes[i] == b'%' && i + 1 < bytes.len() && bytes[i + 1] == b'(' {
        let close = src[i + 2..].find(')').map(|p| i + 2 + p);
        if let Some(close) = close {
          let body = &src[i + 2..close];
          let (name, pad) = match body.split_once(':') {
            None => (body, Pad::None),
            Some((name, spec)) => (name, parse_pad(spec, body)?),
          };
          let attr = parse_attribute(name)?;
          if !lit.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut lit)));
          }
          segments.push(Segment::Attr(attr, pad));
          i = close + 1;
          continue;
        }
      }
      let ch = src[i..].chars().next().unwrap();
      lit.push(ch);
      i += ch.len_utf8();
    }
    if !lit.is_empty() {
      segments.push(Segment::Literal(lit));
    }
    Ok(CompiledPattern {
      segments,
      time: TimeFormatter::compile(&options.time_format, options.timezone)?,
      source_path_depth: options.source_path_depth,
    })
  }

  /// True when the layout is empty (JSON-only loggers skip line formatting).
  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn time_formatter(&self) -> &TimeFormatter {
    &self.time
  }

  /// Render one line (no trailing newline) into `out`.
  pub fn format(&self, ctx: &LineContext<'_>, out: &mut String) {
    for seg in &self.segments {
      match seg {
        Segment::Literal(s) => out.push_str(s),
        Segment::Attr(attr, pad) => {
          let start = out.len();
          self.push_attr(*attr, ctx, out);
          apply_pad(*pad, start, out);
        }
      }
    }
  }

  fn push_attr(&self, attr: Attribute, ctx: &LineContext<'_>, out: &mut String) {
    match attr {
      Attribute::Time => out.push_str(ctx.timestamp_text),
      Attribute::FileName => out.push_str(ctx.meta.file_name()),
      Attribute::FullPath => out.push_str(ctx.meta.file),
      Attribute::CallerFunction => out.push_str(ctx.meta.function),
      Attribute::LogLevel => out.push_str(ctx.level_label),
      Attribute::LogLevelShortCode => out.push_str(ctx.level_short),
      Attribute::LineNumber => {
        let _ = write!(out, "{}", ctx.meta.line);
      }
      Attribute::Logger => out.push_str(ctx.logger_name),
      Attribute::Message => out.push_str(ctx.message),
      Attribute::ThreadId => {
        let _ = write!(out, "{}", ctx.thread_id);
      }
      Attribute::ThreadName => out.push_str(ctx.thread_name),
      Attribute::ProcessId => {
        let _ = write!(out, "{}", ctx.process_id);
      }
      Attribute::SourceLocation => {
        push_source_path(ctx.meta.file, self.source_path_depth, out);
        let _ = write!(out, ":{}", ctx.meta.line);
      }
      Attribute::ShortSourceLocation => {
        out.push_str(ctx.meta.file_name());
        let _ = write!(out, ":{}", ctx.meta.line);
      }
      Attribute::Tags => out.push_str(ctx.meta.tags),
      Attribute::NamedArgs => out.push_str(ctx.named_args_text),
    }
  }
}

fn parse_pad(spec: &str, body: &str) -> Result<Pad> {
  let bad = || Error::Config(format!("bad pattern width in '%({body})'"));
  let mut chars = spec.chars();
  let dir = chars.next().ok_or_else(bad)?;
  let width: usize = chars.as_str().parse().map_err(|_| bad())?;
  match dir {
    '<' => Ok(Pad::Left(width)),
    '>' => Ok(Pad::Right(width)),
    _ => Err(bad()),
  }
}

fn apply_pad(pad: Pad, start: usize, out: &mut String) {
  let written = out.len() - start;
  match pad {
    Pad::None => {}
    Pad::Left(w) => {
      for _ in written..w {
        out.push(' ');
      }
    }
    Pad::Right(w) => {
      if written < w {
        let fill: String = std::iter::repeat(' ').take(w - written).collect();
        out.insert_str(start, &fill);
      }
    }
  }
}

/// Keep the last `depth` path segments; -1 keeps everything, 0 the filename.
fn push_source_path(path: &str, depth: i32, out: &mut String) {
  if depth < 0 {
    out.push_str(path);
    return;
  }
  let keep = depth as usize + 1;
  let mut cut = path.len();
  for _ in 0..keep {
    match path[..cut].rfind(['/', '\\']) {
      Some(i) => cut = i,
      None => {
        out.push_str(path);
        return;
      }
    }
  }
  out.push_str(&path[cut + 1..]);
}

/// Sub-second precision requested through a `%Q` extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SubSecond {
  Millis,
  Micros,
  Nanos,
}

/// `strftime` timestamp formatter with the `%Qms`/`%Qus`/`%Qns` extension.
/// Compiled once; formatting splits the format around the `%Q` token and
/// renders the fractional part manually.
pub struct TimeFormatter {
  prefix: String,
  sub: Option<SubSecond>,
  suffix: String,
  timezone: Timezone,
}

impl TimeFormatter {
  pub fn compile(format: &str, timezone: Timezone) -> Result<TimeFormatter> {
    let (prefix, sub, suffix) = match format.find("%Q") {
      None => (format.to_string(), None, String::new()),
      Some(i) => {
        let rest = &format[i + 2..];
        let (sub, tail) = if let Some(t) = rest.strip_prefix("ms") {
          (SubSecond::Millis, t)
        } else if let Some(t) = rest.strip_prefix("us") {
          (SubSecond::Micros, t)
        } else if let Some(t) = rest.strip_prefix("ns") {
          (SubSecond::Nanos, t)
        } else {
          return Err(Error::BadTimeFormat(format.to_string()));
        };
        (format[..i].to_string(), Some(sub), tail.to_string())
      }
    };
    let tf = TimeFormatter { prefix, sub, suffix, timezone };
    // Fail fast on specifiers chrono cannot render.
    let mut probe = String::new();
    if tf.try_format(0, &mut probe).is_err() {
      return Err(Error::BadTimeFormat(format.to_string()));
    }
    Ok(tf)
  }

  /// Render `epoch_ns` into `out`.
  pub fn format(&self, epoch_ns: i64, out: &mut String) {
    // Compile-time probe guarantees this cannot fail on valid inputs.
    let _ = self.try_format(epoch_ns, out);
  }

  fn try_format(&self, epoch_ns: i64, out: &mut String) -> std::fmt::Result {
    // Floor toward negative infinity for the nanosecond field.
    let secs = epoch_ns.div_euclid(1_000_000_000);
    let nanos = epoch_ns.rem_euclid(1_000_000_000) as u32;
    match self.timezone {
      Timezone::Gmt => {
        let dt = Utc.timestamp_opt(secs, nanos).single().ok_or(std::fmt::Error)?;
        self.render(&dt, nanos, out)
      }
      Timezone::Local => {
        let dt = Local.timestamp_opt(secs, nanos).single().ok_or(std::fmt::Error)?;
        self.render(&dt, nanos, out)
      }
    }
  }

  fn render<Tz: TimeZone>(&self, dt: &DateTime<Tz>, nanos: u32, out: &mut String) -> std::fmt::Result
  where
    Tz::Offset: std::fmt::Display,
  {
    if !self.prefix.is_empty() {
      write!(out, "{}", dt.format(&self.prefix))?;
    }
    if let Some(sub) = self.sub {
      match sub {
        SubSecond::Millis => write!(out, "{:03}", nanos / 1_000_000)?,
        SubSecond::Micros => write!(out, "{:06}", nanos / 1_000)?,
        SubSecond::Nanos => write!(out, "{:09}", nanos)?,
      }
    }
    if !self.suffix.is_empty() {
      write!(out, "{}", dt.format(&self.suffix))?;
    }
    Ok(())
  }
}

// ---- message templates -------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Align {
  Left,
  Right,
  Center,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SpecKind {
  Display,
  LowerHex,
  UpperHex,
  Binary,
  Octal,
  Fixed,
}

/// Subset of the braced format-spec grammar:
/// `[[fill]align]['#']['0'][width]['.' precision][type]`.
#[derive(Copy, Clone, Debug, PartialEq)]
struct FormatSpec {
  fill: char,
  align: Option<Align>,
  alternate: bool,
  zero: bool,
  width: usize,
  precision: Option<usize>,
  kind: SpecKind,
}

impl Default for FormatSpec {
  fn default() -> Self {
    FormatSpec {
      fill: ' ',
      align: None,
      alternate: false,
      zero: false,
      width: 0,
      precision: None,
      kind: SpecKind::Display,
    }
  }
}

fn parse_spec(s: &str) -> FormatSpec {
  let mut spec = FormatSpec::default();
  let chars: Vec<char> = s.chars().collect();
  let mut i = 0;
  // fill+align comes as either "<c><align>" or "<align>".
  if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
    spec.fill = chars[0];
    spec.align = Some(align_of(chars[1]));
    i = 2;
  } else if !chars.is_empty() && matches!(chars[0], '<' | '>' | '^') {
    spec.align = Some(align_of(chars[0]));
    i = 1;
  }
  if i < chars.len() && chars[i] == '#' {
    spec.alternate = true;
    i += 1;
  }
  if i < chars.len() && chars[i] == '0' {
    spec.zero = true;
    i += 1;
  }
  while i < chars.len() && chars[i].is_ascii_digit() {
    spec.width = spec.width * 10 + chars[i].to_digit(10).unwrap() as usize;
    i += 1;
  }
  if i < chars.len() && chars[i] == '.' {
    i += 1;
    let mut p = 0;
    while i < chars.len() && chars[i].is_ascii_digit() {
      p = p * 10 + chars[i].to_digit(10).unwrap() as usize;
      i += 1;
    }
    spec.precision = Some(p);
  }
  if i < chars.len() {
    spec.kind = match chars[i] {
      'x' => SpecKind::LowerHex,
      'X' => SpecKind::UpperHex,
      'b' => SpecKind::Binary,
      'o' => SpecKind::Octal,
      'f' => SpecKind::Fixed,
      _ => SpecKind::Display,
    };
  }
  spec
}

fn align_of(c: char) -> Align {
  match c {
    '<' => Align::Left,
    '^' => Align::Center,
    _ => Align::Right,
  }
}

impl FormatSpec {
  fn apply(&self, v: &ArgValue, out: &mut String) {
    let base = self.base_text(v);
    let is_numeric = matches!(v, ArgValue::I64(_) | ArgValue::U64(_) | ArgValue::F64(_));
    if base.len() >= self.width {
      out.push_str(&base);
      return;
    }
    let pad = self.width - base.chars().count().min(self.width);
    if self.zero && is_numeric {
      // Zeros go between the sign and the digits.
      if let Some(rest) = base.strip_prefix('-') {
        out.push('-');
        out.extend(std::iter::repeat('0').take(pad));
        out.push_str(rest);
      } else {
        out.extend(std::iter::repeat('0').take(pad));
        out.push_str(&base);
      }
      return;
    }
    let align = self.align.unwrap_or(if is_numeric { Align::Right } else { Align::Left });
    match align {
      Align::Right => {
        out.extend(std::iter::repeat(self.fill).take(pad));
        out.push_str(&base);
      }
      Align::Left => {
        out.push_str(&base);
        out.extend(std::iter::repeat(self.fill).take(pad));
      }
      Align::Center => {
        out.extend(std::iter::repeat(self.fill).take(pad / 2));
        out.push_str(&base);
        out.extend(std::iter::repeat(self.fill).take(pad - pad / 2));
      }
    }
  }

  fn base_text(&self, v: &ArgValue) -> String {
    match (self.kind, v) {
      (SpecKind::LowerHex, ArgValue::I64(n)) => {
        if self.alternate { format!("{n:#x}") } else { format!("{n:x}") }
      }
      (SpecKind::LowerHex, ArgValue::U64(n)) => {
        if self.alternate { format!("{n:#x}") } else { format!("{n:x}") }
      }
      (SpecKind::UpperHex, ArgValue::I64(n)) => {
        if self.alternate { format!("{n:#X}") } else { format!("{n:X}") }
      }
      (SpecKind::UpperHex, ArgValue::U64(n)) => {
        if self.alternate { format!("{n:#X}") } else { format!("{n:X}") }
      }
      (SpecKind::Binary, ArgValue::I64(n)) => {
        if self.alternate { format!("{n:#b}") } else { format!("{n:b}") }
      }
      (SpecKind::Binary, ArgValue::U64(n)) => {
        if self.alternate { format!("{n:#b}") } else { format!("{n:b}") }
      }
      (SpecKind::Octal, ArgValue::I64(n)) => {
        if self.alternate { format!("{n:#o}") } else { format!("{n:o}") }
      }
      (SpecKind::Octal, ArgValue::U64(n)) => {
        if self.alternate { format!("{n:#o}") } else { format!("{n:o}") }
      }
      (_, ArgValue::F64(x)) => match self.precision {
        Some(p) => format!("{x:.p$}"),
        None if self.kind == SpecKind::Fixed => format!("{x:.6}"),
        None => format!("{x}"),
      },
      (_, ArgValue::Str(s)) => match self.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.clone(),
      },
      (_, ArgValue::StaticStr(s)) => match self.precision {
        Some(p) => s.chars().take(p).collect(),
        None => (*s).to_string(),
      },
      _ => v.to_string(),
    }
  }
}

enum Piece {
  Literal(String),
  Arg { name: Option<String>, index: Option<usize>, spec: FormatSpec, raw: String },
}

/// A compiled message template. Cached by the backend per call site.
pub struct CompiledTemplate {
  pieces: Vec<Piece>,
}

/// Parse a `{}`-style message template. Tolerant: anything that is not a
/// well-formed placeholder stays literal.
pub fn compile_template(template: &str) -> CompiledTemplate {
  let mut pieces = Vec::new();
  let mut lit = String::new();
  let mut chars = template.char_indices().peekable();
  while let Some((i, c)) = chars.next() {
    match c {
      '{' if matches!(chars.peek(), Some(&(_, '{'))) => {
        chars.next();
        lit.push('{');
      }
      '}' if matches!(chars.peek(), Some(&(_, '}'))) => {
        chars.next();
        lit.push('}');
      }
      '{' => {
        let close = template[i..].find('}').map(|p| i + p);
        let Some(close) = close else {
          lit.push('{');
          continue;
        };
        let body = &template[i + 1..close];
        let (target, spec) = match body.split_once(':') {
          None => (body, FormatSpec::default()),
          Some((t, s)) => (t, parse_spec(s)),
        };
        let (name, index) = if target.is_empty() {
          (None, None)
        } else if target.bytes().all(|b| b.is_ascii_digit()) {
          (None, target.parse::<usize>().ok())
        } else {
          (Some(target.to_string()), None)
        };
        if !lit.is_empty() {
          pieces.push(Piece::Literal(std::mem::take(&mut lit)));
        }
        pieces.push(Piece::Arg { name, index, spec, raw: template[i..=close].to_string() });
        while matches!(chars.peek(), Some(&(j, _)) if j <= close) {
          chars.next();
        }
      }
      _ => lit.push(c),
    }
  }
  if !lit.is_empty() {
    pieces.push(Piece::Literal(lit));
  }
  CompiledTemplate { pieces }
}

/// Substitute decoded arguments into a compiled template. Named
/// placeholders additionally record `(name, formatted value)` pairs in
/// order of appearance.
pub fn format_message(
  tmpl: &CompiledTemplate,
  args: &[ArgValue],
  msg_out: &mut String,
  named_out: &mut Vec<(String, String)>,
) {
  let mut auto = 0usize;
  for piece in &tmpl.pieces {
    match piece {
      Piece::Literal(s) => msg_out.push_str(s),
      Piece::Arg { name, index, spec, raw } => {
        let idx = match index {
          Some(i) => *i,
          None => {
            let i = auto;
            auto += 1;
            i
          }
        };
        match args.get(idx) {
          Some(v) => {
            let start = msg_out.len();
            spec.apply(v, msg_out);
            if let Some(name) = name {
              named_out.push((name.clone(), msg_out[start..].to_string()));
            }
          }
          // Fewer arguments than placeholders: keep the placeholder text.
          None => msg_out.push_str(raw),
        }
      }
    }
  }
}

/// Render named pairs as `a: 1, b: 2`.
pub fn render_named(pairs: &[(String, String)], out: &mut String) {
  for (i, (k, v)) in pairs.iter().enumerate() {
    if i > 0 {
      out.push_str(", ");
    }
    out.push_str(k);
    out.push_str(": ");
    out.push_str(v);
  }
}
