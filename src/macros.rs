//! Statement-level logging macros.
//!
//! Each call site expands to a level gate, one `static` [`Metadata`]
//! (template, source location, level) and an `enqueue` call; all argument
//! formatting happens later on the backend. The `*_v!` variants build the
//! template from stringified argument names, producing
//! `"<message> [a: <a>, b: <b>]"`.
//!
//! [`Metadata`]: crate::Metadata

/// Log at an explicit level: `log!(logger, Level::Info, "x={}", 42)`.
/// The level must be a constant expression.
#[macro_export]
macro_rules! log {
  ($logger:expr, $level:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {{
    let logger: &'static $crate::Logger = $logger;
    if logger.should_log($level) {
      static META: $crate::Metadata =
        $crate::Metadata::new($level, $fmt, file!(), line!(), module_path!(), "");
      logger.enqueue(&META, &($(&$arg,)*));
    }
  }};
}

#[macro_export]
macro_rules! trace_l3 {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::TraceL3, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! trace_l2 {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::TraceL2, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! trace_l1 {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::TraceL1, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! debug {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::Debug, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! info {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::Info, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! warning {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::Warning, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! error {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::Error, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! critical {
  ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
    $crate::log!($logger, $crate::Level::Critical, $fmt $(, $arg)*)
  };
}

// Accumulates raw tokens (not expression fragments) so the final concat!
// still sees literals and builtin stringify! calls.
#[doc(hidden)]
#[macro_export]
macro_rules! __logv_template {
  ($fmt:literal, [$($acc:tt)*], $next:expr $(, $rest:expr)*) => {
    $crate::__logv_template!($fmt, [$($acc)* ", ", stringify!($next), ": {", stringify!($next), "}",] $(, $rest)*)
  };
  ($fmt:literal, [$($acc:tt)*]) => {
    concat!($fmt, " [", $($acc)* "]")
  };
}

/// `logv!(logger, Level::Info, "connected", addr, port)` logs
/// `connected [addr: <addr>, port: <port>]` with `addr`/`port` as named
/// arguments. Takes up to 20 arguments.
#[macro_export]
macro_rules! logv {
  ($logger:expr, $level:expr, $fmt:literal $(,)?) => {
    $crate::log!($logger, $level, $fmt)
  };
  ($logger:expr, $level:expr, $fmt:literal, $first:expr $(, $rest:expr)* $(,)?) => {
    $crate::log!(
      $logger,
      $level,
      $crate::__logv_template!($fmt, [stringify!($first), ": {", stringify!($first), "}",] $(, $rest)*),
      $first $(, $rest)*
    )
  };
}

#[macro_export]
macro_rules! debug_v {
  ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
    $crate::logv!($logger, $crate::Level::Debug, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! info_v {
  ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
    $crate::logv!($logger, $crate::Level::Info, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! warning_v {
  ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
    $crate::logv!($logger, $crate::Level::Warning, $fmt $(, $arg)*)
  };
}

#[macro_export]
macro_rules! error_v {
  ($logger:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
    $crate::logv!($logger, $crate::Level::Error, $fmt $(, $arg)*)
  };
}

#[cfg(test)]
mod tests {
  #[test]
  fn logv_template_expansion() {
    let t = crate::__logv_template!("connected", [stringify!(addr), ": {", stringify!(addr), "}",], port);
    assert_eq!(t, "connected [addr: {addr}, port: {port}]");
  }
}
