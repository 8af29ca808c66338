//! Leveled stderr logging with lattice context
//!
//! Kernel-style macros that stamp each line with the calling worker's
//! lattice position. The library stays silent unless a level is enabled.
//!
//! Environment variables, read once on first use:
//!
//! - `LG_LOG_LEVEL` - off|error|warn|info|debug|trace (or 0..5)
//! - `LG_LOG_TIME=1` - prefix lines with nanoseconds since start
//! - `LG_FLUSH=1` - flush stderr after every line
//!
//! Output: `[WARN ] [L2.P5] queue full` (with `[<ns>]` when timing is on;
//! `[--]` when called off a worker thread).

use crate::env::env_get_bool;
use crate::message::monotonic_ns;

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static TIME: AtomicBool = AtomicBool::new(false);
static FLUSH: AtomicBool = AtomicBool::new(false);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Read configuration from the environment. Called lazily on first log;
/// call explicitly for deterministic startup.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    TIME.store(env_get_bool("LG_LOG_TIME", false), Ordering::Relaxed);
    FLUSH.store(env_get_bool("LG_FLUSH", false), Ordering::Relaxed);
    if let Ok(val) = std::env::var("LG_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Warn,
        };
        LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

pub fn set_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LEVEL.load(Ordering::Relaxed)
}

thread_local! {
    static CONTEXT: std::cell::Cell<Option<(u16, u16)>> = const { std::cell::Cell::new(None) };
}

/// Attach `(layer, position)` to this thread's log lines.
pub fn set_log_context(layer: u16, position: u16) {
    CONTEXT.with(|c| c.set(Some((layer, position))));
}

pub fn clear_log_context() {
    CONTEXT.with(|c| c.set(None));
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = write!(out, "{} ", level.prefix());
    if TIME.load(Ordering::Relaxed) {
        let _ = write!(out, "[{}] ", monotonic_ns());
    }
    match CONTEXT.with(|c| c.get()) {
        Some((layer, position)) => {
            let _ = write!(out, "[L{}.P{}] ", layer, position);
        }
        None => {
            let _ = out.write_all(b"[--] ");
        }
    }
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[macro_export]
macro_rules! lg_error {
    ($($arg:tt)*) => {
        $crate::logmsg::_log_impl($crate::logmsg::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lg_warn {
    ($($arg:tt)*) => {
        $crate::logmsg::_log_impl($crate::logmsg::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lg_info {
    ($($arg:tt)*) => {
        $crate::logmsg::_log_impl($crate::logmsg::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lg_debug {
    ($($arg:tt)*) => {
        $crate::logmsg::_log_impl($crate::logmsg::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! lg_trace {
    ($($arg:tt)*) => {
        $crate::logmsg::_log_impl($crate::logmsg::LogLevel::Trace, format_args!($($arg)*))
    };
}
