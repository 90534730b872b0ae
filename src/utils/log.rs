//! Leveled stderr logging with structured `key=value` fields.
//!
//! ```ignore
//! info!("block added"; id = node_id, height = 4, hash = hash.short());
//! warn!("peer {} dropped", addr);
//! ```
//!
//! Lines look like `2026-01-02T03:04:05.678Z [INFO ] block added id=a height=4 hash=…`.
//! Macros expand to nothing observable under `cfg(test)`.

use std::fmt::{self, Display};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Sets the lowest level that is written.
pub fn set_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

/// Renders a message followed by its fields.
pub fn format_line(message: &str, fields: &[(&str, &dyn Display)]) -> String {
    let mut line = String::from(message);
    for (key, value) in fields {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&value.to_string());
    }
    line
}

#[doc(hidden)]
pub fn log(level: Level, message: &str, fields: &[(&str, &dyn Display)]) {
    if !enabled(level) {
        return;
    }

    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut spec = ColorSpec::new();
    match level {
        Level::Debug => {
            spec.set_dimmed(true);
        }
        Level::Info => {}
        Level::Warn => {
            spec.set_fg(Some(Color::Yellow)).set_bold(true);
        }
        Level::Error => {
            spec.set_fg(Some(Color::Red)).set_bold(true);
        }
    }

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    let _ = stderr.set_color(&spec);
    let _ = writeln!(
        stderr,
        "{} [{:5}] {}",
        timestamp,
        level,
        format_line(message, fields)
    );
    let _ = stderr.reset();
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, $msg:literal; $($key:ident = $value:expr),+ $(,)?) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log(
                $level,
                $msg,
                &[$((stringify!($key), &$value as &dyn ::std::fmt::Display)),+],
            );
        }
    }};
    ($level:expr, $($arg:tt)+) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($level, &format!($($arg)+), &[]);
        }
    }};
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__log!($crate::utils::log::Level::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__log!($crate::utils::log::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__log!($crate::utils::log::Level::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__log!($crate::utils::log::Level::Error, $($arg)+) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_parsing() {
        assert_eq!("INFO".parse::<Level>(), Ok(Level::Info));
        assert_eq!("warning".parse::<Level>(), Ok(Level::Warn));
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn padded_display() {
        assert_eq!(format!("[{:5}]", Level::Info), "[INFO ]");
        assert_eq!(format!("[{:5}]", Level::Error), "[ERROR]");
    }

    #[test]
    fn fields_follow_message() {
        let height = 7u32;
        let line = format_line("block added", &[("height", &height), ("id", &"node-a")]);
        assert_eq!(line, "block added height=7 id=node-a");
    }

    #[test]
    fn macros_accept_both_forms() {
        let height = 3u32;
        crate::info!("plain {}", height);
        crate::warn!("with fields"; height = height, id = "x");
        crate::debug!("trailing comma"; height = height,);
    }
}
