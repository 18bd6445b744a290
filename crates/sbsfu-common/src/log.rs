// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Boot-time logging
//!
//! A small, `no_std` ring buffer of log entries. The boot session and the
//! key store each own one and record their progress into it; a debugger or
//! the application can drain it after handoff.
//!
//! # Security
//!
//! - Key material must NEVER be logged, only ids, lengths and addresses
//! - Flow-control integrity failures are never logged

use core::fmt::{self, Write};
use heapless::String;

/// Maximum log message length
pub const MAX_LOG_MESSAGE_LEN: usize = 96;

/// Log buffer size (number of entries)
pub const LOG_BUFFER_SIZE: usize = 16;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors that require immediate attention
    Error = 0,
    /// Warnings about potential issues
    Warn = 1,
    /// Informational messages
    Info = 2,
    /// Debug messages (development only)
    Debug = 3,
    /// Trace messages (very verbose, development only)
    Trace = 4,
}

impl LogLevel {
    /// Get the log level name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Single character prefix used in rendered entries
    #[must_use]
    pub const fn prefix(&self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warn => 'W',
            Self::Info => 'I',
            Self::Debug => 'D',
            Self::Trace => 'T',
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log record
#[derive(Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Caller supplied sequence number or tick count
    pub timestamp: u32,
    /// Component that produced the entry
    pub module: &'static str,
    /// Rendered message, truncated to [`MAX_LOG_MESSAGE_LEN`]
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl LogEntry {
    /// Create a new log entry, truncating the message on a char boundary
    #[must_use]
    pub fn new(level: LogLevel, timestamp: u32, module: &'static str, message: &str) -> Self {
        let mut end = message.len().min(MAX_LOG_MESSAGE_LEN);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        let mut msg = String::new();
        let _ = msg.push_str(&message[..end]);

        Self {
            level,
            timestamp,
            module,
            message: msg,
        }
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:08X}] {} [{}] {}",
            self.timestamp,
            self.level.prefix(),
            self.module,
            self.message
        )
    }
}

/// Circular log buffer
///
/// When full, the oldest entry is overwritten and counted in [`LogBuffer::dropped`].
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_BUFFER_SIZE],
    write_index: usize,
    count: usize,
    dropped: u32,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create a new empty log buffer recording `Info` and above
    #[must_use]
    pub const fn new() -> Self {
        const NONE: Option<LogEntry> = None;
        Self {
            entries: [NONE; LOG_BUFFER_SIZE],
            write_index: 0,
            count: 0,
            dropped: 0,
            min_level: LogLevel::Info,
        }
    }

    /// Set the minimum log level
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Get the minimum log level
    #[must_use]
    pub const fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Check if a log level should be recorded
    #[must_use]
    pub const fn should_log(&self, level: LogLevel) -> bool {
        (level as u8) <= (self.min_level as u8)
    }

    /// Store an entry, overwriting the oldest one when full
    pub fn write(&mut self, entry: LogEntry) {
        if !self.should_log(entry.level) {
            return;
        }

        if self.count == LOG_BUFFER_SIZE {
            self.dropped = self.dropped.saturating_add(1);
        } else {
            self.count += 1;
        }
        self.entries[self.write_index] = Some(entry);
        self.write_index = (self.write_index + 1) % LOG_BUFFER_SIZE;
    }

    /// Log with format arguments
    pub fn log(&mut self, level: LogLevel, timestamp: u32, module: &'static str, args: fmt::Arguments<'_>) {
        if !self.should_log(level) {
            return;
        }

        let mut message = String::<MAX_LOG_MESSAGE_LEN>::new();
        // Overlong messages are cut at capacity
        let _ = message.write_fmt(args);

        self.write(LogEntry {
            level,
            timestamp,
            module,
            message,
        });
    }

    /// Number of stored entries
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if buffer is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of entries overwritten since the last clear
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Most recent entry
    #[must_use]
    pub fn last(&self) -> Option<&LogEntry> {
        if self.count == 0 {
            return None;
        }
        let index = (self.write_index + LOG_BUFFER_SIZE - 1) % LOG_BUFFER_SIZE;
        self.entries[index].as_ref()
    }

    /// Count stored entries at exactly `level`
    #[must_use]
    pub fn count_level(&self, level: LogLevel) -> usize {
        self.iter().filter(|e| e.level == level).count()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.write_index = 0;
        self.count = 0;
        self.dropped = 0;
    }

    /// Iterate over entries (oldest first)
    pub fn iter(&self) -> LogBufferIter<'_> {
        let start = if self.count < LOG_BUFFER_SIZE { 0 } else { self.write_index };
        LogBufferIter {
            buffer: self,
            index: start,
            remaining: self.count,
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over log buffer entries
pub struct LogBufferIter<'a> {
    buffer: &'a LogBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for LogBufferIter<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let entry = self.buffer.entries[self.index].as_ref();
        self.index = (self.index + 1) % LOG_BUFFER_SIZE;
        self.remaining -= 1;
        entry
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $ts, $module, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $ts, $module, format_args!($($arg)*))
    };
}

/// Log an informational message
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $ts, $module, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $ts, $module, format_args!($($arg)*))
    };
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($buffer:expr, $ts:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Trace, $ts, $module, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_and_counts_dropped() {
        let mut log = LogBuffer::new();
        for i in 0..(LOG_BUFFER_SIZE as u32 + 3) {
            log_info!(log, i, "test", "entry {}", i);
        }
        assert_eq!(log.len(), LOG_BUFFER_SIZE);
        assert_eq!(log.dropped(), 3);
        assert_eq!(log.iter().next().map(|e| e.timestamp), Some(3));
        assert_eq!(log.last().map(|e| e.timestamp), Some(LOG_BUFFER_SIZE as u32 + 2));
    }

    #[test]
    fn test_level_filter() {
        let mut log = LogBuffer::new();
        log_debug!(log, 0, "test", "hidden");
        assert!(log.is_empty());
        log.set_min_level(LogLevel::Debug);
        log_debug!(log, 1, "test", "shown");
        assert_eq!(log.count_level(LogLevel::Debug), 1);
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_LOG_MESSAGE_LEN);
        let entry = LogEntry::new(LogLevel::Info, 0, "test", &long);
        assert!(entry.message.len() <= MAX_LOG_MESSAGE_LEN);
        assert!(entry.message.chars().all(|c| c == 'é'));
    }
}
