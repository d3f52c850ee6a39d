use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Once;

/// Number of entries retained by the in-process log buffer
const LOG_BUFFER_CAPACITY: usize = 1000;

/// Log level enum for type-safe logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Log entry with optional structured context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Component that produced the entry ("pipeline", "artifact", ...)
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,
}

/// Fixed-size ring of log entries
struct CircularBuffer {
    buffer: Vec<LogEntry>,
    head: usize,
    capacity: usize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    fn push(&mut self, item: LogEntry) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(item);
        } else {
            self.buffer[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn to_vec(&self) -> Vec<LogEntry> {
        // Chronological order: oldest entry sits at `head` once the ring wrapped
        let mut result = Vec::with_capacity(self.buffer.len());
        result.extend_from_slice(&self.buffer[self.head..]);
        result.extend_from_slice(&self.buffer[..self.head]);
        result
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }
}

/// Commands for the logger thread
enum LogCommand {
    Log(LogEntry),
    GetLogs(Sender<Vec<LogEntry>>),
    Clear,
}

/// Non-blocking application logger
///
/// Entries are forwarded to `tracing` immediately and retained in a bounded
/// in-process buffer so that callers (tests, embedding applications) can read
/// back what a pipeline run reported.
pub struct Logger {
    sender: Sender<LogCommand>,
    min_level: AtomicU8,
}

impl Logger {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(LOG_BUFFER_CAPACITY);

        std::thread::Builder::new()
            .name("stageline-logger".to_string())
            .spawn(move || Self::logger_thread(receiver))
            .ok();

        Self {
            sender,
            min_level: AtomicU8::new(LogLevel::Debug as u8),
        }
    }

    /// Background thread that owns the log buffer
    fn logger_thread(receiver: Receiver<LogCommand>) {
        let mut buffer = CircularBuffer::new(LOG_BUFFER_CAPACITY);

        for cmd in receiver {
            match cmd {
                LogCommand::Log(entry) => buffer.push(entry),
                LogCommand::GetLogs(response_tx) => {
                    let _ = response_tx.send(buffer.to_vec());
                }
                LogCommand::Clear => buffer.clear(),
            }
        }
    }

    /// Log a message (non-blocking)
    pub fn log(&self, level: LogLevel, message: &str, source: &str) {
        self.record(level, message, source, None);
    }

    /// Log a message with structured context
    pub fn log_with_context(
        &self,
        level: LogLevel,
        message: &str,
        source: &str,
        context: HashMap<String, serde_json::Value>,
    ) {
        self.record(level, message, source, Some(context));
    }

    fn record(
        &self,
        level: LogLevel,
        message: &str,
        source: &str,
        context: Option<HashMap<String, serde_json::Value>>,
    ) {
        if (level as u8) < self.min_level.load(Ordering::Relaxed) {
            return;
        }

        match level {
            LogLevel::Error => tracing::error!(target: "stageline", source, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "stageline", source, "{}", message),
            LogLevel::Info => tracing::info!(target: "stageline", source, "{}", message),
            LogLevel::Debug => tracing::debug!(target: "stageline", source, "{}", message),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            source: source.to_string(),
            context,
        };

        // Drops the entry if the channel is full
        let _ = self.sender.try_send(LogCommand::Log(entry));
    }

    /// Set minimum log level (runtime filtering)
    pub fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    pub fn get_logs(&self) -> Vec<LogEntry> {
        let (response_tx, response_rx) = bounded(1);
        if self.sender.send(LogCommand::GetLogs(response_tx)).is_ok() {
            response_rx.recv().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    pub fn clear_logs(&self) {
        let _ = self.sender.send(LogCommand::Clear);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// Global logger instance
pub static LOGGER: Lazy<Logger> = Lazy::new(Logger::new);

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` fmt subscriber
///
/// `RUST_LOG` takes precedence over `level`. Safe to call more than once; only
/// the first call installs a subscriber.
pub fn init_tracing(level: LogLevel) {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
    LOGGER.set_min_level(level);
}

// Macro for crate-internal logging
#[macro_export]
macro_rules! app_log {
    ($level:expr, $source:expr, $($arg:tt)*) => {
        {
            let message = format!($($arg)*);
            $crate::logger::LOGGER.log($level, &message, $source);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
            source: "test".to_string(),
            context: None,
        }
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_circular_buffer_wraps_in_order() {
        let mut buffer = CircularBuffer::new(3);
        for i in 0..5 {
            buffer.push(entry(&format!("m{}", i)));
        }

        let messages: Vec<String> = buffer.to_vec().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);

        buffer.clear();
        assert!(buffer.to_vec().is_empty());
    }

    #[test]
    fn test_logger_round_trip() {
        let logger = Logger::new();
        logger.log(LogLevel::Info, "hello", "test");
        logger.log(LogLevel::Debug, "details", "test");

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "hello");

        logger.clear_logs();
        assert!(logger.get_logs().is_empty());
    }

    #[test]
    fn test_min_level_filters() {
        let logger = Logger::new();
        logger.set_min_level(LogLevel::Warn);
        assert_eq!(logger.get_min_level(), LogLevel::Warn);

        logger.log(LogLevel::Info, "dropped", "test");
        logger.log(LogLevel::Error, "kept", "test");

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
    }
}
