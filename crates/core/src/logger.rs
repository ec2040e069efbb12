use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::LoggingConfig;

/// 消息日志级别，数值即掩码位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Error = 1,
    Info = 2,
    Debug = 4,
}

impl LogLevel {
    pub const ALL_MASK: u8 = 7;

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志输出端
pub trait LogSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn write(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}

/// 默认输出端：转发到 tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!(target: "taskq", "{}", message),
            LogLevel::Info => info!(target: "taskq", "{}", message),
            LogLevel::Debug => debug!(target: "taskq", "{}", message),
        }
    }
}

/// 三级消息日志器
///
/// 每条消息先经过级别掩码过滤，再交给调用方提供的输出端。
#[derive(Clone)]
pub struct MessageLogger {
    mask: u8,
    echo: bool,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for MessageLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLogger")
            .field("mask", &self.mask)
            .field("echo", &self.echo)
            .finish()
    }
}

impl Default for MessageLogger {
    fn default() -> Self {
        Self::new(LogLevel::ALL_MASK)
    }
}

impl MessageLogger {
    pub fn new(mask: u8) -> Self {
        Self {
            mask: mask & LogLevel::ALL_MASK,
            echo: false,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(config.level_mask).with_echo(config.debug)
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.mask & level.bit() != 0
    }

    pub fn error(&self, message: impl Into<String>) -> Option<String> {
        self.emit(LogLevel::Error, message.into())
    }

    pub fn info(&self, message: impl Into<String>) -> Option<String> {
        self.emit(LogLevel::Info, message.into())
    }

    pub fn debug(&self, message: impl Into<String>) -> Option<String> {
        self.emit(LogLevel::Debug, message.into())
    }

    fn emit(&self, level: LogLevel, message: String) -> Option<String> {
        if !self.is_enabled(level) {
            return None;
        }
        if self.echo {
            println!("[{level}] {message}");
        }
        self.sink.write(level, &message);
        Some(message)
    }
}
