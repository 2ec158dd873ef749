use std::{fmt, sync::Arc};

use crate::types::error::ResultCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Warning,
    Error,
    Info,
}

/// Receives every diagnostic emitted while opening and walking a file.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, code: ResultCode, message: &str);
}

/// Default sink; forwards to `tracing` with the result code as a field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, code: ResultCode, message: &str) {
        let code = code.description();
        match level {
            LogLevel::Debug => tracing::debug!(code, "{message}"),
            LogLevel::Info => tracing::info!(code, "{message}"),
            LogLevel::Warning => tracing::warn!(code, "{message}"),
            LogLevel::Error => tracing::error!(code, "{message}"),
        }
    }
}

/// Handle to the session's log sink. Cloning shares the sink.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn log(&self, level: LogLevel, code: ResultCode, args: fmt::Arguments<'_>) -> ResultCode {
        self.sink.log(level, code, &args.to_string());
        code
    }

    pub fn debug(&self, code: ResultCode, args: fmt::Arguments<'_>) -> ResultCode {
        self.log(LogLevel::Debug, code, args)
    }

    pub fn info(&self, code: ResultCode, args: fmt::Arguments<'_>) -> ResultCode {
        self.log(LogLevel::Info, code, args)
    }

    pub fn warn(&self, code: ResultCode, args: fmt::Arguments<'_>) -> ResultCode {
        self.log(LogLevel::Warning, code, args)
    }

    pub fn error(&self, code: ResultCode, args: fmt::Arguments<'_>) -> ResultCode {
        self.log(LogLevel::Error, code, args)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
