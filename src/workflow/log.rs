/// Destination for run progress lines.
///
/// The workflow, run loop and scheduler only talk to this trait; the control
/// panel and headless runs plug in their own sink.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: String);

    fn info(&self, message: String) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: String) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: String) {
        self.log(LogLevel::Error, message);
    }

    fn success(&self, message: String) {
        self.log(LogLevel::Success, message);
    }

    fn debug(&self, message: String) {
        self.log(LogLevel::Debug, message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
    Debug,
}

impl LogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Success => "Success",
            LogLevel::Debug => "Debug",
        }
    }
}

/// Mirror a line into the process log.
pub fn trace_line(level: LogLevel, message: &str) {
    match level {
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
    }
}

/// Sink that only writes to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: String) {
        trace_line(level, &message);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Collects lines so tests can assert on what a run reported.
    #[derive(Default)]
    pub struct MemorySink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl MemorySink {
        pub fn lines(&self) -> Vec<(LogLevel, String)> {
            self.lines.lock().unwrap().clone()
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.lines().iter().any(|(_, line)| line.contains(needle))
        }
    }

    impl LogSink for MemorySink {
        fn log(&self, level: LogLevel, message: String) {
            self.lines.lock().unwrap().push((level, message));
        }
    }
}
