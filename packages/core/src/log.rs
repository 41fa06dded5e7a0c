//! Log sink for a lock's internal lifecycle lines.

use std::sync::Arc;

/// Where a lock writes its lifecycle lines ("Enqueued Job #1 [a]", ...).
#[derive(Clone, Default)]
pub enum LogSink {
    /// Drop every line.
    #[default]
    Disabled,
    /// Emit lines as `tracing` debug events.
    Tracing,
    /// Hand lines to a closure.
    Custom(Arc<dyn Fn(&str) + Send + Sync>),
}

impl LogSink {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        LogSink::Custom(Arc::new(f))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, LogSink::Disabled)
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSink::Disabled => write!(f, "Disabled"),
            LogSink::Tracing => write!(f, "Tracing"),
            LogSink::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A sink bound to one lock's name.
#[derive(Debug, Clone)]
pub struct Logger {
    name: String,
    sink: LogSink,
}

impl Logger {
    pub fn new(name: impl Into<String>, sink: LogSink) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.sink.is_disabled()
    }

    /// Write one lifecycle line.
    pub fn log(&self, message: impl std::fmt::Display) {
        match &self.sink {
            LogSink::Disabled => {}
            LogSink::Tracing => tracing::debug!(lock = %self.name, "{}", message),
            LogSink::Custom(f) => f(&self.line(&message)),
        }
    }

    /// Write a warning to the sink, and to `tracing` regardless of the sink.
    pub fn warn(&self, message: impl std::fmt::Display) {
        tracing::warn!(lock = %self.name, "{}", message);
        if let LogSink::Custom(f) = &self.sink {
            f(&self.line(&format!("WARNING: {}", message)));
        }
    }

    fn line(&self, message: &dyn std::fmt::Display) -> String {
        if self.name.is_empty() {
            message.to_string()
        } else {
            format!("[{}] {}", self.name, message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let sink = LogSink::custom(move |line| {
            if let Ok(mut lines) = sink_lines.lock() {
                lines.push(line.to_string());
            }
        });
        (sink, lines)
    }

    #[test]
    fn custom_sink_gets_prefixed_lines() {
        let (sink, lines) = capture();
        let logger = Logger::new("orders", sink);
        logger.log("Enqueued Job #1 [a]");
        logger.warn("Job #1 [a] is trying to end, but it has already ended");

        let lines = lines.lock().map(|l| l.clone()).unwrap_or_default();
        assert_eq!(
            lines,
            vec![
                "[orders] Enqueued Job #1 [a]".to_string(),
                "[orders] WARNING: Job #1 [a] is trying to end, but it has already ended".to_string(),
            ]
        );
    }

    #[test]
    fn unnamed_locks_log_bare_lines() {
        let (sink, lines) = capture();
        Logger::new("", sink).log("Executing Job #2 []");
        let lines = lines.lock().map(|l| l.clone()).unwrap_or_default();
        assert_eq!(lines, vec!["Executing Job #2 []".to_string()]);
    }

    #[test]
    fn disabled_sink_is_silent() {
        let logger = Logger::new("x", LogSink::Disabled);
        assert!(!logger.is_enabled());
        logger.log("nothing");
        logger.warn("still goes to tracing");
    }
}
