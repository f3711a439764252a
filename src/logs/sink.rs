use std::fmt;

/// Severity attached to every line a core writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Short label used in log files
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Debug => "D",
            Severity::Info => "I",
            Severity::Warning => "W",
            Severity::Error => "E",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Destination for the output of supervised processes
///
/// Called from the drain tasks of every guard at once, so implementations
/// must be safe to share across threads.
pub trait LogSink: Send + Sync {
    fn write(&self, severity: Severity, tag: &str, message: &str);
}

/// Forwards core output to `tracing` under the `core` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, severity: Severity, tag: &str, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!(target: "core", "[{}] {}", tag, message),
            Severity::Info => tracing::info!(target: "core", "[{}] {}", tag, message),
            Severity::Warning => tracing::warn!(target: "core", "[{}] {}", tag, message),
            Severity::Error => tracing::error!(target: "core", "[{}] {}", tag, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::Info.label(), "I");
        assert_eq!(Severity::Warning.to_string(), "warning");
    }

    #[test]
    fn test_tracing_sink_is_object_safe() {
        let sink: Box<dyn LogSink> = Box::new(TracingSink);
        sink.write(Severity::Info, "core", "hello");
    }
}
