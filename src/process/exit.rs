use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// Signal number used for forceful kills
const SIGKILL: i32 = 9;

/// How a process generation ended, as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with a status code
    Code(i32),
    /// Terminated by SIGKILL, or a wrapper reporting 128 + SIGKILL
    Killed,
    /// Terminated by some other signal
    Signaled(i32),
    /// Neither a code nor a signal was reported
    Unknown,
}

impl ExitKind {
    pub fn from_status(status: &ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::from_code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return if signal == SIGKILL {
                    ExitKind::Killed
                } else {
                    ExitKind::Signaled(signal)
                };
            }
        }

        ExitKind::Unknown
    }

    pub fn from_code(code: i32) -> Self {
        if code == 128 + SIGKILL {
            ExitKind::Killed
        } else {
            ExitKind::Code(code)
        }
    }

    pub fn is_killed(&self) -> bool {
        matches!(self, ExitKind::Killed)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "{}", code),
            ExitKind::Killed => write!(f, "{}", 128 + SIGKILL),
            ExitKind::Signaled(signal) => write!(f, "{}", 128 + signal),
            ExitKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// What the looper does with an exited generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitVerdict {
    /// Died before the fast-fail threshold
    TooFast,
    /// Killed by SIGKILL; restart
    Killed,
    /// Any other exit; restart
    Unexpected,
}

/// Classify an exit by how long the generation lived and how it ended
pub fn classify(kind: ExitKind, uptime: Duration, fast_fail: Duration) -> ExitVerdict {
    if uptime < fast_fail {
        ExitVerdict::TooFast
    } else if kind.is_killed() {
        ExitVerdict::Killed
    } else {
        ExitVerdict::Unexpected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert_eq!(ExitKind::from_code(0), ExitKind::Code(0));
        assert_eq!(ExitKind::from_code(1), ExitKind::Code(1));
        assert_eq!(ExitKind::from_code(137), ExitKind::Killed);
    }

    #[cfg(unix)]
    #[test]
    fn test_from_status_signal() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait status: low 7 bits carry the terminating signal
        assert_eq!(
            ExitKind::from_status(&ExitStatus::from_raw(9)),
            ExitKind::Killed
        );
        assert_eq!(
            ExitKind::from_status(&ExitStatus::from_raw(15)),
            ExitKind::Signaled(15)
        );
        // Exit code lives in the second byte
        assert_eq!(
            ExitKind::from_status(&ExitStatus::from_raw(3 << 8)),
            ExitKind::Code(3)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitKind::Code(2).to_string(), "2");
        assert_eq!(ExitKind::Killed.to_string(), "137");
        assert_eq!(ExitKind::Signaled(15).to_string(), "143");
    }

    #[test]
    fn test_classify_fast_fail_wins_over_exit_kind() {
        let threshold = Duration::from_secs(1);
        assert_eq!(
            classify(ExitKind::Code(0), Duration::from_millis(10), threshold),
            ExitVerdict::TooFast
        );
        assert_eq!(
            classify(ExitKind::Killed, Duration::from_millis(999), threshold),
            ExitVerdict::TooFast
        );
    }

    #[test]
    fn test_classify_after_threshold() {
        let threshold = Duration::from_secs(1);
        assert_eq!(
            classify(ExitKind::Killed, Duration::from_secs(5), threshold),
            ExitVerdict::Killed
        );
        assert_eq!(
            classify(ExitKind::Code(0), Duration::from_secs(5), threshold),
            ExitVerdict::Unexpected
        );
        assert_eq!(
            classify(ExitKind::Code(1), threshold, threshold),
            ExitVerdict::Unexpected
        );
    }
}
