/// Output Classifier
///
/// Captures stdout and stderr into independent byte buffers for the whole life of
/// the sandbox and turns them, together with how the sandbox ended, into an
/// `ExecutionResult`.
///
/// **Classification, in priority order:**
/// 1. Deadline expired → Timeout (partial output kept, timeout notice appended to error)
/// 2. Sandbox never started → InfrastructureFailure
/// 3. Non-zero exit → RuntimeFailure (stdout and stderr exactly as written)
/// 4. Otherwise → Success with an empty error

use runner_common::config::DEFAULT_MAX_OUTPUT_BYTES;
use runner_common::types::{ExecutionResult, OutcomeKind};
use std::time::Duration;
use tracing::warn;

/// Bounded, per-stream output buffers
#[derive(Debug, Clone)]
pub struct OutputCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl OutputCapture {
    /// `limit` applies to each stream separately
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push_stdout(&mut self, bytes: &[u8]) {
        Self::append(&mut self.stdout, bytes, self.limit, &mut self.truncated);
    }

    pub fn push_stderr(&mut self, bytes: &[u8]) {
        Self::append(&mut self.stderr, bytes, self.limit, &mut self.truncated);
    }

    fn append(buf: &mut Vec<u8>, bytes: &[u8], limit: usize, truncated: &mut bool) {
        let room = limit.saturating_sub(buf.len());
        if bytes.len() > room {
            *truncated = true;
        }
        buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// How the sandboxed process ended, as observed by the launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Exited(i64),
    DeadlineExpired,
    LaunchFailed(String),
}

pub fn timeout_message(budget: Duration) -> String {
    format!("Execution timed out (limit: {}ms)", budget.as_millis())
}

pub fn classify(
    capture: OutputCapture,
    termination: Termination,
    budget: Duration,
    elapsed: Duration,
) -> ExecutionResult {
    let truncated = capture.truncated;
    // Decode once at the end so multi-byte characters split across chunks survive
    let output = String::from_utf8_lossy(&capture.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&capture.stderr).into_owned();

    let (outcome_kind, error, exit_code) = match termination {
        Termination::DeadlineExpired => {
            let mut error = stderr;
            if !error.is_empty() && !error.ends_with('\n') {
                error.push('\n');
            }
            error.push_str(&timeout_message(budget));
            (OutcomeKind::Timeout, error, None)
        }
        Termination::LaunchFailed(detail) => (OutcomeKind::InfrastructureFailure, detail, None),
        Termination::Exited(code) if code != 0 => {
            match code {
                137 => warn!(exit_code = code, "Sandbox killed: likely OOM or exceeded memory limit"),
                139 => warn!(exit_code = code, "Sandbox process hit a segmentation fault"),
                _ => {}
            }
            (OutcomeKind::RuntimeFailure, stderr, Some(code))
        }
        Termination::Exited(code) => (OutcomeKind::Success, String::new(), Some(code)),
    };

    ExecutionResult {
        output,
        error,
        outcome_kind,
        exit_code,
        execution_time_ms: elapsed.as_millis() as u64,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_secs(2);
    const ELAPSED: Duration = Duration::from_millis(42);

    fn capture(stdout: &str, stderr: &str) -> OutputCapture {
        let mut c = OutputCapture::default();
        c.push_stdout(stdout.as_bytes());
        c.push_stderr(stderr.as_bytes());
        c
    }

    #[test]
    fn test_success_has_empty_error() {
        let result = classify(capture("2\n", ""), Termination::Exited(0), BUDGET, ELAPSED);

        assert_eq!(result.outcome_kind, OutcomeKind::Success);
        assert_eq!(result.output, "2\n");
        assert_eq!(result.error, "");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.execution_time_ms, 42);
    }

    #[test]
    fn test_success_discards_warnings_on_stderr() {
        let result = classify(
            capture("ok\n", "DeprecationWarning: something\n"),
            Termination::Exited(0),
            BUDGET,
            ELAPSED,
        );
        assert_eq!(result.outcome_kind, OutcomeKind::Success);
        assert!(result.error.is_empty());
    }

    #[test]
    fn test_non_zero_exit_keeps_streams_separate() {
        let result = classify(
            capture("partial line\n", "Traceback: boom\n"),
            Termination::Exited(1),
            BUDGET,
            ELAPSED,
        );

        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
        assert_eq!(result.output, "partial line\n");
        assert_eq!(result.error, "Traceback: boom\n");
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_oom_exit_does_not_alter_error_text() {
        let result = classify(capture("", "Killed\n"), Termination::Exited(137), BUDGET, ELAPSED);
        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
        assert_eq!(result.error, "Killed\n");
    }

    #[test]
    fn test_timeout_preserves_partial_output() {
        let result = classify(
            capture("tick\ntick\n", "warn"),
            Termination::DeadlineExpired,
            BUDGET,
            ELAPSED,
        );

        assert_eq!(result.outcome_kind, OutcomeKind::Timeout);
        assert_eq!(result.output, "tick\ntick\n");
        assert_eq!(result.error, "warn\nExecution timed out (limit: 2000ms)");
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn test_timeout_with_empty_stderr() {
        let result = classify(capture("", ""), Termination::DeadlineExpired, BUDGET, ELAPSED);
        assert_eq!(result.error, timeout_message(BUDGET));
        assert!(result.output.is_empty());
    }

    #[test]
    fn test_launch_failure_is_infrastructure() {
        let result = classify(
            OutputCapture::default(),
            Termination::LaunchFailed("Container runtime unavailable: connection refused".into()),
            BUDGET,
            ELAPSED,
        );

        assert_eq!(result.outcome_kind, OutcomeKind::InfrastructureFailure);
        assert!(result.error.contains("connection refused"));
        assert!(result.output.is_empty());
    }

    #[test]
    fn test_capture_enforces_per_stream_limit() {
        let mut c = OutputCapture::new(8);
        c.push_stdout(b"0123");
        c.push_stdout(b"456789");
        c.push_stderr(b"err");

        assert_eq!(c.stdout(), b"01234567");
        assert_eq!(c.stderr(), b"err");
        assert!(c.is_truncated());

        let result = classify(c, Termination::Exited(0), BUDGET, ELAPSED);
        assert!(result.truncated);
        assert_eq!(result.output, "01234567");
    }

    #[test]
    fn test_multibyte_characters_split_across_chunks() {
        let bytes = "héllo".as_bytes();
        let mut c = OutputCapture::default();
        c.push_stdout(&bytes[..2]);
        c.push_stdout(&bytes[2..]);

        let result = classify(c, Termination::Exited(0), BUDGET, ELAPSED);
        assert_eq!(result.output, "héllo");
        assert!(!result.truncated);
    }
}
