use serde::{Deserialize, Serialize};
use std::fmt;

/// A single piece of code to run, exactly as the caller submitted it.
///
/// `code` is untrusted. The host never interprets it; it is only written to a
/// workspace file and handed to the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

/// How an execution attempt concluded. Exactly one applies per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    /// The program (or its compiler) exited non-zero within the deadline
    RuntimeFailure,
    Timeout,
    /// The sandbox could not be provisioned; user code never ran to completion
    InfrastructureFailure,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::RuntimeFailure => "runtime_failure",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::InfrastructureFailure => "infrastructure_failure",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of one execution, produced exactly once per request.
///
/// `output` and `error` are never merged: `output` is what the program wrote to
/// stdout, `error` is stderr (plus the timeout notice or launch failure detail).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub error: String,
    pub outcome_kind: OutcomeKind,
    /// Exit status of the sandboxed process, when it exited on its own
    pub exit_code: Option<i64>,
    pub execution_time_ms: u64,
    /// Set when either stream hit the output ceiling and was cut short
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    /// Result for a request that never reached a running sandbox.
    pub fn infrastructure_failure(detail: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: detail.into(),
            outcome_kind: OutcomeKind::InfrastructureFailure,
            exit_code: None,
            execution_time_ms: 0,
            truncated: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome_kind == OutcomeKind::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&OutcomeKind::RuntimeFailure).unwrap(),
            "\"runtime_failure\""
        );
        assert_eq!(
            serde_json::to_string(&OutcomeKind::InfrastructureFailure).unwrap(),
            "\"infrastructure_failure\""
        );
        for kind in [
            OutcomeKind::Success,
            OutcomeKind::RuntimeFailure,
            OutcomeKind::Timeout,
            OutcomeKind::InfrastructureFailure,
        ] {
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind)
            );
        }
    }

    #[test]
    fn test_request_decodes_from_wire_shape() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"language":"python","code":"print(1+1)"}"#).unwrap();
        assert_eq!(req.language, "python");
        assert_eq!(req.code, "print(1+1)");
    }

    #[test]
    fn test_result_serializes_error_even_when_empty() {
        let result = ExecutionResult {
            output: "2\n".to_string(),
            error: String::new(),
            outcome_kind: OutcomeKind::Success,
            exit_code: Some(0),
            execution_time_ms: 12,
            truncated: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["output"], "2\n");
        assert_eq!(json["error"], "");
        assert_eq!(json["outcome_kind"], "success");
    }

    #[test]
    fn test_infrastructure_failure_constructor() {
        let result = ExecutionResult::infrastructure_failure("docker unreachable");
        assert_eq!(result.outcome_kind, OutcomeKind::InfrastructureFailure);
        assert_eq!(result.error, "docker unreachable");
        assert!(result.output.is_empty());
        assert!(!result.is_success());
    }
}
