/// Integration tests against a real Docker daemon
///
/// These tests verify the full pipeline end to end:
/// 1. Interpreted code runs and its stdout comes back
/// 2. Infinite loops are cut off at the deadline with no container left behind
/// 3. Compiled code that exits non-zero is a runtime failure
/// 4. Compile errors surface compiler diagnostics without running anything
/// 5. Workspace files never outlive the request

#[cfg(test)]
mod docker_tests {
    use crate::docker::DockerRuntime;
    use crate::engine::{Engine, EngineSettings};
    use crate::registry::LanguageRegistry;
    use bollard::container::ListContainersOptions;
    use bollard::Docker;
    use runner_common::config::ResourceLimits;
    use runner_common::types::{ExecutionRequest, OutcomeKind};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn create_engine(deadline: Duration, scratch: &std::path::Path) -> Engine {
        let runtime = DockerRuntime::connect().expect("Failed to connect to Docker");
        Engine::new(
            Arc::new(LanguageRegistry::builtin()),
            Arc::new(runtime),
            EngineSettings {
                deadline,
                limits: ResourceLimits::default(),
                scratch_dir: scratch.to_path_buf(),
                max_source_bytes: 1024 * 1024,
                max_output_bytes: 1024 * 1024,
            },
        )
    }

    async fn runner_containers() -> usize {
        let docker = Docker::connect_with_local_defaults().expect("Failed to connect to Docker");
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec!["runner-".to_string()]);
        docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .expect("Failed to list containers")
            .len()
    }

    /// Test: print(1+1) returns "2\n" with an empty error
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_python_prints_result() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(10), scratch.path());

        let result = engine
            .execute(&ExecutionRequest::new("python", "print(1+1)"))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::Success);
        assert_eq!(result.output, "2\n");
        assert_eq!(result.error, "");
    }

    /// Test: an infinite loop is stopped at a 2 second deadline
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_python_infinite_loop_times_out() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(2), scratch.path());
        // Pull outside the measured window
        engine.warm_up().await;

        let start = Instant::now();
        let result = engine
            .execute(&ExecutionRequest::new("python", "while True: pass"))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::Timeout);
        assert!(start.elapsed() < Duration::from_secs(6), "took {:?}", start.elapsed());
        assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());

        // Give the daemon a moment to finish the forced removal
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runner_containers().await, 0, "timed-out container survived");
    }

    /// Test: partial output written before the kill is kept
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_timeout_keeps_partial_output() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(2), scratch.path());
        engine.warm_up().await;

        let result = engine
            .execute(&ExecutionRequest::new(
                "python",
                "print('started')\nwhile True: pass",
            ))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::Timeout);
        assert_eq!(result.output, "started\n");
    }

    /// Test: compiled program returning 1 is a runtime failure with no output
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_cpp_exit_code_one() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(10), scratch.path());
        engine.warm_up().await;

        let result = engine
            .execute(&ExecutionRequest::new("cpp", "int main(){return 1;}"))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
        assert_eq!(result.output, "");
        assert_eq!(result.exit_code, Some(1));
    }

    /// Test: compile errors carry compiler diagnostics
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_cpp_compile_error() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(10), scratch.path());
        engine.warm_up().await;

        let result = engine
            .execute(&ExecutionRequest::new("cpp", "this is not valid C++"))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
        assert!(result.error.contains("error"), "stderr: {}", result.error);
        assert!(result.output.is_empty());
    }

    /// Test: stdout and stderr are never interleaved
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_streams_stay_separate() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(10), scratch.path());

        let code = "import sys\nprint('out')\nprint('err', file=sys.stderr)\nsys.exit(3)";
        let result = engine
            .execute(&ExecutionRequest::new("python", code))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
        assert_eq!(result.output, "out\n");
        assert_eq!(result.error, "err\n");
        assert_eq!(result.exit_code, Some(3));
    }

    /// Test: sandboxes have no network
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_network_is_disabled() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = create_engine(Duration::from_secs(10), scratch.path());

        let code = "import socket\nsocket.create_connection(('1.1.1.1', 53), timeout=2)";
        let result = engine
            .execute(&ExecutionRequest::new("python", code))
            .await
            .unwrap();

        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
    }
}
