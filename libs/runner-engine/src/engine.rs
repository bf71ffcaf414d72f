/// Execution Engine - the request pipeline
///
/// **Fixed order, strictly sequential per request:**
/// 1. Resolve the language profile (unknown languages are rejected before anything is allocated)
/// 2. Make sure the image is present (outside the deadline)
/// 3. Materialize the source into a private workspace file
/// 4. Launch the sandbox under a fresh deadline
/// 5. Classify the captured output
/// 6. Release the workspace
///
/// The workspace is released on every path: explicitly on the normal path, by
/// `Drop` on early returns and panics.

use crate::classifier::{classify, OutputCapture};
use crate::deadline::with_deadline;
use crate::error::RequestRejected;
use crate::launcher::{run_sandboxed, SandboxInvocation, SandboxRuntime};
use crate::registry::LanguageRegistry;
use crate::workspace::Workspace;
use runner_common::config::{ResourceLimits, RunnerConfig};
use runner_common::types::{ExecutionRequest, ExecutionResult, OutcomeKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub deadline: Duration,
    pub limits: ResourceLimits,
    pub scratch_dir: PathBuf,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
}

impl From<&RunnerConfig> for EngineSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            deadline: config.deadline,
            limits: config.limits,
            scratch_dir: config.scratch_dir.clone(),
            max_source_bytes: config.max_source_bytes,
            max_output_bytes: config.max_output_bytes,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    registry: Arc<LanguageRegistry>,
    runtime: Arc<dyn SandboxRuntime>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        runtime: Arc<dyn SandboxRuntime>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            runtime,
            settings,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Pull every profile's image ahead of the first request.
    /// Returns the languages whose image could not be prepared.
    pub async fn warm_up(&self) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        for profile in self.registry.profiles() {
            match self.runtime.prepare(&profile.image).await {
                Ok(()) => info!(language = %profile.id, image = %profile.image, "Image ready"),
                Err(e) => {
                    warn!(language = %profile.id, image = %profile.image, error = %e, "Image not ready");
                    failures.push((profile.id.clone(), e.to_string()));
                }
            }
        }
        failures
    }

    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, RequestRejected> {
        self.execute_with_id(request, Uuid::new_v4()).await
    }

    /// Run one request end to end.
    ///
    /// `Err` only for rejections. Every other outcome, including infrastructure
    /// failures, is a well-formed `ExecutionResult`.
    #[instrument(
        skip(self, request),
        fields(
            request_id = %request_id,
            language = %request.language,
            source_size = request.code.len()
        )
    )]
    pub async fn execute_with_id(
        &self,
        request: &ExecutionRequest,
        request_id: Uuid,
    ) -> Result<ExecutionResult, RequestRejected> {
        let profile = self.registry.resolve(&request.language).map_err(|e| {
            info!(error = %e, "Request rejected");
            e
        })?;

        if request.code.len() > self.settings.max_source_bytes {
            let rejection = RequestRejected::SourceTooLarge {
                limit: self.settings.max_source_bytes,
            };
            info!(error = %rejection, "Request rejected");
            return Err(rejection);
        }

        if let Err(e) = self.runtime.prepare(&profile.image).await {
            error!(image = %profile.image, error = %e, "Image unavailable");
            return Ok(ExecutionResult::infrastructure_failure(e.to_string()));
        }

        let workspace = match Workspace::acquire(
            &self.settings.scratch_dir,
            &profile.file_extension,
            request.code.as_bytes(),
            request_id,
        ) {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "Workspace unavailable");
                return Ok(ExecutionResult::infrastructure_failure(e.to_string()));
            }
        };

        let invocation = SandboxInvocation::build(profile, &workspace, &self.settings.limits);
        let mut capture = OutputCapture::new(self.settings.max_output_bytes);

        let started = Instant::now();
        let (deadline, cancel) = with_deadline(self.settings.deadline);
        let termination =
            run_sandboxed(self.runtime.as_ref(), &invocation, &deadline, &mut capture).await;
        cancel.cancel();
        let elapsed = started.elapsed();

        let result = classify(capture, termination, self.settings.deadline, elapsed);

        if let Err(e) = workspace.release() {
            warn!(error = %e, "Workspace removal failed");
        }

        match result.outcome_kind {
            OutcomeKind::InfrastructureFailure => error!(
                execution_ms = result.execution_time_ms,
                error = %result.error,
                "Execution failed to run"
            ),
            outcome => info!(
                outcome = %outcome,
                exit_code = ?result.exit_code,
                execution_ms = result.execution_time_ms,
                stdout_bytes = result.output.len(),
                stderr_bytes = result.error.len(),
                truncated = result.truncated,
                "Execution completed"
            ),
        }

        Ok(result)
    }
}
