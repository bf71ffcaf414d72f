/// Sandbox Launcher
///
/// **Responsibility:**
/// Turn a resolved language profile and a workspace into a concrete sandbox
/// invocation, start it through a `SandboxRuntime`, and race it against the
/// request's deadline.
///
/// **Boundary:**
/// - The runtime enforces isolation (memory, CPU, pids, network)
/// - The launcher only requests those bounds and reacts to the runtime's answer
/// - On deadline expiry the whole sandbox is killed, not just its first process

use crate::classifier::{OutputCapture, Termination};
use crate::deadline::DeadlineToken;
use crate::error::LaunchError;
use crate::registry::{LanguageProfile, SANDBOX_APP_DIR};
use crate::workspace::Workspace;
use async_trait::async_trait;
use runner_common::config::ResourceLimits;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const CONTAINER_PREFIX: &str = "runner-";

/// Bind of a single host file into the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub sandbox_path: String,
    pub read_only: bool,
}

impl BindMount {
    /// `host:sandbox[:ro]`, the runtime's bind syntax
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.sandbox_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Everything the runtime needs for one execution attempt. Built per request, never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxInvocation {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub bind: BindMount,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub network_disabled: bool,
}

impl SandboxInvocation {
    pub fn build(profile: &LanguageProfile, workspace: &Workspace, limits: &ResourceLimits) -> Self {
        let limits = ResourceLimits {
            memory_mb: profile.memory_limit_mb.unwrap_or(limits.memory_mb),
            cpu_limit: profile.cpu_limit.unwrap_or(limits.cpu_limit),
            pids_limit: limits.pids_limit,
        };

        Self {
            name: format!("{}{}", CONTAINER_PREFIX, workspace.owner_request_id().simple()),
            image: profile.image.clone(),
            command: profile.command(),
            working_dir: SANDBOX_APP_DIR.to_string(),
            bind: BindMount {
                host_path: workspace.path().to_path_buf(),
                sandbox_path: profile.source_path(),
                // Compiled recipes write their binary next to the source, not over it
                read_only: true,
            },
            memory_bytes: limits.memory_bytes(),
            nano_cpus: limits.nano_cpus(),
            pids_limit: limits.pids_limit,
            network_disabled: true,
        }
    }
}

/// Isolation backend. Production uses Docker; tests use a scripted runtime.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Make sure `image` can be launched. Runs before the deadline is armed.
    async fn prepare(&self, image: &str) -> Result<(), LaunchError>;

    /// Create and start the sandbox. Fails if the runtime cannot honor the limits.
    async fn launch(
        &self,
        invocation: &SandboxInvocation,
    ) -> Result<Box<dyn RunningSandbox>, LaunchError>;

    /// Force-remove a sandbox by name, for launches abandoned before a handle came back.
    /// A sandbox that does not exist is not an error.
    async fn remove(&self, name: &str) -> Result<(), LaunchError>;
}

/// A started sandbox
#[async_trait]
pub trait RunningSandbox: Send {
    fn id(&self) -> &str;

    /// Feed both output streams into `capture` until the sandbox exits, then
    /// return its exit status. Output captured so far stays in `capture` even
    /// if this future is dropped.
    async fn wait(&mut self, capture: &mut OutputCapture) -> Result<i64, LaunchError>;

    /// Kill every process inside the sandbox
    async fn terminate(&mut self) -> Result<(), LaunchError>;

    /// Remove the sandbox and anything it left behind
    async fn dispose(&mut self) -> Result<(), LaunchError>;
}

/// Launch `invocation` and wait for it under `deadline`.
///
/// Returns only after a timed-out or lost sandbox has been killed and every
/// sandbox has been disposed of.
pub async fn run_sandboxed(
    runtime: &dyn SandboxRuntime,
    invocation: &SandboxInvocation,
    deadline: &DeadlineToken,
    capture: &mut OutputCapture,
) -> Termination {
    // Nothing to start when the budget is already spent
    if deadline.is_expired() {
        return Termination::DeadlineExpired;
    }

    let launched = tokio::select! {
        biased;
        launched = runtime.launch(invocation) => launched,
        _ = deadline.expired() => {
            error!(
                container = %invocation.name,
                budget_ms = deadline.budget().as_millis() as u64,
                "Sandbox launch stalled past the deadline"
            );
            // The create may have gone through before the launch was dropped
            if let Err(e) = runtime.remove(&invocation.name).await {
                warn!(container = %invocation.name, error = %e, "Failed to remove stalled sandbox");
            }
            return Termination::LaunchFailed(format!(
                "Sandbox did not start within {}ms",
                deadline.budget().as_millis()
            ));
        }
    };

    let mut sandbox = match launched {
        Ok(sandbox) => sandbox,
        Err(e) => {
            error!(container = %invocation.name, error = %e, "Sandbox launch failed");
            return Termination::LaunchFailed(e.to_string());
        }
    };

    info!(
        container = %invocation.name,
        sandbox_id = sandbox.id(),
        image = %invocation.image,
        "Sandbox started"
    );

    // Natural exit wins a tie with the deadline
    let termination = tokio::select! {
        biased;
        waited = sandbox.wait(capture) => match waited {
            Ok(code) => Termination::Exited(code),
            Err(e) => Termination::LaunchFailed(e.to_string()),
        },
        _ = deadline.expired() => Termination::DeadlineExpired,
    };

    if !matches!(termination, Termination::Exited(_)) {
        warn!(
            container = %invocation.name,
            budget_ms = deadline.budget().as_millis() as u64,
            termination = ?termination,
            "Killing sandbox"
        );
        if let Err(e) = sandbox.terminate().await {
            error!(container = %invocation.name, error = %e, "Failed to kill sandbox");
        }
    }

    if let Err(e) = sandbox.dispose().await {
        warn!(container = %invocation.name, error = %e, "Failed to remove sandbox");
    } else {
        debug!(container = %invocation.name, "Sandbox removed");
    }

    termination
}
