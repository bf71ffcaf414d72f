/// Docker-backed sandbox runtime
///
/// **Docker Execution Rules:**
/// 1. Image must exist locally before the deadline starts (pulled on cache miss)
/// 2. Container is created with the invocation's limits:
///    - Network disabled
///    - Memory ceiling with no extra swap
///    - CPU share and pids ceiling
///    - All capabilities dropped, no-new-privileges
///    - The workspace file bound read-only at the profile's source path
/// 3. Warnings that a limit was discarded abort the launch
/// 4. stdout/stderr are captured from the log stream as separate channels
/// 5. Killing the container kills its whole PID namespace (compiler and binary alike)
/// 6. Containers are removed explicitly, with a drop guard as backstop

use crate::classifier::OutputCapture;
use crate::error::LaunchError;
use crate::launcher::{RunningSandbox, SandboxInvocation, SandboxRuntime};
use anyhow::{bail, Context};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // Cannot be async in Drop; hand removal to the runtime if there still is one
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.container_id, "No runtime left to remove abandoned container");
            return;
        };

        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container = %container_id, error = %e, "Failed to clean up abandoned container");
            }
        });
    }
}

/// What the daemon reports it can enforce
#[derive(Debug, Clone)]
pub struct RuntimeSupport {
    pub server_version: String,
    pub memory_limit: bool,
    pub cpu_limit: bool,
    pub pids_limit: bool,
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, LaunchError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| LaunchError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Verify the daemon is reachable and can enforce the limits we ask for
    pub async fn preflight(&self) -> anyhow::Result<RuntimeSupport> {
        self.docker
            .ping()
            .await
            .context("Docker daemon is not reachable")?;

        let info = self
            .docker
            .info()
            .await
            .context("Failed to query Docker daemon info")?;

        let support = RuntimeSupport {
            server_version: info.server_version.unwrap_or_else(|| "unknown".to_string()),
            memory_limit: info.memory_limit.unwrap_or(false),
            cpu_limit: info.cpu_cfs_quota.unwrap_or(false),
            pids_limit: info.pids_limit.unwrap_or(false),
        };

        if !support.memory_limit {
            bail!("Docker daemon cannot enforce memory limits (memory cgroup missing)");
        }
        if !support.cpu_limit {
            bail!("Docker daemon cannot enforce CPU limits (CFS quota unsupported)");
        }
        if !support.pids_limit {
            warn!("Docker daemon cannot enforce pids limits; launches requesting them will be refused");
        }

        Ok(support)
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    /// **Image Cache Health Check:**
    /// - Verifies image exists locally before execution
    /// - Pulls synchronously if missing
    async fn prepare(&self, image: &str) -> Result<(), LaunchError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = image, "Image cache hit");
            return Ok(());
        }

        warn!(image = image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| LaunchError::Image {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        info!(image = image, "Image pulled");
        Ok(())
    }

    async fn launch(
        &self,
        invocation: &SandboxInvocation,
    ) -> Result<Box<dyn RunningSandbox>, LaunchError> {
        let create_options = CreateContainerOptions {
            name: invocation.name.as_str(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(create_options), container_config(invocation))
            .await
            .map_err(|e| daemon_error(e, LaunchError::Create))?;

        // Guard first, so every failure below still removes the container
        let mut sandbox = DockerSandbox {
            docker: self.docker.clone(),
            guard: ContainerGuard::new(self.docker.clone(), created.id.clone()),
            id: created.id,
        };

        if let Some(refusal) = refused_limits(&created.warnings) {
            let _ = sandbox.dispose().await;
            return Err(LaunchError::LimitsRefused(refusal));
        }
        for warning in &created.warnings {
            warn!(container = %invocation.name, warning = %warning, "Docker warning on create");
        }

        if let Err(e) = self
            .docker
            .start_container(&sandbox.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = sandbox.dispose().await;
            return Err(daemon_error(e, LaunchError::Start));
        }

        Ok(Box::new(sandbox))
    }

    async fn remove(&self, name: &str) -> Result<(), LaunchError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(())
            | Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(LaunchError::Wait(format!("remove failed: {}", e))),
        }
    }
}

struct DockerSandbox {
    docker: Docker,
    id: String,
    guard: ContainerGuard,
}

#[async_trait]
impl RunningSandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&mut self, capture: &mut OutputCapture) -> Result<i64, LaunchError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        // The stream ends when the container stops
        let mut logs = self.docker.logs(&self.id, Some(options));
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => capture.push_stdout(&message),
                Ok(LogOutput::StdErr { message }) => capture.push_stderr(&message),
                Ok(_) => {}
                Err(e) => return Err(LaunchError::Wait(format!("log stream failed: {}", e))),
            }
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(&self.id, Some(options));
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(LaunchError::Wait(e.to_string())),
            None => Err(LaunchError::Wait("no exit status reported".to_string())),
        }
    }

    async fn terminate(&mut self) -> Result<(), LaunchError> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.docker.kill_container(&self.id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already gone or already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(LaunchError::Wait(format!("kill failed: {}", e))),
        }
    }

    async fn dispose(&mut self) -> Result<(), LaunchError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(&self.id, Some(options)).await {
            Ok(())
            | Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                self.guard.disarm();
                Ok(())
            }
            Err(e) => Err(LaunchError::Wait(format!("remove failed: {}", e))),
        }
    }
}

fn container_config(invocation: &SandboxInvocation) -> Config<String> {
    Config {
        image: Some(invocation.image.clone()),
        cmd: Some(invocation.command.clone()),
        working_dir: Some(invocation.working_dir.clone()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        network_disabled: Some(invocation.network_disabled),
        host_config: Some(HostConfig {
            memory: Some(invocation.memory_bytes),
            // Equal to memory: no swap on top of the ceiling
            memory_swap: Some(invocation.memory_bytes),
            nano_cpus: Some(invocation.nano_cpus),
            pids_limit: Some(invocation.pids_limit),
            network_mode: invocation
                .network_disabled
                .then(|| "none".to_string()),
            binds: Some(vec![invocation.bind.to_bind()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(false), // compiled recipes write their binary
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Docker accepts a container but warns when it silently drops a limit
fn refused_limits(warnings: &[String]) -> Option<String> {
    warnings
        .iter()
        .find(|w| w.to_lowercase().contains("discarded"))
        .cloned()
}

/// Server-side refusals keep their message; anything else means we could not talk to the daemon
fn daemon_error(e: DockerError, wrap: fn(String) -> LaunchError) -> LaunchError {
    match e {
        DockerError::DockerResponseServerError { message, .. } => wrap(message),
        other => LaunchError::RuntimeUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::BindMount;
    use std::path::PathBuf;

    fn invocation() -> SandboxInvocation {
        SandboxInvocation {
            name: "runner-test".to_string(),
            image: "gcc:11.3.0".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "g++ /app/main.cpp -o /app/runner && /app/runner".to_string(),
            ],
            working_dir: "/app".to_string(),
            bind: BindMount {
                host_path: PathBuf::from("/tmp/usercode-abc.cpp"),
                sandbox_path: "/app/main.cpp".to_string(),
                read_only: true,
            },
            memory_bytes: 128 * 1024 * 1024,
            nano_cpus: 500_000_000,
            pids_limit: 64,
            network_disabled: true,
        }
    }

    #[test]
    fn test_container_config_carries_limits() {
        let config = container_config(&invocation());
        let host = config.host_config.unwrap();

        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/usercode-abc.cpp:/app/main.cpp:ro".to_string()])
        );
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(config.tty, Some(false));
    }

    #[test]
    fn test_refused_limits_detection() {
        let warnings = vec![
            "Your kernel does not support swap limit capabilities or the cgroup is not mounted. Memory limited without swap.".to_string(),
        ];
        assert!(refused_limits(&warnings).is_none());

        let warnings = vec![
            "Your kernel does not support memory limit capabilities or the cgroup is not mounted. Limitation discarded.".to_string(),
        ];
        assert!(refused_limits(&warnings).is_some());

        let warnings = vec![
            "Your kernel does not support PIDs limit capabilities or the cgroup is not mounted. PIDs limit discarded.".to_string(),
        ];
        assert!(refused_limits(&warnings).is_some());
    }

    #[test]
    fn test_daemon_error_mapping() {
        let refused = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: gcc:11.3.0".to_string(),
        };
        assert!(matches!(
            daemon_error(refused, LaunchError::Create),
            LaunchError::Create(msg) if msg.contains("No such image")
        ));
    }
}
