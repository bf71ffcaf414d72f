// Runner configuration, read once at process start from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DEADLINE_MS: u64 = 5_000;
pub const DEFAULT_MEMORY_MB: u32 = 128;
pub const DEFAULT_CPU_LIMIT: f64 = 0.5;
pub const DEFAULT_PIDS_LIMIT: i64 = 64;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1MB per stream

/// Smallest memory ceiling Docker accepts
pub const MIN_MEMORY_MB: u32 = 6;
/// Smallest CPU share Docker accepts; anything that rounds to 0 nano-CPUs means unlimited
pub const MIN_CPU_LIMIT: f64 = 0.01;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Resource ceilings requested from the container runtime for every sandbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpu_limit: f64,
    pub pids_limit: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: DEFAULT_MEMORY_MB,
            cpu_limit: DEFAULT_CPU_LIMIT,
            pids_limit: DEFAULT_PIDS_LIMIT,
        }
    }
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb as i64) * 1024 * 1024
    }

    /// CPU share expressed in the runtime's nano-CPU unit
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0).round() as i64
    }
}

/// A memory ceiling the runtime will actually enforce
pub fn memory_limit_enforceable(memory_mb: u32) -> bool {
    memory_mb >= MIN_MEMORY_MB
}

/// A CPU ceiling the runtime will actually enforce
pub fn cpu_limit_enforceable(cpu_limit: f64) -> bool {
    cpu_limit.is_finite() && cpu_limit >= MIN_CPU_LIMIT
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub bind_addr: SocketAddr,
    /// Fixed wall-clock budget for every execution; callers cannot override it
    pub deadline: Duration,
    pub limits: ResourceLimits,
    pub scratch_dir: PathBuf,
    /// Replacement language table; the built-in table is used when unset
    pub languages_file: Option<PathBuf>,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080))),
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
            limits: ResourceLimits::default(),
            scratch_dir: std::env::temp_dir(),
            languages_file: None,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Missing keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = parse_or(&lookup, "RUNNER_BIND_ADDR", defaults.bind_addr)?;

        let deadline_ms: u64 = parse_or(&lookup, "RUNNER_DEADLINE_MS", DEFAULT_DEADLINE_MS)?;
        if deadline_ms == 0 {
            return Err(invalid("RUNNER_DEADLINE_MS", "0", "deadline must be positive"));
        }

        let memory_mb: u32 = parse_or(&lookup, "RUNNER_MEMORY_MB", DEFAULT_MEMORY_MB)?;
        if !memory_limit_enforceable(memory_mb) {
            return Err(invalid(
                "RUNNER_MEMORY_MB",
                &memory_mb.to_string(),
                "must be at least 6",
            ));
        }

        let cpu_limit: f64 = parse_or(&lookup, "RUNNER_CPU_LIMIT", DEFAULT_CPU_LIMIT)?;
        if !cpu_limit_enforceable(cpu_limit) {
            return Err(invalid(
                "RUNNER_CPU_LIMIT",
                &cpu_limit.to_string(),
                "must be at least 0.01 CPUs",
            ));
        }

        let pids_limit: i64 = parse_or(&lookup, "RUNNER_PIDS_LIMIT", DEFAULT_PIDS_LIMIT)?;
        if pids_limit <= 0 {
            return Err(invalid(
                "RUNNER_PIDS_LIMIT",
                &pids_limit.to_string(),
                "must be positive",
            ));
        }

        let scratch_dir = lookup("RUNNER_SCRATCH_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.scratch_dir);

        let languages_file = lookup("RUNNER_LANGUAGES_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let max_source_bytes =
            parse_or(&lookup, "RUNNER_MAX_SOURCE_BYTES", DEFAULT_MAX_SOURCE_BYTES)?;
        let max_output_bytes =
            parse_or(&lookup, "RUNNER_MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)?;

        Ok(Self {
            bind_addr,
            deadline: Duration::from_millis(deadline_ms),
            limits: ResourceLimits {
                memory_mb,
                cpu_limit,
                pids_limit,
            },
            scratch_dir,
            languages_file,
            max_source_bytes,
            max_output_bytes,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        _ => Ok(default),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
