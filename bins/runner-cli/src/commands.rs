// CLI commands for the runner
use anyhow::{bail, Context, Result};
use runner_common::config::RunnerConfig;
use runner_common::types::{ExecutionRequest, ExecutionResult};
use runner_engine::docker::DockerRuntime;
use runner_engine::{Engine, EngineSettings, LanguageRegistry};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Load configuration and the language table the same way the API does
fn load_config() -> Result<(RunnerConfig, LanguageRegistry)> {
    let config = RunnerConfig::from_env().context("Invalid runner configuration")?;
    let registry = LanguageRegistry::from_config(config.languages_file.as_deref())
        .context("Failed to load language table")?;
    Ok((config, registry))
}

fn docker_engine(config: &RunnerConfig, registry: LanguageRegistry) -> Result<Engine> {
    let docker = DockerRuntime::connect().context("Failed to create Docker client")?;
    Ok(Engine::new(
        Arc::new(registry),
        Arc::new(docker),
        EngineSettings::from(config),
    ))
}

/// Run `code` through `engine`; a rejected request is an error
pub async fn execute_source(engine: &Engine, language: &str, code: String) -> Result<ExecutionResult> {
    let request = ExecutionRequest::new(language, code);
    match engine.execute(&request).await {
        Ok(result) => Ok(result),
        Err(rejection) => bail!("{}", rejection),
    }
}

/// Process exit status for a finished execution
pub fn exit_status(result: &ExecutionResult) -> i32 {
    if result.is_success() {
        0
    } else {
        1
    }
}

/// Execute a file and print its output. Returns the process exit status.
pub async fn run_file(language: &str, file: &Path, json: bool) -> Result<i32> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let (config, registry) = load_config()?;
    let engine = docker_engine(&config, registry)?;

    info!(
        language = language,
        file = %file.display(),
        source_size = code.len(),
        deadline_ms = config.deadline.as_millis() as u64,
        "Executing file"
    );
    let result = execute_source(&engine, language, code).await?;
    info!(
        outcome = %result.outcome_kind,
        exit_code = ?result.exit_code,
        execution_ms = result.execution_time_ms,
        truncated = result.truncated,
        "Execution finished"
    );

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to encode result")?
        );
    } else {
        let mut stdout = io::stdout();
        stdout.write_all(result.output.as_bytes())?;
        stdout.flush()?;
        let mut stderr = io::stderr();
        stderr.write_all(result.error.as_bytes())?;
        stderr.flush()?;
    }

    Ok(exit_status(&result))
}

/// Render the profile table
pub fn render_languages(registry: &LanguageRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<12} {:<10} {:<24} {:<10}\n",
        "LANGUAGE", "EXT", "IMAGE", "RECIPE"
    ));
    out.push_str(&format!("{}\n", "─".repeat(60)));
    for profile in registry.profiles() {
        out.push_str(&format!(
            "{:<12} {:<10} {:<24} {:<10}\n",
            profile.id,
            profile.file_extension,
            profile.image,
            if profile.is_compiled() { "compiled" } else { "interpreted" }
        ));
    }
    out
}

pub fn list_languages() -> Result<()> {
    let (_config, registry) = load_config()?;

    println!("📋 Supported Languages:\n");
    print!("{}", render_languages(&registry));
    println!("\n✅ Total: {} language(s)", registry.profiles().count());
    Ok(())
}

/// Preflight the Docker daemon and pull every image in the table
pub async fn check_runtime() -> Result<()> {
    let (config, registry) = load_config()?;

    println!("🐳 Checking Docker daemon...");
    let docker = DockerRuntime::connect().context("Failed to create Docker client")?;
    let support = docker.preflight().await?;
    info!(server_version = %support.server_version, pids_limit = support.pids_limit, "Docker preflight passed");
    println!("  ✅ Docker {} reachable", support.server_version);
    println!("  ✅ Memory and CPU limits enforceable");
    if !support.pids_limit {
        println!("  ⚠️  pids limit unsupported, launches will be refused");
    }

    println!("\n📦 Preparing images...");
    let engine = Engine::new(
        Arc::new(registry),
        Arc::new(docker),
        EngineSettings::from(&config),
    );
    let failures = engine.warm_up().await;

    for profile in engine.registry().profiles() {
        match failures.iter().find(|(id, _)| id == &profile.id) {
            Some((_, reason)) => println!("  ❌ {} ({}): {}", profile.id, profile.image, reason),
            None => println!("  ✅ {} ({})", profile.id, profile.image),
        }
    }

    if !failures.is_empty() {
        warn!(failed = failures.len(), "Some language images are not ready");
        bail!("{} image(s) could not be prepared", failures.len());
    }

    println!("\n✅ Runtime ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner_common::config::ResourceLimits;
    use runner_common::types::OutcomeKind;
    use runner_engine::testing::{Script, ScriptedRuntime};
    use std::time::Duration;

    fn scripted_engine(script: Script, scratch: &Path) -> Engine {
        Engine::new(
            Arc::new(LanguageRegistry::builtin()),
            Arc::new(ScriptedRuntime::new(script)),
            EngineSettings {
                deadline: Duration::from_millis(200),
                limits: ResourceLimits::default(),
                scratch_dir: scratch.to_path_buf(),
                max_source_bytes: 1024,
                max_output_bytes: 1024,
            },
        )
    }

    #[tokio::test]
    async fn test_successful_run_exits_zero() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = scripted_engine(
            Script::Exit {
                stdout: "2\n".into(),
                stderr: String::new(),
                code: 0,
            },
            scratch.path(),
        );

        let result = execute_source(&engine, "python", "print(1+1)".into())
            .await
            .unwrap();
        assert_eq!(result.output, "2\n");
        assert_eq!(exit_status(&result), 0);
    }

    #[tokio::test]
    async fn test_failed_run_exits_one() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = scripted_engine(
            Script::Exit {
                stdout: String::new(),
                stderr: "boom\n".into(),
                code: 1,
            },
            scratch.path(),
        );

        let result = execute_source(&engine, "cpp", "int main(){return 1;}".into())
            .await
            .unwrap();
        assert_eq!(result.outcome_kind, OutcomeKind::RuntimeFailure);
        assert_eq!(exit_status(&result), 1);
    }

    #[tokio::test]
    async fn test_unknown_language_is_an_error() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = scripted_engine(
            Script::Exit {
                stdout: String::new(),
                stderr: String::new(),
                code: 0,
            },
            scratch.path(),
        );

        let err = execute_source(&engine, "ruby", "puts 1".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Language not supported: ruby");
    }

    #[test]
    fn test_language_table_lists_builtins() {
        let table = render_languages(&LanguageRegistry::builtin());
        assert!(table.contains("python:3.9-alpine"));
        assert!(table.contains("gcc:11.3.0"));
        assert!(table.lines().any(|l| l.starts_with("cpp") && l.contains("compiled")));
    }
}
