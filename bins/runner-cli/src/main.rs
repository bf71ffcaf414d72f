mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "runner-cli")]
#[command(about = "Runner CLI - Execute source files in sandboxes and inspect the runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file in a sandbox
    Run {
        /// Language id (e.g., python, cpp)
        #[arg(short, long)]
        language: String,

        /// Source file to execute
        file: PathBuf,

        /// Print the full result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List supported languages
    Languages,

    /// Verify the container runtime and pull every language image
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so program output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            file,
            json,
        } => {
            let code = commands::run_file(&language, &file, json).await?;
            std::process::exit(code);
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
        Commands::Check => {
            commands::check_runtime().await?;
        }
    }

    Ok(())
}
