//! Veil CLI - look inside a run without running it
//!
//! Usage:
//!   veil build <script>     - Print the document a run would load
//!   veil permissions        - Print the effective sandbox capability list
//!   veil decode <payload>   - Interpret an outcome message the way the host would

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veil_sandbox::{build, compute_permissions, parse_outcome, RunOutcome, SandboxConfiguration};

#[derive(Parser)]
#[command(name = "veil")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Inspect isolated script runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated container document for a script
    Build {
        /// Script file, or `-` for stdin
        script: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the effective capability list
    Permissions {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Check an outcome message (JSON) against the wire format
    Decode {
        /// The message payload, or `-` for stdin
        payload: String,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON configuration file (exports, dependencies, permissions)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dependency script URL, loaded before the main script (repeatable)
    #[arg(long = "dep")]
    dependencies: Vec<String>,

    /// Extra capability flag (repeatable)
    #[arg(long = "permission")]
    permissions: Vec<String>,
}

impl ConfigArgs {
    fn resolve(self) -> anyhow::Result<SandboxConfiguration> {
        let mut config = match &self.config {
            Some(path) => SandboxConfiguration::load(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?,
            None => SandboxConfiguration::default(),
        };

        config.dependencies.extend(self.dependencies);
        for flag in self.permissions {
            config.permissions.grant(flag);
        }
        Ok(config)
    }
}

fn read_stdin() -> anyhow::Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read stdin")?;
    Ok(text)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { script, config } => {
            let config = config.resolve()?;
            let source = if script.as_os_str() == "-" {
                read_stdin()?
            } else {
                std::fs::read_to_string(&script)
                    .with_context(|| format!("Failed to read script {}", script.display()))?
            };
            if !config.exports.is_empty() {
                tracing::info!(exports = config.exports.len(), "exports are injected at load time, not embedded");
            }
            print!("{}", build(&source, &config.dependencies));
        }

        Commands::Permissions { config } => {
            let config = config.resolve()?;
            println!("{}", compute_permissions(&config.permissions).join(" "));
        }

        Commands::Decode { payload } => {
            let text = if payload == "-" { read_stdin()? } else { payload };
            let data: serde_json::Value = serde_json::from_str(&text).context("Payload is not JSON")?;
            match parse_outcome(&data) {
                Ok(RunOutcome::Success(Some(value))) => println!("success: {}", value),
                Ok(RunOutcome::Success(None)) => println!("success: (no value)"),
                Ok(RunOutcome::Failure(error)) => println!("failure: {}", error),
                Err(error) => anyhow::bail!("Protocol error: {}", error),
            }
        }
    }

    Ok(())
}
