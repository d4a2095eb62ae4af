use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cutover_deploy::EngineConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "cutover",
    about = "Cutover — blue-green and canary deployment engine",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Engine configuration file.
    #[arg(short, long, default_value = "cutover.toml")]
    config: PathBuf,

    /// Environment guard: must match the configuration's environment.
    #[arg(long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an artifact with an atomic blue-green cutover.
    BlueGreen {
        /// Built artifact directory to release.
        #[arg(long)]
        artifact: PathBuf,
        /// Actor recorded in the audit trail.
        #[arg(long, default_value = "engine")]
        actor: String,
    },
    /// Deploy an artifact gradually behind a metrics-gated canary plan.
    Canary {
        /// Built artifact directory to release.
        #[arg(long)]
        artifact: PathBuf,
        /// Canary plan document (TOML).
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, default_value = "engine")]
        actor: String,
    },
    /// Roll the environment back to the previous release.
    Rollback {
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Show current bindings and the recent audit trail.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
        /// Number of audit records to include.
        #[arg(long, default_value = "15")]
        tail: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cutover=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;

    if let Some(env) = &cli.env {
        if env != &config.environment {
            anyhow::bail!(
                "--env {env} does not match configured environment {}",
                config.environment
            );
        }
    }

    let code = match cli.command {
        Commands::BlueGreen { artifact, actor } => {
            commands::deploy::blue_green(&config, &artifact, &actor).await?
        }
        Commands::Canary {
            artifact,
            plan,
            actor,
        } => commands::deploy::canary(&config, &artifact, &plan, &actor).await?,
        Commands::Rollback { actor } => commands::rollback::run(&config, &actor).await?,
        Commands::Status { json, tail } => commands::status::run(&config, json, tail)?,
    };
    std::process::exit(code)
}
