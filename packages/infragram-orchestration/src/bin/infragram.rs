//! Infragram CLI
//!
//! # Usage
//!
//! ```bash
//! # Full pipeline (one run, or one run per Helm values file)
//! infragram run --project shop
//!
//! # Only what `layout` needs, without enhancement
//! infragram run --project shop --step layout --enhance never
//!
//! # Inspect runs
//! infragram runs --project shop
//! infragram show --project shop --run 20260101T120000123Z-1a2b3c4d
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use infragram_orchestration::{
    CredentialProvider, EnhancePolicy, EnvCredentialProvider, LocalSourceLister,
    OrchestratorConfig, PipelineOrchestrator, ProjectRegistry, RunMode,
};
use infragram_storage::{FsRunStore, RunStore, StepName};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "infragram.yaml";

#[derive(Parser)]
#[command(name = "infragram")]
#[command(about = "Infrastructure-as-code to architecture diagram pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./infragram.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project registry (YAML or JSON)
    #[arg(long, global = true, default_value = "projects.yaml")]
    registry: PathBuf,

    /// Run storage root (overrides the configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a project
    Run {
        #[arg(short, long)]
        project: String,

        /// Stop after this step (parse, enhance, layout, generate)
        #[arg(short, long)]
        step: Option<StepName>,

        /// auto | always | never
        #[arg(long)]
        enhance: Option<EnhancePolicy>,

        /// Run variants concurrently
        #[arg(long)]
        parallel_variants: bool,
    },

    /// List a project's runs, most recent first
    Runs {
        #[arg(short, long)]
        project: String,
    },

    /// Print a run manifest
    Show {
        #[arg(short, long)]
        project: String,

        #[arg(short, long)]
        run: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<OrchestratorConfig> {
    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => OrchestratorConfig::from_yaml(DEFAULT_CONFIG)
            .with_context(|| format!("loading {}", DEFAULT_CONFIG))?,
        None => OrchestratorConfig::default(),
    }
    .with_process_env()?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

async fn run(
    cli: &Cli,
    config: OrchestratorConfig,
    project: &str,
    step: Option<StepName>,
) -> anyhow::Result<ExitCode> {
    let registry = ProjectRegistry::from_file(&cli.registry)
        .with_context(|| format!("loading registry {}", cli.registry.display()))?;
    let entry = registry
        .get(project)
        .ok_or_else(|| anyhow!("project '{}' not found in {}", project, cli.registry.display()))?;

    let store = Arc::new(FsRunStore::new(&config.data_dir));
    let sources = Arc::new(LocalSourceLister::new(&config.source_root));
    let credential = EnvCredentialProvider.get_credential();
    let orchestrator = PipelineOrchestrator::from_config(&config, store, sources, credential)?;

    let mode = step.map(RunMode::Target).unwrap_or(RunMode::Full);
    let outcome = orchestrator.execute(entry, mode).await;

    for report in &outcome.reports {
        match &report.outcome {
            Ok(run) => {
                println!("{:<12} {:<10} {}", report.label, run.status, run.id);
                for result in &run.steps {
                    println!(
                        "  {:<9} {:<10} {:>6}ms {}",
                        result.step,
                        result.status,
                        result.duration.unwrap_or(0),
                        result
                            .error
                            .as_deref()
                            .or(result.output_file.as_deref())
                            .unwrap_or("")
                    );
                }
                for skipped in &run.skipped {
                    println!("  {:<9} skipped    {}", skipped.step, skipped.reason);
                }
            }
            Err(e) => println!("{:<12} error      {}", report.label, e),
        }
    }

    Ok(if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match &cli.command {
        Commands::Run {
            project,
            step,
            enhance,
            parallel_variants,
        } => {
            if let Some(policy) = enhance {
                config.enhance = *policy;
            }
            if *parallel_variants {
                config.parallel_variants = true;
            }
            run(&cli, config, project, *step).await
        }
        Commands::Runs { project } => {
            let store = FsRunStore::new(&config.data_dir);
            let runs = store.list_runs(project).await?;
            if runs.is_empty() {
                println!("No runs for {}", project);
            }
            for summary in runs {
                println!(
                    "{}  {:<10} {}  steps={}{}",
                    summary.id,
                    summary.status,
                    summary.started_at.to_rfc3339(),
                    summary.step_count,
                    summary
                        .variant
                        .map(|v| format!("  values={}", v))
                        .unwrap_or_default()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { project, run } => {
            let store = FsRunStore::new(&config.data_dir);
            let manifest = store
                .read_manifest(project, run)
                .await?
                .ok_or_else(|| anyhow!("run {}/{} not found", project, run))?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
