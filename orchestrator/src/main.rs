//! One-shot CLI over the orchestrator library.
//!
//! Each invocation is a fresh process, so the in-memory registry starts
//! empty: `status` right after `launch` from a separate invocation reports
//! `processing` until the result record lands. The long-lived HTTP server
//! is the surface that tracks live processes across calls.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use orchestrator::analysis::backend::backend_from_config;
use orchestrator::analysis::pipeline::AnalysisPipeline;
use orchestrator::cancel::{CancelOutcome, CancellationCoordinator};
use orchestrator::config::{BackendChoice, OrchestratorConfig, load_config};
use orchestrator::launch::RunLauncher;
use orchestrator::registry::SessionRegistry;
use orchestrator::remote::{HttpRemoteClient, RemoteJobService};
use orchestrator::scaffold::scaffold;
use orchestrator::session::{SessionKey, SessionStatus};
use orchestrator::status::reconcile;
use orchestrator::store::LogStore;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Debug-session orchestrator for remote GPU competition runs"
)]
struct Cli {
    /// Workspace root holding code/ and logs/.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (TOML). Defaults to `<root>/orchestrator.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a step's code file from the starter template.
    Scaffold {
        competition_id: String,
        datarow_id: String,
        step: u32,
    },
    /// Spawn the submission process for a step.
    Launch {
        competition_id: String,
        datarow_id: String,
        step: u32,
        /// Code file to run; defaults to the step's stored code file.
        #[arg(long)]
        code_file: Option<PathBuf>,
    },
    /// Report the derived status of a step.
    Status { datarow_id: String, step: u32 },
    /// Print a step's raw submission log.
    Logs { datarow_id: String, step: u32 },
    /// Stop a step's run locally and remotely.
    Cancel { datarow_id: String, step: u32 },
    /// Close a step whose bug never reproduced.
    MarkNoRepro { datarow_id: String, step: u32 },
    /// Run AI analysis over a completed step.
    Analyze {
        competition_id: String,
        datarow_id: String,
        step: u32,
        /// Operator's bug hypothesis, fed into the reviewer prompt.
        #[arg(long, default_value = "")]
        hypothesis: String,
        /// Backend override: "gemini" or "lm_studio".
        #[arg(long)]
        backend: Option<String>,
    },
}

fn main() {
    orchestrator::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join("orchestrator.toml"));
    let mut config = load_config(&config_path)?;
    config.apply_env();

    let store = LogStore::new(&cli.root);
    let registry = SessionRegistry::new();

    match cli.command {
        Command::Scaffold {
            competition_id,
            datarow_id,
            step,
        } => {
            let key = SessionKey::new(datarow_id, step);
            let path = scaffold(&store, &competition_id, &key)?;
            println!("{}", path.display());
        }
        Command::Launch {
            competition_id,
            datarow_id,
            step,
            code_file,
        } => {
            let key = SessionKey::new(datarow_id, step);
            let code = match code_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read code file {}", path.display()))?,
                None => store
                    .read_code(&competition_id, &key)?
                    .ok_or_else(|| anyhow!("no code file for {key}; run scaffold first"))?,
            };
            let launcher = RunLauncher::new(&store, &registry, &config.submit);
            launcher.launch(&competition_id, &key, &code)?;
            // The process outlives this invocation; drop the handle so it
            // keeps running after we exit.
            let _ = registry.remove(&key);
            println!("started {key}");
        }
        Command::Status { datarow_id, step } => {
            let key = SessionKey::new(datarow_id, step);
            match reconcile(&registry, &store, &key) {
                SessionStatus::Completed(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                status => println!("{}", status.as_str()),
            }
        }
        Command::Logs { datarow_id, step } => {
            let key = SessionKey::new(datarow_id, step);
            match store.read_raw_log(&key)? {
                Some(contents) => print!("{contents}"),
                None => println!("no raw log for {key}"),
            }
        }
        Command::Cancel { datarow_id, step } => {
            let key = SessionKey::new(datarow_id, step);
            let remote = HttpRemoteClient::from_config(&config.remote);
            let outcome = coordinator(&store, &registry, remote.as_ref(), &config).cancel(&key)?;
            report_outcome(&outcome);
            if !outcome.is_confirmed() {
                std::process::exit(2);
            }
        }
        Command::MarkNoRepro { datarow_id, step } => {
            let key = SessionKey::new(datarow_id, step);
            let remote = HttpRemoteClient::from_config(&config.remote);
            let pipeline = AnalysisPipeline::new(&store, &config.ai);
            let outcome = pipeline.mark_no_reproduction(
                &coordinator(&store, &registry, remote.as_ref(), &config),
                &key,
            )?;
            report_outcome(&outcome);
            println!("marked {key} as not reproducible");
        }
        Command::Analyze {
            competition_id,
            datarow_id,
            step,
            hypothesis,
            backend,
        } => {
            let key = SessionKey::new(datarow_id, step);
            let choice = match backend {
                Some(name) => BackendChoice::parse(&name)
                    .ok_or_else(|| anyhow!("unknown backend {name:?}"))?,
                None => config.ai.backend,
            };
            let backend = backend_from_config(&config.ai, choice)?;
            let code = store
                .read_code(&competition_id, &key)?
                .ok_or_else(|| anyhow!("no code file for {key}"))?;
            let pipeline = AnalysisPipeline::new(&store, &config.ai);
            let stored =
                pipeline.analyze(backend.as_ref(), &competition_id, &key, &code, &hypothesis)?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
    }
    Ok(())
}

fn coordinator<'a>(
    store: &'a LogStore,
    registry: &'a SessionRegistry,
    remote: Option<&'a HttpRemoteClient>,
    config: &OrchestratorConfig,
) -> CancellationCoordinator<'a> {
    CancellationCoordinator::new(
        store,
        registry,
        remote.map(|r| r as &dyn RemoteJobService),
        Duration::from_secs(config.submit.terminate_grace_secs),
        Duration::from_secs(config.remote.confirm_delay_secs),
    )
}

fn report_outcome(outcome: &CancelOutcome) {
    match outcome {
        CancelOutcome::Confirmed { detail, caveat } => {
            println!("cancelled: {detail}");
            if let Some(caveat) = caveat {
                println!("note: {caveat}");
            }
        }
        CancelOutcome::Warning { reason } => {
            println!("warning: {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
