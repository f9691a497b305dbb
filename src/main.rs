use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pgx_kg::config::Config;
use pgx_kg::events::{EventLevel, stage};
use pgx_kg::pipeline::Pipeline;

/// Build per-patient pharmacogenomics knowledge graphs.
#[derive(Debug, Parser)]
#[command(name = "pgxkg", version, about)]
struct Cli {
    /// Single gene to analyse (e.g. CYP2D6).
    #[arg(long, conflicts_with = "genes")]
    gene: Option<String>,

    /// Multiple genes for a comprehensive analysis.
    #[arg(long, num_args = 1.., conflicts_with = "gene")]
    genes: Vec<String>,

    /// UniProt accession override (single-gene runs only).
    #[arg(long)]
    protein: Option<String>,

    /// KEY=VALUE configuration file; the environment takes precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Patient profile JSON to link variants against.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Output directory root (default: output/).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }

    let profile = match cli.profile.as_deref() {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let raw: serde_json::Value = serde_json::from_str(&text)?;
            Some(pgx_kg::assemble::normalize_dashboard_profile(&raw))
        }
        None => None,
    };

    let genes: Vec<String> = if let Some(gene) = cli.gene.clone() {
        vec![gene]
    } else {
        cli.genes.clone()
    };
    if genes.is_empty() {
        anyhow::bail!("provide --gene <symbol> or --genes <s1> <s2> ...");
    }

    let pipeline = Pipeline::new(config).await?;

    // Relay pipeline events to stderr; the stream always ends with
    // report/complete or error/pipeline.
    let mut receiver = pipeline.events().subscribe();
    let relay = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let marker = match event.level {
                        EventLevel::Info => "·",
                        EventLevel::Warn => "!",
                        EventLevel::Error => "✗",
                    };
                    eprintln!("{marker} [{}/{}] {}", event.stage, event.substage, event.message);
                    if event.stage == stage::REPORT && event.substage == stage::COMPLETE {
                        break;
                    }
                    if event.stage == stage::ERROR && event.substage == stage::PIPELINE {
                        // Keep draining; the run result decides the exit
                        // code.
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Ctrl-C cancels at the next suspension point.
    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = if genes.len() == 1 {
        pipeline
            .run(&genes[0], cli.protein.as_deref(), profile.as_ref())
            .await
    } else {
        pipeline.run_multi(&genes, profile.as_ref()).await
    };
    relay.abort();

    info!(
        patient = %outcome.patient_id,
        variants = outcome.total_variants,
        drugs = outcome.affected_drugs,
        duration_secs = outcome.duration_secs,
        "Run finished"
    );
    for (kind, path) in &outcome.outputs {
        eprintln!("  {kind}: {path}");
    }

    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!(
            "pipeline failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
