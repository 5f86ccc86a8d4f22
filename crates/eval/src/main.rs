//! CLI entry point for the evaluation engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eval::{EvalConfig, evaluate, list_scenarios, render_summary};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "skillbench")]
#[command(about = "Score AI code-review results against scenario ground truth")]
#[command(version)]
struct Cli {
  /// Enable verbose logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Evaluate a tree of result artifacts and write a report
  Evaluate {
    /// Root of the result artifact tree (skill/scenario/trial-N)
    results_dir: PathBuf,

    /// Root of the scenario tree carrying ground truth
    #[arg(short, long, default_value = "./scenarios")]
    scenarios: PathBuf,

    /// Oracle model used for semantic matching
    #[arg(short, long, default_value = "haiku")]
    model: String,

    /// Report output path
    #[arg(short, long, default_value = "./eval-report.json")]
    output: PathBuf,

    /// Maximum oracle calls in flight
    #[arg(short, long, default_value = "4")]
    concurrency: usize,

    /// Per-oracle-call timeout in seconds
    #[arg(long, default_value = "60")]
    oracle_timeout: u64,

    /// Oracle attempts per unit before marking it incomplete
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Wall-clock budget for the whole run, in seconds
    #[arg(long)]
    timeout: Option<u64>,
  },

  /// List scenarios with valid ground truth
  List {
    /// Root of the scenario tree
    #[arg(short, long, default_value = "./scenarios")]
    scenarios: PathBuf,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  // Setup logging
  let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
  let subscriber = FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .finish();
  tracing::subscriber::set_global_default(subscriber)?;

  match cli.command {
    Commands::Evaluate {
      results_dir,
      scenarios,
      model,
      output,
      concurrency,
      oracle_timeout,
      max_attempts,
      timeout,
    } => {
      let provider = oracle::create_provider()?;
      info!(provider = provider.name(), "Using oracle provider");

      let config = EvalConfig {
        results_dir,
        scenarios_dir: scenarios,
        model,
        concurrency,
        oracle_timeout_secs: oracle_timeout,
        max_attempts,
        global_timeout_secs: timeout,
      };

      let report = evaluate(&config, provider).await?;
      report.save(&output)?;

      println!("{}", render_summary(&report));
      println!("Full report written to {}", output.display());
      Ok(())
    }
    Commands::List { scenarios } => {
      for truth in list_scenarios(&scenarios)? {
        println!("{} ({} expected issues)", truth.scenario, truth.issues.len());
        for issue in &truth.issues {
          println!("  [{}] {}: {}", issue.severity, issue.id, issue.description);
        }
      }
      Ok(())
    }
  }
}
