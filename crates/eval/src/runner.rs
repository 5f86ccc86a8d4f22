//! Unit discovery and concurrent evaluation.
//!
//! Discovery walks `RESULTS_DIR/<skill>/<scenario>/trial-*` in sorted
//! order and ground truth for every discovered scenario is loaded before
//! any oracle call, so configuration problems abort the run while it is
//! still cheap to abort. Evaluation then fans the units out over a
//! semaphore-bounded worker pool; workers stream results to a single
//! aggregator, which keeps the fold free of locks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use oracle::OracleProvider;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, UnitResult};
use crate::ground_truth::{GroundTruth, load_ground_truth};
use crate::matcher::{MatchOutcome, Matcher, MatcherConfig};
use crate::report::Report;
use crate::results::{TrialArtifact, count_duplicates, find_artifact, parse_artifact};
use crate::scoring::score_outcome;
use crate::{EvalError, Result};

/// Evaluation run configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
  /// Root of the result artifact tree
  pub results_dir: PathBuf,
  /// Root of the scenario tree carrying ground truth files
  pub scenarios_dir: PathBuf,
  /// Oracle model used for matching
  pub model: String,
  /// Maximum oracle calls in flight
  pub concurrency: usize,
  /// Per-oracle-call timeout in seconds
  pub oracle_timeout_secs: u64,
  /// Oracle attempts per unit before marking it incomplete
  pub max_attempts: u32,
  /// Optional wall-clock budget for the whole run
  pub global_timeout_secs: Option<u64>,
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self {
      results_dir: PathBuf::from("results"),
      scenarios_dir: PathBuf::from("scenarios"),
      model: "haiku".to_string(),
      concurrency: 4,
      oracle_timeout_secs: 60,
      max_attempts: 3,
      global_timeout_secs: None,
    }
  }
}

/// Identity of one evaluation unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnitId {
  pub skill: String,
  pub scenario: String,
  pub trial: String,
}

impl std::fmt::Display for UnitId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}/{}", self.skill, self.scenario, self.trial)
  }
}

/// One discovered unit and where its artifact lives.
#[derive(Debug, Clone)]
pub struct Unit {
  pub id: UnitId,
  pub trial_dir: PathBuf,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut out: Vec<PathBuf> = std::fs::read_dir(dir)?
    .filter_map(|e| e.ok())
    .map(|e| e.path())
    .filter(|p| p.is_dir())
    .collect();
  out.sort();
  Ok(out)
}

fn dir_name(path: &Path) -> Option<String> {
  path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// Walk the results tree and enumerate units in sorted order.
///
/// Trial directories sort lexicographically, so `trial-10` comes before
/// `trial-2`; the order only has to be stable, not numeric.
pub fn discover_units(results_dir: &Path) -> Result<Vec<Unit>> {
  if !results_dir.is_dir() {
    return Err(EvalError::Config(format!(
      "results directory not found: {}",
      results_dir.display()
    )));
  }

  let mut units = Vec::new();
  for skill_dir in sorted_subdirs(results_dir)? {
    let Some(skill) = dir_name(&skill_dir) else { continue };
    for scenario_dir in sorted_subdirs(&skill_dir)? {
      let Some(scenario) = dir_name(&scenario_dir) else { continue };
      for trial_dir in sorted_subdirs(&scenario_dir)? {
        let Some(trial) = dir_name(&trial_dir) else { continue };
        if !trial.starts_with("trial-") {
          continue;
        }
        units.push(Unit {
          id: UnitId {
            skill: skill.clone(),
            scenario: scenario.clone(),
            trial,
          },
          trial_dir,
        });
      }
    }
  }
  Ok(units)
}

/// Enumerate scenarios carrying ground truth, validating each.
pub fn list_scenarios(scenarios_dir: &Path) -> Result<Vec<GroundTruth>> {
  if !scenarios_dir.is_dir() {
    return Err(EvalError::Config(format!(
      "scenarios directory not found: {}",
      scenarios_dir.display()
    )));
  }

  let mut scenarios = Vec::new();
  for dir in sorted_subdirs(scenarios_dir)? {
    if !dir.join("ground_truth.json").is_file() {
      continue;
    }
    let Some(name) = dir_name(&dir) else { continue };
    scenarios.push(load_ground_truth(scenarios_dir, &name)?);
  }
  Ok(scenarios)
}

async fn evaluate_unit(unit: Unit, truth: &GroundTruth, matcher: &Matcher, token: &CancellationToken) -> UnitResult {
  let artifact = match find_artifact(&unit.trial_dir) {
    Some(path) => match std::fs::read_to_string(&path) {
      Ok(text) => parse_artifact(&text),
      Err(e) => {
        warn!(unit = %unit.id, err = %e, "Failed to read result artifact; treating as zero findings");
        TrialArtifact::default()
      }
    },
    None => {
      warn!(unit = %unit.id, "No result artifact in trial directory; treating as zero findings");
      TrialArtifact::default()
    }
  };
  let duplicate_findings = count_duplicates(&artifact.findings);

  // Cancellation only gates new oracle calls; a call already started is
  // left to finish or fail under its own per-call timeout.
  let outcome = if token.is_cancelled() {
    debug!(unit = %unit.id, "Run cancelled before matching");
    MatchOutcome::incomplete()
  } else {
    matcher.match_unit(&truth.issues, &artifact.findings).await
  };

  UnitResult {
    score: score_outcome(&outcome),
    status: outcome.status,
    duration_secs: artifact.duration_secs,
    duplicate_findings,
    unit: unit.id,
  }
}

/// Run the full evaluation and assemble the report.
///
/// Fails only on configuration problems (bad trees, bad ground truth).
/// Every per-unit failure mode degrades that unit instead, so a finished
/// run always yields a report covering every discovered unit.
pub async fn evaluate(config: &EvalConfig, provider: Box<dyn OracleProvider>) -> Result<Report> {
  let units = discover_units(&config.results_dir)?;
  if units.is_empty() {
    return Err(EvalError::Config(format!(
      "no trial directories found under {}",
      config.results_dir.display()
    )));
  }

  // Load every scenario's ground truth before the first oracle call.
  let mut truths: BTreeMap<String, Arc<GroundTruth>> = BTreeMap::new();
  for unit in &units {
    if !truths.contains_key(&unit.id.scenario) {
      let truth = load_ground_truth(&config.scenarios_dir, &unit.id.scenario)?;
      truths.insert(unit.id.scenario.clone(), Arc::new(truth));
    }
  }

  info!(
    units = units.len(),
    scenarios = truths.len(),
    concurrency = config.concurrency,
    model = %config.model,
    "Starting evaluation"
  );

  let matcher = Arc::new(Matcher::new(
    provider,
    MatcherConfig {
      model: config.model.clone(),
      timeout_secs: config.oracle_timeout_secs,
      max_attempts: config.max_attempts,
      ..Default::default()
    },
  ));

  let token = CancellationToken::new();
  {
    let token = token.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received; remaining units will be marked incomplete");
        token.cancel();
      }
    });
  }
  if let Some(secs) = config.global_timeout_secs {
    let token = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(secs)).await;
      warn!(timeout_secs = secs, "Run deadline reached; cancelling remaining units");
      token.cancel();
    });
  }

  let progress = ProgressBar::new(units.len() as u64);
  progress.set_style(
    ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
      .unwrap()
      .progress_chars("=>-"),
  );

  let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
  let (tx, mut rx) = mpsc::unbounded_channel::<UnitResult>();

  let mut handles = Vec::with_capacity(units.len());
  for unit in units {
    let truth = Arc::clone(&truths[&unit.id.scenario]);
    let matcher = Arc::clone(&matcher);
    let semaphore = Arc::clone(&semaphore);
    let token = token.clone();
    let tx = tx.clone();
    handles.push(tokio::spawn(async move {
      let Ok(_permit) = semaphore.acquire_owned().await else { return };
      let result = evaluate_unit(unit, &truth, &matcher, &token).await;
      let _ = tx.send(result);
    }));
  }
  drop(tx);

  let mut aggregator = Aggregator::new();
  while let Some(result) = rx.recv().await {
    progress.set_message(result.unit.to_string());
    progress.inc(1);
    aggregator.record(result);
  }
  futures::future::join_all(handles).await;
  progress.finish_and_clear();

  // Stop the signal listener once the run is over.
  token.cancel();

  let report = aggregator.finish(&config.model);
  info!(
    units = report.metadata.total_units,
    incomplete = report.metadata.incomplete_units,
    "Evaluation finished"
  );
  Ok(report)
}
