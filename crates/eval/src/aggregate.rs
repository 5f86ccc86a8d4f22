//! Statistical aggregation of unit results.
//!
//! The aggregator is a fold: unit results arrive in whatever order the
//! worker pool finishes them, and all statistics are computed once at
//! `finish` from the accumulated per-trial values. Recording the same set
//! of results in any order yields the same report.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::matcher::MatchStatus;
use crate::report::{Report, ReportMetadata, ScenarioReport, SkillReport, TrialReport};
use crate::runner::UnitId;
use crate::scoring::UnitScore;

/// Outcome of one evaluated unit, as handed back by a worker.
#[derive(Debug, Clone)]
pub struct UnitResult {
  pub unit: UnitId,
  pub status: MatchStatus,
  pub score: Option<UnitScore>,
  pub duration_secs: f64,
  pub duplicate_findings: usize,
}

/// Mean and sample standard deviation of one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricStats {
  pub mean: f64,
  pub std: f64,
}

impl MetricStats {
  /// Compute over a sample. Fewer than two values have no spread.
  pub fn from_values(values: &[f64]) -> Self {
    if values.is_empty() {
      return Self { mean: 0.0, std: 0.0 };
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
      let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
      variance.sqrt()
    } else {
      0.0
    };

    Self { mean, std }
  }
}

/// Statistics over one scenario's trials.
///
/// Metric stats cover complete trials only; incomplete trials are counted
/// but never enter a mean. Duration covers every trial, since the artifact
/// reports it whether or not the oracle answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStats {
  pub precision: MetricStats,
  pub recall: MetricStats,
  pub f_beta: MetricStats,
  pub true_positives: MetricStats,
  pub false_positives: MetricStats,
  pub false_negatives: MetricStats,
  pub duration_secs: MetricStats,
  pub complete_trials: usize,
  pub incomplete_trials: usize,
}

/// Macro-averaged statistics over one skill's scenarios.
///
/// Each scenario contributes its per-trial mean with equal weight, so a
/// scenario with many trials cannot dominate one with few. Spread is
/// across scenario means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillStats {
  pub precision: MetricStats,
  pub recall: MetricStats,
  pub f_beta: MetricStats,
  pub scenarios: usize,
  pub complete_trials: usize,
  pub incomplete_trials: usize,
}

fn scenario_stats(trials: &BTreeMap<String, TrialReport>) -> ScenarioStats {
  let mut precision = Vec::new();
  let mut recall = Vec::new();
  let mut f_beta = Vec::new();
  let mut tp = Vec::new();
  let mut fp = Vec::new();
  let mut fn_ = Vec::new();
  let mut duration = Vec::new();
  let mut incomplete = 0usize;

  for trial in trials.values() {
    duration.push(trial.duration_secs);
    match &trial.score {
      Some(score) => {
        precision.push(score.precision);
        recall.push(score.recall);
        f_beta.push(score.f_beta);
        tp.push(score.true_positives as f64);
        fp.push(score.false_positives as f64);
        fn_.push(score.false_negatives as f64);
      }
      None => incomplete += 1,
    }
  }

  ScenarioStats {
    precision: MetricStats::from_values(&precision),
    recall: MetricStats::from_values(&recall),
    f_beta: MetricStats::from_values(&f_beta),
    true_positives: MetricStats::from_values(&tp),
    false_positives: MetricStats::from_values(&fp),
    false_negatives: MetricStats::from_values(&fn_),
    duration_secs: MetricStats::from_values(&duration),
    complete_trials: precision.len(),
    incomplete_trials: incomplete,
  }
}

fn skill_stats(scenarios: &BTreeMap<String, ScenarioReport>) -> SkillStats {
  // Scenarios where the oracle answered for no trial have no mean to
  // contribute; they still count toward the incomplete totals.
  let mut precision = Vec::new();
  let mut recall = Vec::new();
  let mut f_beta = Vec::new();
  let mut complete = 0usize;
  let mut incomplete = 0usize;

  for scenario in scenarios.values() {
    complete += scenario.stats.complete_trials;
    incomplete += scenario.stats.incomplete_trials;
    if scenario.stats.complete_trials > 0 {
      precision.push(scenario.stats.precision.mean);
      recall.push(scenario.stats.recall.mean);
      f_beta.push(scenario.stats.f_beta.mean);
    }
  }

  SkillStats {
    precision: MetricStats::from_values(&precision),
    recall: MetricStats::from_values(&recall),
    f_beta: MetricStats::from_values(&f_beta),
    scenarios: scenarios.len(),
    complete_trials: complete,
    incomplete_trials: incomplete,
  }
}

/// Order-insensitive accumulator of unit results.
#[derive(Debug, Default)]
pub struct Aggregator {
  skills: BTreeMap<String, BTreeMap<String, BTreeMap<String, TrialReport>>>,
}

impl Aggregator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record one unit's result. Order of calls does not affect the report.
  pub fn record(&mut self, result: UnitResult) {
    let UnitId { skill, scenario, trial } = result.unit;
    self.skills.entry(skill).or_default().entry(scenario).or_default().insert(
      trial,
      TrialReport {
        status: result.status,
        score: result.score,
        duration_secs: result.duration_secs,
        duplicate_findings: result.duplicate_findings,
      },
    );
  }

  /// Compute all statistics and assemble the report.
  pub fn finish(self, model: &str) -> Report {
    let mut total_units = 0usize;
    let mut incomplete_units = 0usize;
    let mut skills = BTreeMap::new();

    for (skill, scenarios) in self.skills {
      let scenarios: BTreeMap<String, ScenarioReport> = scenarios
        .into_iter()
        .map(|(name, trials)| {
          let stats = scenario_stats(&trials);
          total_units += trials.len();
          incomplete_units += stats.incomplete_trials;
          (name, ScenarioReport { stats, trials })
        })
        .collect();

      let stats = skill_stats(&scenarios);
      skills.insert(skill, SkillReport { stats, scenarios });
    }

    Report {
      metadata: ReportMetadata {
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: model.to_string(),
        total_units,
        incomplete_units,
      },
      skills,
    }
  }
}
