//! Final report assembly and serialization.
//!
//! The report is an immutable snapshot built once by the aggregator. All
//! nesting uses `BTreeMap` keyed by skill/scenario/trial identifiers, so
//! serializing the same in-memory report twice always produces
//! byte-identical output - required for reproducibility audits.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::aggregate::{MetricStats, ScenarioStats, SkillStats};
use crate::matcher::MatchStatus;
use crate::scoring::UnitScore;

/// Complete evaluation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
  pub metadata: ReportMetadata,
  /// Per-skill results, keyed by skill name
  pub skills: BTreeMap<String, SkillReport>,
}

/// Report metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
  /// Report generation timestamp
  pub timestamp: DateTime<Utc>,
  /// Engine version
  pub version: String,
  /// Oracle model used for matching
  pub model: String,
  /// Total units evaluated
  pub total_units: usize,
  /// Units that could not be scored (oracle exhaustion or cancellation)
  pub incomplete_units: usize,
}

/// One skill's results across all scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillReport {
  pub stats: SkillStats,
  /// Per-scenario results, keyed by scenario name
  pub scenarios: BTreeMap<String, ScenarioReport>,
}

/// One scenario's results across trials of one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
  pub stats: ScenarioStats,
  /// Per-trial results, keyed by trial directory name
  pub trials: BTreeMap<String, TrialReport>,
}

/// One unit's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialReport {
  pub status: MatchStatus,
  /// Absent when the unit is incomplete
  #[serde(skip_serializing_if = "Option::is_none")]
  pub score: Option<UnitScore>,
  /// Duration reported by the trial's artifact
  pub duration_secs: f64,
  /// Findings pointing at locations already reported in the same trial
  pub duplicate_findings: usize,
}

impl Report {
  /// Serialize with stable key ordering.
  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Save report to a JSON file.
  pub fn save(&self, path: &Path) -> Result<()> {
    std::fs::write(path, self.to_json()?)?;
    Ok(())
  }

  /// Load report from a JSON file.
  pub fn load(path: &Path) -> Result<Self> {
    let json = std::fs::read_to_string(path)?;
    let report = serde_json::from_str(&json)?;
    Ok(report)
  }
}

fn fmt_stat(s: &MetricStats) -> String {
  format!("{:.2} ± {:.2}", s.mean, s.std)
}

/// Render a human-readable summary of the report.
pub fn render_summary(report: &Report) -> String {
  let mut out = String::new();

  let _ = writeln!(out, "# Evaluation Results");
  let _ = writeln!(out);
  let _ = writeln!(
    out,
    "**Units:** {} ({} incomplete) | **Model:** {}",
    report.metadata.total_units, report.metadata.incomplete_units, report.metadata.model
  );
  let _ = writeln!(out);
  let _ = writeln!(out, "| Skill | Scenario | Trials | Incomplete | Precision | Recall | F0.5 |");
  let _ = writeln!(out, "|-------|----------|--------|------------|-----------|--------|------|");

  for (skill, skill_report) in &report.skills {
    for (scenario, scenario_report) in &skill_report.scenarios {
      let stats = &scenario_report.stats;
      let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | {} | {} |",
        skill,
        scenario,
        stats.complete_trials + stats.incomplete_trials,
        stats.incomplete_trials,
        fmt_stat(&stats.precision),
        fmt_stat(&stats.recall),
        fmt_stat(&stats.f_beta),
      );
    }

    let stats = &skill_report.stats;
    let _ = writeln!(
      out,
      "| **{}** | *macro* | {} | {} | {} | {} | {} |",
      skill,
      stats.complete_trials + stats.incomplete_trials,
      stats.incomplete_trials,
      fmt_stat(&stats.precision),
      fmt_stat(&stats.recall),
      fmt_stat(&stats.f_beta),
    );
  }

  out
}
