//! Ground truth loading and validation.
//!
//! Every scenario directory carries a `ground_truth.json` listing the
//! defects a correct review must surface. Ground truth correctness is a
//! precondition for any of the run's numbers to mean anything, so every
//! violation here is fatal to the whole evaluation.

use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{EvalError, Result};

/// Severity of a planted defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

impl Severity {
  pub fn as_str(&self) -> &'static str {
    match self {
      Severity::Low => "low",
      Severity::Medium => "medium",
      Severity::High => "high",
      Severity::Critical => "critical",
    }
  }
}

impl std::fmt::Display for Severity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// One planted defect a correct review should surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedIssue {
  /// Identifier, unique within the scenario
  pub id: String,
  /// What the defect is, in prose
  pub description: String,
  pub severity: Severity,
  /// Defect category (security, correctness, ...)
  pub category: String,
}

/// The authoritative issue list for one scenario.
#[derive(Debug, Clone)]
pub struct GroundTruth {
  pub scenario: String,
  pub issues: Vec<ExpectedIssue>,
}

impl GroundTruth {
  pub fn issue_ids(&self) -> Vec<&str> {
    self.issues.iter().map(|i| i.id.as_str()).collect()
  }
}

#[derive(Debug, Deserialize)]
struct RawGroundTruth {
  expected_issues: Vec<ExpectedIssue>,
}

/// Load and validate ground truth for one scenario.
///
/// Validates that the file exists, every severity is a known value, ids are
/// unique within the scenario, and the list is non-empty. Any violation is
/// a `Config` error that aborts the run before scoring begins.
pub fn load_ground_truth(scenarios_dir: &Path, scenario: &str) -> Result<GroundTruth> {
  let path = scenarios_dir.join(scenario).join("ground_truth.json");
  if !path.is_file() {
    return Err(EvalError::Config(format!(
      "scenario '{}': ground truth not found at {}",
      scenario,
      path.display()
    )));
  }

  let text = std::fs::read_to_string(&path)?;
  let raw: RawGroundTruth = serde_json::from_str(&text)
    .map_err(|e| EvalError::Config(format!("scenario '{}': invalid ground truth: {}", scenario, e)))?;

  if raw.expected_issues.is_empty() {
    return Err(EvalError::Config(format!(
      "scenario '{}': ground truth lists no expected issues",
      scenario
    )));
  }

  let mut seen: HashSet<&str> = HashSet::new();
  for issue in &raw.expected_issues {
    if !seen.insert(issue.id.as_str()) {
      return Err(EvalError::Config(format!(
        "scenario '{}': duplicate expected issue id '{}'",
        scenario, issue.id
      )));
    }
  }

  Ok(GroundTruth {
    scenario: scenario.to_string(),
    issues: raw.expected_issues,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_scenario(dir: &TempDir, scenario: &str, json: &str) {
    let scenario_dir = dir.path().join(scenario);
    std::fs::create_dir_all(&scenario_dir).unwrap();
    std::fs::write(scenario_dir.join("ground_truth.json"), json).unwrap();
  }

  #[test]
  fn test_load_valid_ground_truth() {
    let temp = TempDir::new().unwrap();
    write_scenario(
      &temp,
      "sql-injection-py",
      r#"{
        "expected_issues": [
          {"id": "sql-injection", "description": "SQL injection via f-string", "severity": "critical", "category": "security"},
          {"id": "missing-null-check", "description": "No null check on user", "severity": "low", "category": "correctness"}
        ]
      }"#,
    );

    let gt = load_ground_truth(temp.path(), "sql-injection-py").unwrap();
    assert_eq!(gt.scenario, "sql-injection-py");
    assert_eq!(gt.issues.len(), 2);
    assert_eq!(gt.issues[0].severity, Severity::Critical);
    assert_eq!(gt.issue_ids(), vec!["sql-injection", "missing-null-check"]);
  }

  #[test]
  fn test_missing_ground_truth_is_config_error() {
    let temp = TempDir::new().unwrap();
    let err = load_ground_truth(temp.path(), "absent").unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
  }

  #[test]
  fn test_empty_issue_list_rejected() {
    let temp = TempDir::new().unwrap();
    write_scenario(&temp, "empty", r#"{"expected_issues": []}"#);
    let err = load_ground_truth(temp.path(), "empty").unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
  }

  #[test]
  fn test_duplicate_ids_rejected() {
    let temp = TempDir::new().unwrap();
    write_scenario(
      &temp,
      "dup",
      r#"{
        "expected_issues": [
          {"id": "a", "description": "one", "severity": "low", "category": "style"},
          {"id": "a", "description": "two", "severity": "high", "category": "style"}
        ]
      }"#,
    );
    let err = load_ground_truth(temp.path(), "dup").unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
  }

  #[test]
  fn test_unknown_severity_rejected() {
    let temp = TempDir::new().unwrap();
    write_scenario(
      &temp,
      "bad-sev",
      r#"{
        "expected_issues": [
          {"id": "a", "description": "one", "severity": "catastrophic", "category": "style"}
        ]
      }"#,
    );
    let err = load_ground_truth(temp.path(), "bad-sev").unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
  }
}
