//! End-to-end evaluation integration tests
//!
//! Tests: full run over a fixture result tree with a scripted oracle,
//! incomplete units on oracle exhaustion, report persistence, exit-worthy
//! configuration failures.

use std::path::Path;
use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use eval::{EvalConfig, EvalError, MatchStatus, Report, evaluate};
use oracle::{OracleError, OracleProvider, OracleRequest, OracleResponse};
use tempfile::TempDir;

/// Oracle that replays a fixed per-call script, shared across workers.
#[derive(Clone)]
struct ScriptedOracle {
  replies: Arc<Vec<Option<String>>>,
  calls: Arc<AtomicUsize>,
}

impl ScriptedOracle {
  fn new(replies: Vec<Option<String>>) -> Self {
    Self {
      replies: Arc::new(replies),
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }
}

#[async_trait]
impl OracleProvider for ScriptedOracle {
  fn name(&self) -> &str {
    "scripted"
  }

  fn is_available(&self) -> bool {
    true
  }

  async fn judge(&self, _request: OracleRequest) -> oracle::Result<OracleResponse> {
    let idx = self.calls.fetch_add(1, Ordering::SeqCst);
    match self.replies.get(idx).cloned().flatten() {
      Some(text) => Ok(OracleResponse {
        text,
        input_tokens: 10,
        output_tokens: 10,
        duration_ms: 1,
      }),
      None => Err(OracleError::Timeout(1)),
    }
  }
}

fn write_ground_truth(scenarios: &Path, scenario: &str, json: &str) {
  let dir = scenarios.join(scenario);
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join("ground_truth.json"), json).unwrap();
}

fn write_trial(results: &Path, skill: &str, scenario: &str, trial: &str, body: &str) {
  let dir = results.join(skill).join(scenario).join(trial);
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join("result.md"), body).unwrap();
}

fn config(results: &TempDir, scenarios: &TempDir) -> EvalConfig {
  EvalConfig {
    results_dir: results.path().to_path_buf(),
    scenarios_dir: scenarios.path().to_path_buf(),
    // Serial execution keeps the scripted oracle's reply order deterministic.
    concurrency: 1,
    ..Default::default()
  }
}

const TWO_ISSUE_TRUTH: &str = r#"{
  "expected_issues": [
    {"id": "sql-injection", "description": "SQL injection via f-string query", "severity": "critical", "category": "security"},
    {"id": "missing-null-check", "description": "current_user may be None", "severity": "low", "category": "correctness"}
  ]
}"#;

const TWO_FINDING_ARTIFACT: &str = r#"# code-review-v0/sql-injection-py

| Field | Value |
|-------|-------|
| Duration | 116.4s |

```json
{"findings":[
  {"description":"User input is interpolated into a SQL string", "severity":"critical", "file":"app.py", "line_range":[32,34]},
  {"description":"Variable naming is inconsistent", "severity":"low", "location":"app.py:5-40"}
]}
```
"#;

fn reply(pairs: &[(&str, &str)]) -> String {
  let matches: Vec<String> = pairs
    .iter()
    .map(|(e, f)| format!(r#"{{"expected_id": "{}", "finding_id": "{}"}}"#, e, f))
    .collect();
  format!(r#"{{"reasoning": "scripted", "matches": [{}]}}"#, matches.join(","))
}

/// Full run: one skill, one scenario, two trials, oracle matches one pair.
#[tokio::test]
async fn test_end_to_end_evaluation() {
  let results = TempDir::new().unwrap();
  let scenarios = TempDir::new().unwrap();

  write_ground_truth(scenarios.path(), "sql-injection-py", TWO_ISSUE_TRUTH);
  write_trial(
    results.path(),
    "code-review-v0",
    "sql-injection-py",
    "trial-1",
    TWO_FINDING_ARTIFACT,
  );
  // Second trial reports nothing; scored without an oracle call.
  write_trial(
    results.path(),
    "code-review-v0",
    "sql-injection-py",
    "trial-2",
    "| Duration | 20.0s |\n\nNo issues found.\n",
  );

  let oracle = ScriptedOracle::new(vec![Some(reply(&[("sql-injection", "f1")]))]);
  let report = evaluate(&config(&results, &scenarios), Box::new(oracle.clone()))
    .await
    .unwrap();

  assert_eq!(report.metadata.total_units, 2);
  assert_eq!(report.metadata.incomplete_units, 0);
  // Only trial-1 had findings to judge.
  assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

  let scenario = &report.skills["code-review-v0"].scenarios["sql-injection-py"];

  let t1 = &scenario.trials["trial-1"];
  assert_eq!(t1.status, MatchStatus::Complete);
  assert!((t1.duration_secs - 116.4).abs() < 1e-9);
  let s1 = t1.score.as_ref().unwrap();
  assert_eq!(s1.true_positives, 1);
  assert_eq!(s1.false_positives, 1);
  assert_eq!(s1.false_negatives, 1);
  assert!((s1.precision - 0.5).abs() < 1e-9);

  let t2 = &scenario.trials["trial-2"];
  let s2 = t2.score.as_ref().unwrap();
  assert_eq!(s2.precision, 1.0);
  assert_eq!(s2.recall, 0.0);

  // Scenario mean over the two trials: (0.5 + 1.0) / 2.
  assert!((scenario.stats.precision.mean - 0.75).abs() < 1e-9);
}

/// Oracle never answers for one unit: that unit is incomplete, the run
/// still succeeds and every other unit is scored.
#[tokio::test]
async fn test_oracle_exhaustion_degrades_single_unit() {
  let results = TempDir::new().unwrap();
  let scenarios = TempDir::new().unwrap();

  write_ground_truth(scenarios.path(), "sql-injection-py", TWO_ISSUE_TRUTH);
  write_trial(
    results.path(),
    "code-review-v0",
    "sql-injection-py",
    "trial-1",
    TWO_FINDING_ARTIFACT,
  );
  write_trial(
    results.path(),
    "code-review-v0",
    "sql-injection-py",
    "trial-2",
    TWO_FINDING_ARTIFACT,
  );

  // trial-1 exhausts all three attempts, trial-2 succeeds on its first.
  let oracle = ScriptedOracle::new(vec![
    None,
    None,
    None,
    Some(reply(&[("sql-injection", "f1"), ("missing-null-check", "f2")])),
  ]);
  let mut cfg = config(&results, &scenarios);
  cfg.max_attempts = 3;
  let report = evaluate(&cfg, Box::new(oracle)).await.unwrap();

  assert_eq!(report.metadata.total_units, 2);
  assert_eq!(report.metadata.incomplete_units, 1);

  let scenario = &report.skills["code-review-v0"].scenarios["sql-injection-py"];
  assert_eq!(scenario.trials["trial-1"].status, MatchStatus::Incomplete);
  assert!(scenario.trials["trial-1"].score.is_none());

  let s2 = scenario.trials["trial-2"].score.as_ref().unwrap();
  assert_eq!(s2.recall, 1.0);

  // The incomplete trial must not drag the scenario mean down.
  assert!((scenario.stats.recall.mean - 1.0).abs() < 1e-9);
}

/// The report survives a save/load round trip with identical serialization.
#[tokio::test]
async fn test_report_persistence() {
  let results = TempDir::new().unwrap();
  let scenarios = TempDir::new().unwrap();
  let out = TempDir::new().unwrap();

  write_ground_truth(scenarios.path(), "sql-injection-py", TWO_ISSUE_TRUTH);
  write_trial(
    results.path(),
    "code-review-v0",
    "sql-injection-py",
    "trial-1",
    TWO_FINDING_ARTIFACT,
  );

  let oracle = ScriptedOracle::new(vec![Some(reply(&[("sql-injection", "f1")]))]);
  let report = evaluate(&config(&results, &scenarios), Box::new(oracle)).await.unwrap();

  let path = out.path().join("report.json");
  report.save(&path).unwrap();
  let loaded = Report::load(&path).unwrap();
  assert_eq!(loaded.to_json().unwrap(), report.to_json().unwrap());
}

/// Missing ground truth for a discovered scenario aborts before scoring.
#[tokio::test]
async fn test_missing_ground_truth_is_fatal() {
  let results = TempDir::new().unwrap();
  let scenarios = TempDir::new().unwrap();

  write_trial(results.path(), "code-review-v0", "unknown-scenario", "trial-1", "");

  let oracle = ScriptedOracle::new(vec![]);
  let err = evaluate(&config(&results, &scenarios), Box::new(oracle.clone()))
    .await
    .unwrap_err();

  assert!(matches!(err, EvalError::Config(_)));
  assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

/// An empty results tree is a configuration error, not an empty report.
#[tokio::test]
async fn test_empty_results_tree_is_fatal() {
  let results = TempDir::new().unwrap();
  let scenarios = TempDir::new().unwrap();

  let err = evaluate(&config(&results, &scenarios), Box::new(ScriptedOracle::new(vec![])))
    .await
    .unwrap_err();
  assert!(matches!(err, EvalError::Config(_)));
}
