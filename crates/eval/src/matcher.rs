//! Correspondence resolution between expected issues and reported findings.
//!
//! For one unit the whole expected list and finding list go to the oracle
//! in a single batched request; the oracle proposes pairs it judges
//! semantically equivalent. This module enforces the matching invariants
//! the oracle cannot be trusted with: 1:1 matching, ids that actually
//! exist, and an explicit INCOMPLETE status when the oracle never answers.

use std::collections::HashSet;
use std::time::Duration;

use oracle::{OracleProvider, OracleRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::ground_truth::ExpectedIssue;
use crate::results::ReportedFinding;

/// Whether a unit's matching actually ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
  Complete,
  Incomplete,
}

/// The resolved correspondence for one unit.
///
/// When `status` is `Complete`, `matched` is injective in both directions
/// and the three collections partition the expected ids and finding ids
/// with no overlap and no omission. When `Incomplete`, all three are empty
/// and the unit must be reported as unscored, never as zero matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
  /// Accepted (expected id, finding id) pairs
  pub matched: Vec<(String, String)>,
  /// Expected ids with no accepted pair (false negatives)
  pub unmatched_expected: Vec<String>,
  /// Finding ids with no accepted pair (false positives)
  pub unmatched_findings: Vec<String>,
  pub status: MatchStatus,
}

impl MatchOutcome {
  pub(crate) fn incomplete() -> Self {
    Self {
      matched: Vec::new(),
      unmatched_expected: Vec::new(),
      unmatched_findings: Vec::new(),
      status: MatchStatus::Incomplete,
    }
  }
}

/// Matcher configuration.
///
/// Passed explicitly into the constructor so tests can inject a substitute
/// oracle client and deterministic retry timing.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
  /// Oracle model to use
  pub model: String,
  /// Per-call timeout in seconds
  pub timeout_secs: u64,
  /// Total attempts per unit before giving up
  pub max_attempts: u32,
  /// First backoff delay; doubles per attempt
  pub initial_backoff_ms: u64,
}

impl Default for MatcherConfig {
  fn default() -> Self {
    Self {
      model: "haiku".to_string(),
      timeout_secs: 60,
      max_attempts: 3,
      initial_backoff_ms: 500,
    }
  }
}

/// Structured reply the oracle is asked to produce.
#[derive(Debug, Deserialize)]
struct MatchResponse {
  #[allow(dead_code)]
  reasoning: String,
  matches: Vec<ProposedPair>,
}

#[derive(Debug, Deserialize)]
struct ProposedPair {
  expected_id: String,
  finding_id: String,
}

/// Resolves one unit's correspondence via the oracle.
pub struct Matcher {
  provider: Box<dyn OracleProvider>,
  config: MatcherConfig,
}

impl Matcher {
  pub fn new(provider: Box<dyn OracleProvider>, config: MatcherConfig) -> Self {
    Self { provider, config }
  }

  /// Resolve the correspondence for one unit.
  ///
  /// Infallible by contract: oracle exhaustion degrades the unit to
  /// `Incomplete` rather than failing the caller.
  pub async fn match_unit(&self, expected: &[ExpectedIssue], findings: &[ReportedFinding]) -> MatchOutcome {
    // With nothing reported there is nothing to judge: every expected
    // issue is a miss and the unit is complete without an oracle call.
    if findings.is_empty() {
      return MatchOutcome {
        matched: Vec::new(),
        unmatched_expected: expected.iter().map(|e| e.id.clone()).collect(),
        unmatched_findings: Vec::new(),
        status: MatchStatus::Complete,
      };
    }

    let request = self.build_request(expected, findings);

    for attempt in 1..=self.config.max_attempts {
      match self.provider.judge(request.clone()).await {
        Ok(response) => match parse_response(&response.text) {
          Ok(pairs) => {
            debug!(
              proposed = pairs.len(),
              expected = expected.len(),
              findings = findings.len(),
              "Oracle proposed matches"
            );
            return resolve_pairs(expected, findings, pairs);
          }
          Err(e) => {
            // Malformed shape is treated exactly like a transport failure.
            warn!(attempt, err = %e, "Oracle response unparseable");
          }
        },
        Err(e) => {
          warn!(attempt, err = %e, "Oracle call failed");
        }
      }

      if attempt < self.config.max_attempts {
        // Doubling is capped so an oversized attempt count cannot overflow
        // the shift or sleep for years.
        let delay = self.config.initial_backoff_ms.saturating_mul(1 << (attempt - 1).min(10));
        tokio::time::sleep(Duration::from_millis(delay)).await;
      }
    }

    warn!(
      attempts = self.config.max_attempts,
      "Oracle attempts exhausted; marking unit incomplete"
    );
    MatchOutcome::incomplete()
  }

  /// Build the single batched request for one unit.
  ///
  /// Only ids and descriptions are sent; severity and location carry no
  /// weight in equivalence judgment.
  fn build_request(&self, expected: &[ExpectedIssue], findings: &[ReportedFinding]) -> OracleRequest {
    let expected_json: Vec<_> = expected
      .iter()
      .map(|e| json!({"id": e.id, "description": e.description}))
      .collect();
    let findings_json: Vec<_> = findings
      .iter()
      .map(|f| json!({"id": f.id, "description": f.description}))
      .collect();

    let prompt = format!(
      "You are evaluating a code review tool. Decide which reported findings \
       describe the same underlying defect as which expected issues, \
       independent of wording or exact location phrasing.\n\n\
       Expected issues:\n{}\n\n\
       Reported findings:\n{}\n\n\
       Output every (expected_id, finding_id) pair you judge semantically \
       equivalent. Leave out anything that matches nothing. First explain \
       your reasoning, then output matches.",
      serde_json::to_string_pretty(&expected_json).unwrap_or_default(),
      serde_json::to_string_pretty(&findings_json).unwrap_or_default(),
    );

    let schema = json!({
      "type": "object",
      "properties": {
        "reasoning": {"type": "string"},
        "matches": {
          "type": "array",
          "items": {
            "type": "object",
            "properties": {
              "expected_id": {"type": "string"},
              "finding_id": {"type": "string"}
            },
            "required": ["expected_id", "finding_id"]
          }
        }
      },
      "required": ["reasoning", "matches"]
    });

    OracleRequest {
      prompt,
      system_prompt: None,
      model: self.config.model.clone(),
      timeout_secs: self.config.timeout_secs,
      json_schema: schema.to_string(),
    }
  }
}

/// Parse the oracle's structured reply, tolerating a markdown fence.
fn parse_response(text: &str) -> oracle::Result<Vec<ProposedPair>> {
  let trimmed = text.trim();
  let body = trimmed
    .strip_prefix("```json")
    .or_else(|| trimmed.strip_prefix("```"))
    .and_then(|rest| rest.strip_suffix("```"))
    .map(str::trim)
    .unwrap_or(trimmed);

  let parsed: MatchResponse = serde_json::from_str(body)?;
  Ok(parsed.matches)
}

/// Enforce 1:1 matching over the oracle's proposed pairs.
///
/// First pair in oracle order wins; later pairs reusing either id are
/// dropped and logged, as are pairs naming ids that do not exist in this
/// unit. The surviving pairs plus the leftover ids on both sides form a
/// complete partition.
fn resolve_pairs(
  expected: &[ExpectedIssue],
  findings: &[ReportedFinding],
  pairs: Vec<ProposedPair>,
) -> MatchOutcome {
  let expected_ids: HashSet<&str> = expected.iter().map(|e| e.id.as_str()).collect();
  let finding_ids: HashSet<&str> = findings.iter().map(|f| f.id.as_str()).collect();

  let mut used_expected: HashSet<String> = HashSet::new();
  let mut used_findings: HashSet<String> = HashSet::new();
  let mut matched: Vec<(String, String)> = Vec::new();

  for pair in pairs {
    if !expected_ids.contains(pair.expected_id.as_str()) || !finding_ids.contains(pair.finding_id.as_str()) {
      warn!(
        expected_id = %pair.expected_id,
        finding_id = %pair.finding_id,
        "Dropping oracle pair referencing unknown id"
      );
      continue;
    }
    if used_expected.contains(&pair.expected_id) || used_findings.contains(&pair.finding_id) {
      warn!(
        expected_id = %pair.expected_id,
        finding_id = %pair.finding_id,
        "Dropping conflicting oracle pair; first in oracle order wins"
      );
      continue;
    }
    used_expected.insert(pair.expected_id.clone());
    used_findings.insert(pair.finding_id.clone());
    matched.push((pair.expected_id, pair.finding_id));
  }

  let unmatched_expected = expected
    .iter()
    .filter(|e| !used_expected.contains(&e.id))
    .map(|e| e.id.clone())
    .collect();
  let unmatched_findings = findings
    .iter()
    .filter(|f| !used_findings.contains(&f.id))
    .map(|f| f.id.clone())
    .collect();

  MatchOutcome {
    matched,
    unmatched_expected,
    unmatched_findings,
    status: MatchStatus::Complete,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ground_truth::Severity;
  use async_trait::async_trait;
  use oracle::{OracleError, OracleResponse};
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  /// Scripted oracle: replays a fixed sequence of outcomes.
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

    fn call_count(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
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
          input_tokens: 0,
          output_tokens: 0,
          duration_ms: 1,
        }),
        None => Err(OracleError::Timeout(1)),
      }
    }
  }

  fn issue(id: &str) -> ExpectedIssue {
    ExpectedIssue {
      id: id.to_string(),
      description: format!("issue {}", id),
      severity: Severity::High,
      category: "security".to_string(),
    }
  }

  fn finding(id: &str) -> ReportedFinding {
    ReportedFinding {
      id: id.to_string(),
      description: format!("finding {}", id),
      severity: None,
      location: None,
    }
  }

  fn fast_config() -> MatcherConfig {
    MatcherConfig {
      initial_backoff_ms: 1,
      ..Default::default()
    }
  }

  fn reply(pairs: &[(&str, &str)]) -> String {
    let matches: Vec<_> = pairs
      .iter()
      .map(|(e, f)| json!({"expected_id": e, "finding_id": f}))
      .collect();
    json!({"reasoning": "scripted", "matches": matches}).to_string()
  }

  #[tokio::test]
  async fn test_perfect_correspondence() {
    let oracle = ScriptedOracle::new(vec![Some(reply(&[("sql", "f1"), ("null", "f2")]))]);
    let matcher = Matcher::new(Box::new(oracle.clone()), fast_config());

    let outcome = matcher
      .match_unit(&[issue("sql"), issue("null")], &[finding("f1"), finding("f2")])
      .await;

    assert_eq!(outcome.status, MatchStatus::Complete);
    assert_eq!(outcome.matched.len(), 2);
    assert!(outcome.unmatched_expected.is_empty());
    assert!(outcome.unmatched_findings.is_empty());
    assert_eq!(oracle.call_count(), 1);
  }

  #[tokio::test]
  async fn test_conflicting_pairs_first_wins() {
    // Oracle claims f1 matches both expected issues; only the first pair
    // survives and the second expected id becomes a false negative.
    let oracle = ScriptedOracle::new(vec![Some(reply(&[("sql", "f1"), ("null", "f1")]))]);
    let matcher = Matcher::new(Box::new(oracle), fast_config());

    let outcome = matcher
      .match_unit(&[issue("sql"), issue("null")], &[finding("f1")])
      .await;

    assert_eq!(outcome.matched, vec![("sql".to_string(), "f1".to_string())]);
    assert_eq!(outcome.unmatched_expected, vec!["null".to_string()]);
    assert!(outcome.unmatched_findings.is_empty());
  }

  #[tokio::test]
  async fn test_unknown_ids_dropped() {
    let oracle = ScriptedOracle::new(vec![Some(reply(&[("ghost", "f1"), ("sql", "f9"), ("sql", "f1")]))]);
    let matcher = Matcher::new(Box::new(oracle), fast_config());

    let outcome = matcher.match_unit(&[issue("sql")], &[finding("f1")]).await;

    assert_eq!(outcome.matched, vec![("sql".to_string(), "f1".to_string())]);
    assert!(outcome.unmatched_expected.is_empty());
    assert!(outcome.unmatched_findings.is_empty());
  }

  #[tokio::test]
  async fn test_empty_findings_skip_oracle() {
    let oracle = ScriptedOracle::new(vec![]);
    let matcher = Matcher::new(Box::new(oracle.clone()), fast_config());

    let outcome = matcher.match_unit(&[issue("sql"), issue("null")], &[]).await;

    assert_eq!(outcome.status, MatchStatus::Complete);
    assert_eq!(outcome.unmatched_expected.len(), 2);
    assert_eq!(oracle.call_count(), 0);
  }

  #[tokio::test]
  async fn test_retry_then_success() {
    let oracle = ScriptedOracle::new(vec![
      None,
      Some("not even json".to_string()),
      Some(reply(&[("sql", "f1")])),
    ]);
    let matcher = Matcher::new(Box::new(oracle.clone()), fast_config());

    let outcome = matcher.match_unit(&[issue("sql")], &[finding("f1")]).await;

    assert_eq!(outcome.status, MatchStatus::Complete);
    assert_eq!(outcome.matched.len(), 1);
    assert_eq!(oracle.call_count(), 3);
  }

  #[tokio::test]
  async fn test_exhaustion_marks_incomplete() {
    let oracle = ScriptedOracle::new(vec![None, None, None]);
    let matcher = Matcher::new(Box::new(oracle.clone()), fast_config());

    let outcome = matcher.match_unit(&[issue("sql")], &[finding("f1")]).await;

    assert_eq!(outcome.status, MatchStatus::Incomplete);
    assert!(outcome.matched.is_empty());
    assert!(outcome.unmatched_expected.is_empty());
    assert!(outcome.unmatched_findings.is_empty());
    assert_eq!(oracle.call_count(), 3);
  }

  #[tokio::test]
  async fn test_large_attempt_count_does_not_overflow_backoff() {
    // 80 attempts pushes the doubling exponent far past 64 bits; the delay
    // must stay capped instead of overflowing the shift.
    let oracle = ScriptedOracle::new(vec![]);
    let matcher = Matcher::new(
      Box::new(oracle.clone()),
      MatcherConfig {
        initial_backoff_ms: 0,
        max_attempts: 80,
        ..Default::default()
      },
    );

    let outcome = matcher.match_unit(&[issue("sql")], &[finding("f1")]).await;

    assert_eq!(outcome.status, MatchStatus::Incomplete);
    assert_eq!(oracle.call_count(), 80);
  }

  #[tokio::test]
  async fn test_fenced_response_accepted() {
    let fenced = format!("```json\n{}\n```", reply(&[("sql", "f1")]));
    let oracle = ScriptedOracle::new(vec![Some(fenced)]);
    let matcher = Matcher::new(Box::new(oracle), fast_config());

    let outcome = matcher.match_unit(&[issue("sql")], &[finding("f1")]).await;
    assert_eq!(outcome.matched.len(), 1);
  }

  #[tokio::test]
  async fn test_partition_invariant() {
    let oracle = ScriptedOracle::new(vec![Some(reply(&[("sql", "f2")]))]);
    let matcher = Matcher::new(Box::new(oracle), fast_config());

    let expected = [issue("sql"), issue("null"), issue("xss")];
    let findings = [finding("f1"), finding("f2")];
    let outcome = matcher.match_unit(&expected, &findings).await;

    let tp = outcome.matched.len();
    assert_eq!(tp + outcome.unmatched_expected.len(), expected.len());
    assert_eq!(tp + outcome.unmatched_findings.len(), findings.len());
  }
}
