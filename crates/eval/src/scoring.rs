//! Unit scoring from a resolved match outcome.
//!
//! Precision is weighted twice recall (Fβ with β = 0.5): in this domain a
//! false accusation costs more than a missed issue. The edge-case
//! conventions here are what keep NaN out of the aggregator.

use serde::{Deserialize, Serialize};

use crate::matcher::{MatchOutcome, MatchStatus};

/// β² for Fβ with β = 0.5.
const BETA_SQUARED: f64 = 0.25;

/// Metrics for one complete (skill, scenario, trial) unit.
///
/// All three ratio metrics are always within [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitScore {
  pub precision: f64,
  pub recall: f64,
  pub f_beta: f64,
  pub true_positives: usize,
  pub false_positives: usize,
  pub false_negatives: usize,
}

/// Convert a match outcome into a unit score.
///
/// Returns `None` for an incomplete outcome: an unscored unit is counted,
/// never folded into the statistics as zero matches.
///
/// Conventions:
/// - tp = fp = 0 (nothing reported) ⇒ precision = 1.0, no false accusations
/// - tp = fn = 0 (nothing expected) ⇒ recall = 1.0
/// - precision + recall = 0 ⇒ fβ = 0.0
pub fn score_outcome(outcome: &MatchOutcome) -> Option<UnitScore> {
  if outcome.status == MatchStatus::Incomplete {
    return None;
  }

  let tp = outcome.matched.len();
  let fp = outcome.unmatched_findings.len();
  let fn_ = outcome.unmatched_expected.len();

  let precision = if tp + fp > 0 {
    tp as f64 / (tp + fp) as f64
  } else {
    1.0
  };
  let recall = if tp + fn_ > 0 {
    tp as f64 / (tp + fn_) as f64
  } else {
    1.0
  };
  let f_beta = if precision + recall > 0.0 {
    (1.0 + BETA_SQUARED) * precision * recall / (BETA_SQUARED * precision + recall)
  } else {
    0.0
  };

  Some(UnitScore {
    precision,
    recall,
    f_beta,
    true_positives: tp,
    false_positives: fp,
    false_negatives: fn_,
  })
}
