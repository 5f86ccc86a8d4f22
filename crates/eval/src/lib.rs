//! Evaluation & scoring engine for AI code-review benchmarks.
//!
//! Given a tree of result artifacts produced by running a review skill
//! against crafted scenarios with known defects, this crate decides which
//! reported findings correspond to which planted defects (via an external
//! semantic-judgment oracle) and turns the correspondence into stable
//! precision/recall/Fβ statistics.
//!
//! ## Key Concepts
//!
//! - **Ground truth**: per-scenario list of expected issues, fatal to get wrong
//! - **Units**: one (skill, scenario, trial) result artifact each
//! - **Matcher**: one batched oracle call per unit, 1:1 matching enforced
//! - **Aggregation**: macro-averaged scenario and skill statistics with
//!   incomplete units tracked separately, never silently zeroed

pub mod aggregate;
pub mod ground_truth;
pub mod matcher;
pub mod report;
pub mod results;
pub mod runner;
pub mod scoring;

pub use aggregate::{Aggregator, MetricStats, ScenarioStats, SkillStats};
pub use ground_truth::{ExpectedIssue, GroundTruth, Severity, load_ground_truth};
pub use matcher::{MatchOutcome, MatchStatus, Matcher, MatcherConfig};
pub use report::{Report, ReportMetadata, TrialReport, render_summary};
pub use results::{ReportedFinding, TrialArtifact, parse_artifact};
pub use runner::{EvalConfig, UnitId, evaluate, list_scenarios};
pub use scoring::{UnitScore, score_outcome};

use thiserror::Error;

/// Engine-level errors.
///
/// Only configuration problems are fatal: a malformed result artifact
/// degrades its unit, and oracle failures degrade a unit to INCOMPLETE.
#[derive(Debug, Error)]
pub enum EvalError {
  #[error("Configuration error: {0}")]
  Config(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;
