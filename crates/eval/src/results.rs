//! Result artifact parsing.
//!
//! One trial produces one markdown artifact with a summary table and the
//! assistant's raw output. The findings live in a fenced ```json block
//! whose object carries a top-level `findings` array. Parsing is tolerant
//! by design: a malformed artifact is evidence of assistant misbehavior,
//! not an engine failure, so it degrades to an empty findings list with a
//! warning instead of an error.

use std::{
  path::{Path, PathBuf},
  sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One item a review claims to have found.
///
/// Ids are assigned in document order and are only unique within the
/// owning (skill, scenario, trial) unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedFinding {
  pub id: String,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub severity: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
}

/// Parsed content of one trial's result artifact.
#[derive(Debug, Clone, Default)]
pub struct TrialArtifact {
  pub findings: Vec<ReportedFinding>,
  /// Wall-clock duration reported in the artifact's summary table
  pub duration_secs: f64,
}

static JSON_BLOCK_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)```json\s*\n(.*?)\n```").unwrap());

static DURATION_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\|\s*Duration\s*\|\s*([\d.]+)s\s*\|").unwrap());

#[derive(Debug, Deserialize)]
struct RawDocument {
  findings: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
  description: String,
  #[serde(default)]
  severity: Option<String>,
  #[serde(default)]
  location: Option<String>,
  #[serde(default)]
  file: Option<String>,
  #[serde(default)]
  line_range: Option<[u32; 2]>,
}

impl RawFinding {
  /// Collapse the artifact's location fields into one display string.
  fn resolve_location(&self) -> Option<String> {
    if self.location.is_some() {
      return self.location.clone();
    }
    self.file.as_ref().map(|file| match self.line_range {
      Some([start, end]) => format!("{}:{}-{}", file, start, end),
      None => file.clone(),
    })
  }
}

/// Parse one result artifact into findings plus reported duration.
///
/// Pure function of the artifact text; never fails. A missing or
/// malformed findings section yields an empty list and a warning.
pub fn parse_artifact(text: &str) -> TrialArtifact {
  let duration_secs = DURATION_RE
    .captures(text)
    .and_then(|c| c[1].parse::<f64>().ok())
    .unwrap_or(0.0);

  for cap in JSON_BLOCK_RE.captures_iter(text) {
    match serde_json::from_str::<RawDocument>(&cap[1]) {
      Ok(doc) => {
        let findings = doc
          .findings
          .into_iter()
          .enumerate()
          .map(|(i, raw)| ReportedFinding {
            id: format!("f{}", i + 1),
            location: raw.resolve_location(),
            description: raw.description,
            severity: raw.severity,
          })
          .collect();
        return TrialArtifact { findings, duration_secs };
      }
      Err(e) => {
        // A json block without a findings array may be unrelated output;
        // keep scanning, but remember why the block was skipped.
        warn!(err = %e, "Skipping json block that is not a findings document");
      }
    }
  }

  if !text.is_empty() && !JSON_BLOCK_RE.is_match(text) {
    warn!("Result artifact has no findings section; treating as zero findings");
  }

  TrialArtifact {
    findings: Vec::new(),
    duration_secs,
  }
}

/// Count pairs of findings that point at the same location.
///
/// A high count means the assistant reported the same defect repeatedly.
pub fn count_duplicates(findings: &[ReportedFinding]) -> usize {
  findings
    .iter()
    .enumerate()
    .map(|(i, a)| {
      findings[i + 1..]
        .iter()
        .filter(|b| match (&a.location, &b.location) {
          (Some(la), Some(lb)) => !la.is_empty() && la == lb,
          _ => false,
        })
        .count()
    })
    .sum()
}

/// Locate the artifact inside one trial directory.
///
/// `result.md` is preferred; otherwise the lexicographically first `.md`
/// file is used so that discovery stays deterministic.
pub fn find_artifact(trial_dir: &Path) -> Option<PathBuf> {
  let preferred = trial_dir.join("result.md");
  if preferred.is_file() {
    return Some(preferred);
  }

  let mut candidates: Vec<PathBuf> = std::fs::read_dir(trial_dir)
    .ok()?
    .filter_map(|e| e.ok())
    .map(|e| e.path())
    .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
    .collect();
  candidates.sort();
  candidates.into_iter().next()
}
