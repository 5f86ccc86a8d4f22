//! Semantic-judgment oracle client.
//!
//! The evaluation engine never decides on its own whether two defect
//! descriptions mean the same thing; it delegates that judgment to an
//! external oracle. This crate defines the `OracleProvider` trait that
//! oracle backends implement, plus the request/response types shared by
//! all of them.

mod provider;

#[cfg(feature = "claude")]
mod claude;

pub use provider::{OracleProvider, Result};

/// Request for a single oracle judgment call.
#[derive(Debug, Clone, Default)]
pub struct OracleRequest {
  /// The prompt to send
  pub prompt: String,
  /// Optional system prompt
  pub system_prompt: Option<String>,
  /// Model to use
  pub model: String,
  /// Timeout in seconds (default: 60)
  pub timeout_secs: u64,
  /// JSON schema constraining the structured reply
  pub json_schema: String,
}

impl OracleRequest {
  pub fn new(prompt: impl Into<String>, json_schema: String) -> Self {
    Self {
      prompt: prompt.into(),
      system_prompt: None,
      model: Default::default(),
      timeout_secs: 60,
      json_schema,
    }
  }
}

/// Response from one oracle judgment call.
#[derive(Debug, Clone)]
pub struct OracleResponse {
  /// The text reply (structured JSON when a schema was supplied)
  pub text: String,
  /// Input tokens used
  pub input_tokens: u32,
  /// Output tokens generated
  pub output_tokens: u32,
  /// Duration in milliseconds
  pub duration_ms: u64,
}

/// Create the default oracle provider based on available features.
///
/// Returns the first available provider in priority order:
/// 1. Claude CLI (if `claude` feature is enabled)
///
/// Returns an error if no provider is available.
pub fn create_provider() -> Result<Box<dyn OracleProvider>> {
  #[cfg(feature = "claude")]
  {
    let provider = claude::ClaudeProvider::new();
    if provider.is_available() {
      return Ok(Box::new(provider));
    }
    Err(OracleError::ClaudeNotFound)
  }

  #[cfg(not(feature = "claude"))]
  {
    Err(OracleError::NoProviderAvailable)
  }
}

/// Errors that can occur while calling the oracle.
///
/// Every variant is transient from the engine's point of view: the matcher
/// retries, and on exhaustion marks the unit INCOMPLETE instead of failing
/// the run.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
  #[error("Failed to spawn process: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("oracle call timed out after {0} seconds")]
  Timeout(u64),
  #[error("process exited with non-zero status: {0}")]
  ProcessFailed(i32),
  #[error("Failed to parse oracle response: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("oracle response had unexpected shape: {0}")]
  MalformedResponse(String),
  #[error("No response text from oracle")]
  NoResponse,
  #[error("No oracle provider available. Enable a provider feature (e.g., 'claude').")]
  NoProviderAvailable,
  #[cfg(feature = "claude")]
  #[error("Claude executable not found. Ensure 'claude' is in your PATH.")]
  ClaudeNotFound,
  #[cfg(feature = "claude")]
  #[error("Claude returned an error: {0}")]
  ClaudeError(String),
}
