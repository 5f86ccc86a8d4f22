//! Oracle provider trait.
//!
//! Different oracle backends implement this trait; the matcher only ever
//! sees `Box<dyn OracleProvider>`, so tests can inject a scripted oracle.

use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::{OracleError, OracleRequest, OracleResponse};

/// Result type for oracle operations
pub type Result<T> = std::result::Result<T, OracleError>;

/// Trait for semantic-judgment oracle backends.
///
/// # Example
///
/// ```ignore
/// use oracle::{OracleProvider, OracleRequest, OracleResponse, Result};
///
/// struct MyOracle;
///
/// #[async_trait::async_trait]
/// impl OracleProvider for MyOracle {
///     fn name(&self) -> &str {
///         "my-oracle"
///     }
///
///     fn is_available(&self) -> bool {
///         true
///     }
///
///     async fn judge(&self, request: OracleRequest) -> Result<OracleResponse> {
///         // Implement the judgment call
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait OracleProvider: Send + Sync + DynClone {
  /// The name of this provider (for logging/identification)
  fn name(&self) -> &str;

  /// Check if this provider is available/configured
  ///
  /// Returns `true` if the provider can be used for judgment calls.
  /// This might check for API keys, CLI availability, etc.
  fn is_available(&self) -> bool;

  /// Perform one judgment call with the given request
  async fn judge(&self, request: OracleRequest) -> Result<OracleResponse>;
}

dyn_clone::clone_trait_object!(OracleProvider);
