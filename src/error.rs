//! Crate-wide error types and `Result` alias.

// self
use crate::guard::breaker::BreakerReason;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the bird image cache crate.
#[allow(missing_docs)]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("Input is invalid: {0}")]
	InvalidInput(String),
	#[error("No image is known for this species")]
	ImageNotFound,
	#[error("Upstream provider unavailable: {reason}")]
	UpstreamUnavailable { reason: BreakerReason, retry_after: Option<std::time::Duration> },
	#[error("Store error: {0}")]
	Store(String),
	#[error("Transient error: {0}")]
	Transient(String),
	#[error("Configuration error for {field}: {reason}")]
	Configuration { field: &'static str, reason: String },
	#[error("Provider '{0}' is not registered")]
	NotRegistered(String),
}
impl Error {
	/// Whether this error kind is eligible for negative caching: only a
	/// canonical "no image" result is, never a transient or configuration failure.
	pub fn is_not_found(&self) -> bool {
		matches!(self, Error::ImageNotFound)
	}
}
