//! Circuit breaker protecting guarded provider calls from upstream misbehavior.
//!
//! States are `Closed` and `Open`; the open window duration depends on the
//! classified failure signal. The HTTP-status → duration mapping is policy,
//! not protocol, so it is exposed as a free function ([`classify_message`])
//! that can be retuned independently of the state machine.

// self
use crate::_prelude::*;

/// Classified reason a guarded call tripped the breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerReason {
	/// HTTP 403 carrying a user-agent/robot policy message.
	UserAgentPolicy,
	/// HTTP 429, or a 403 carrying a rate/limit message.
	RateLimited,
	/// Generic HTTP 403 without a more specific classification.
	Forbidden,
	/// HTTP 503.
	ServiceUnavailable,
}
impl BreakerReason {
	/// Open-window duration for this failure signal.
	pub fn open_duration(self) -> Duration {
		match self {
			BreakerReason::UserAgentPolicy => Duration::from_secs(10 * 60),
			BreakerReason::RateLimited => Duration::from_secs(60),
			BreakerReason::Forbidden => Duration::from_secs(5 * 60),
			BreakerReason::ServiceUnavailable => Duration::from_secs(30),
		}
	}

	/// Whether this signal represents a permanent condition that should abort
	/// retries immediately rather than waiting for the attempt budget to
	/// exhaust.
	pub fn is_permanent(self) -> bool {
		matches!(self, BreakerReason::UserAgentPolicy)
	}
}
impl std::fmt::Display for BreakerReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let text = match self {
			BreakerReason::UserAgentPolicy => "user-agent policy violation",
			BreakerReason::RateLimited => "rate limited",
			BreakerReason::Forbidden => "forbidden",
			BreakerReason::ServiceUnavailable => "service unavailable",
		};

		write!(f, "{text}")
	}
}

/// Classify a provider failure message into a breaker reason, if recognized.
///
/// Adapters report failures as free-text (the concrete HTTP status → message
/// mapping lives in the out-of-scope adapter); this matches on status-code
/// and policy-phrase markers so the classification rule stays testable in
/// isolation from any particular adapter.
pub fn classify_message(message: &str) -> Option<BreakerReason> {
	let lower = message.to_ascii_lowercase();

	if lower.contains("503") || lower.contains("service unavailable") {
		return Some(BreakerReason::ServiceUnavailable);
	}
	if lower.contains("429") {
		return Some(BreakerReason::RateLimited);
	}
	if lower.contains("403") {
		if lower.contains("user-agent") || lower.contains("robot") {
			return Some(BreakerReason::UserAgentPolicy);
		}
		if lower.contains("rate") || lower.contains("limit") {
			return Some(BreakerReason::RateLimited);
		}

		return Some(BreakerReason::Forbidden);
	}

	None
}

#[derive(Clone, Debug)]
enum BreakerState {
	Closed,
	Open { until: Instant, reason: BreakerReason },
}

/// Breaker protecting a single guarded resource (one per provider).
#[derive(Debug)]
pub struct CircuitBreaker {
	state: RwLock<BreakerState>,
}
impl CircuitBreaker {
	/// Construct a closed breaker.
	pub fn new() -> Self {
		Self { state: RwLock::new(BreakerState::Closed) }
	}

	/// Check whether a call may proceed, returning the remaining open reason
	/// when short-circuiting. Transitions `Open → Closed` once the window has
	/// elapsed; there is no half-open probing state.
	pub async fn check(&self) -> std::result::Result<(), (BreakerReason, Duration)> {
		let now = Instant::now();
		let snapshot = { self.state.read().await.clone() };

		match snapshot {
			BreakerState::Closed => Ok(()),
			BreakerState::Open { until, reason } =>
				if now >= until {
					*self.state.write().await = BreakerState::Closed;

					Ok(())
				} else {
					Err((reason, until.saturating_duration_since(now)))
				},
		}
	}

	/// Record a successful call: resets failure bookkeeping and closes the
	/// breaker.
	pub async fn record_success(&self) {
		*self.state.write().await = BreakerState::Closed;
	}

	/// Record a failure. When `reason` is recognized, opens the breaker for
	/// that reason's window; an unrecognized (generic transient) failure does
	/// not itself open the breaker.
	pub async fn record_failure(&self, reason: Option<BreakerReason>) {
		let Some(reason) = reason else { return };
		let until = Instant::now() + reason.open_duration();

		tracing::warn!(?reason, open_for = ?reason.open_duration(), "circuit breaker opened");

		*self.state.write().await = BreakerState::Open { until, reason };
	}

	/// Whether the breaker is presently open.
	pub async fn is_open(&self) -> bool {
		matches!(*self.state.read().await, BreakerState::Open { .. })
	}
}
impl Default for CircuitBreaker {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_known_signals() {
		assert_eq!(
			classify_message("403 Forbidden: user-agent not permitted"),
			Some(BreakerReason::UserAgentPolicy)
		);
		assert_eq!(
			classify_message("403 Forbidden: rate limit exceeded"),
			Some(BreakerReason::RateLimited)
		);
		assert_eq!(classify_message("403 Forbidden"), Some(BreakerReason::Forbidden));
		assert_eq!(classify_message("429 Too Many Requests"), Some(BreakerReason::RateLimited));
		assert_eq!(
			classify_message("503 Service Unavailable"),
			Some(BreakerReason::ServiceUnavailable)
		);
		assert_eq!(classify_message("connection reset by peer"), None);
	}

	#[tokio::test]
	async fn opens_and_closes_after_window() {
		let breaker = CircuitBreaker::new();

		assert!(breaker.check().await.is_ok());

		breaker.record_failure(Some(BreakerReason::ServiceUnavailable)).await;

		assert!(breaker.is_open().await);
		assert!(breaker.check().await.is_err());
	}

	#[tokio::test]
	async fn success_resets_an_open_breaker() {
		let breaker = CircuitBreaker::new();

		breaker.record_failure(Some(BreakerReason::RateLimited)).await;
		breaker.record_success().await;

		assert!(!breaker.is_open().await);
		assert!(breaker.check().await.is_ok());
	}

	#[tokio::test]
	async fn unrecognized_failure_does_not_open_breaker() {
		let breaker = CircuitBreaker::new();

		breaker.record_failure(None).await;

		assert!(!breaker.is_open().await);
	}
}
