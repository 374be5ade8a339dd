//! Retry budgeting for guarded provider calls.
//!
//! Up to 3 attempts per call; backoff is `max(2s, 2^attempt s)`. A detected
//! permanent condition (user-agent policy violation) aborts retries immediately.

// crates.io
use tokio::time;
// self
use crate::_prelude::*;

/// Maximum number of attempts (including the first) per guarded call.
pub const MAX_ATTEMPTS: u32 = 3;
/// Floor applied to every computed backoff.
pub const MIN_BACKOFF: Duration = Duration::from_secs(2);

/// Result of budgeting the next attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Another attempt is permitted.
	Granted,
	/// The attempt budget has been exhausted.
	Exhausted,
}

/// Tracks attempts used and computes backoff for a single guarded call.
#[derive(Debug)]
pub struct RetryExecutor {
	attempts_used: u32,
	max_attempts: u32,
	aborted_permanent: bool,
}
impl RetryExecutor {
	/// Construct an executor with the default attempt budget.
	pub fn new() -> Self {
		Self { attempts_used: 0, max_attempts: MAX_ATTEMPTS, aborted_permanent: false }
	}

	/// Whether another attempt may be made.
	pub fn attempt_budget(&self) -> AttemptBudget {
		if self.aborted_permanent || self.attempts_used >= self.max_attempts {
			AttemptBudget::Exhausted
		} else {
			AttemptBudget::Granted
		}
	}

	/// Record that an attempt was made.
	pub fn record_attempt(&mut self) {
		self.attempts_used = self.attempts_used.saturating_add(1);
	}

	/// Signal that the last failure was permanent (e.g. a UA policy violation),
	/// aborting any further retries regardless of remaining attempt budget.
	pub fn abort_permanent(&mut self) {
		self.aborted_permanent = true;
	}

	/// Compute the backoff duration for the attempt just recorded.
	///
	/// `max(2s, 2^attempt s)`, where `attempt` is the 0-indexed attempt number
	/// that just failed.
	pub fn backoff_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(16);
		let exponential = Duration::from_secs(2u64.saturating_pow(exponent));

		exponential.max(MIN_BACKOFF)
	}

	/// Sleep for the computed backoff before the next attempt, honoring a
	/// cancellation signal (e.g. cache shutdown).
	pub async fn sleep_backoff(&self, attempt: u32, cancel: &tokio::sync::Notify) {
		let delay = self.backoff_for(attempt);

		tokio::select! {
			_ = time::sleep(delay) => {},
			_ = cancel.notified() => {
				tracing::debug!("retry backoff cancelled by shutdown signal");
			},
		}
	}
}
impl Default for RetryExecutor {
	fn default() -> Self {
		Self::new()
	}
}
