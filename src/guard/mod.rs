//! Upstream guard: rate limiter + circuit breaker composition wrapping calls
//! that cross the trust/cost boundary into a remote provider.

pub mod breaker;
pub mod limiter;
pub mod retry;

// self
use crate::{
	_prelude::*,
	guard::{
		breaker::{BreakerReason, CircuitBreaker, classify_message},
		limiter::RateGuard,
		retry::{AttemptBudget, RetryExecutor},
	},
	provider::CallOrigin,
};

/// Composition of a rate limiter and circuit breaker protecting calls to one
/// provider, with retry budgeting per call.
#[derive(Debug)]
pub struct UpstreamGuard {
	limiter: RateGuard,
	breaker: CircuitBreaker,
	shutdown: tokio::sync::Notify,
}
impl UpstreamGuard {
	/// Construct a guard with the default rate limiter (single bucket).
	pub fn new() -> Self {
		Self { limiter: RateGuard::new(), breaker: CircuitBreaker::new(), shutdown: Notify::new() }
	}

	/// Construct a guard with a distinct background rate-limiter bucket.
	pub fn with_background_bucket() -> Self {
		Self {
			limiter: RateGuard::with_background_bucket(),
			breaker: CircuitBreaker::new(),
			shutdown: Notify::new(),
		}
	}

	/// Signal any in-flight waits to cancel, e.g. on cache shutdown.
	pub fn shutdown(&self) {
		self.shutdown.notify_waiters();
	}

	/// Run `call` under rate limiting, circuit breaking, and retry budgeting.
	///
	/// `call` is invoked once per attempt. Transient failures are retried up
	/// to [`retry::MAX_ATTEMPTS`] times with `max(2s, 2^attempt s)` backoff; a
	/// classified permanent condition (user-agent policy violation) aborts
	/// retries immediately. Any classified failure opens the breaker for its
	/// reason-specific window; a success resets it.
	pub async fn call<F, Fut, T>(&self, origin: CallOrigin, mut call: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = Result<T>>,
	{
		let mut executor = RetryExecutor::new();
		let mut attempt = 0u32;

		loop {
			if executor.attempt_budget() != AttemptBudget::Granted {
				break;
			}

			if let Err((reason, retry_after)) = self.breaker.check().await {
				return Err(Error::UpstreamUnavailable { reason, retry_after: Some(retry_after) });
			}

			self.limiter.acquire(origin, &self.shutdown).await?;

			executor.record_attempt();

			match call().await {
				Ok(value) => {
					self.breaker.record_success().await;

					return Ok(value);
				},
				Err(err) => {
					let reason = classify_from_error(&err);

					self.breaker.record_failure(reason).await;

					// Only a recognized breaker-reason signal is treated as
					// retryable; a plain transient error (no classifiable
					// status, e.g. a connection reset) propagates immediately
					// rather than spending the whole attempt budget on one
					// `Cache::get` call.
					let Some(reason) = reason else {
						return Err(err);
					};

					if reason.is_permanent() {
						executor.abort_permanent();

						return Err(Error::UpstreamUnavailable {
							reason,
							retry_after: Some(reason.open_duration()),
						});
					}

					if executor.attempt_budget() != AttemptBudget::Granted {
						return Err(err);
					}

					executor.sleep_backoff(attempt, &self.shutdown).await;
					attempt += 1;
				},
			}
		}

		Err(Error::Transient("retry attempts exhausted".into()))
	}
}
impl Default for UpstreamGuard {
	fn default() -> Self {
		Self::new()
	}
}

fn classify_from_error(err: &Error) -> Option<BreakerReason> {
	match err {
		Error::Transient(message) => classify_message(message),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn successful_call_passes_through() {
		let guard = UpstreamGuard::new();

		let result = guard.call(CallOrigin::User, || async { Ok::<_, Error>(42) }).await;

		assert_eq!(result.unwrap(), 42);
	}

	#[tokio::test]
	async fn permanent_failure_aborts_without_exhausting_retries() {
		let guard = UpstreamGuard::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();

		let result = guard
			.call(CallOrigin::User, move || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Err::<(), Error>(Error::Transient("403 user-agent not permitted".into())) }
			})
			.await;

		assert!(matches!(
			result,
			Err(Error::UpstreamUnavailable { reason: BreakerReason::UserAgentPolicy, .. })
		));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn open_breaker_short_circuits_subsequent_calls() {
		let guard = UpstreamGuard::new();

		let _ = guard
			.call(CallOrigin::User, || async {
				Err::<(), Error>(Error::Transient("503 service unavailable".into()))
			})
			.await;

		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let result = guard
			.call(CallOrigin::User, move || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Ok::<_, Error>(()) }
			})
			.await;

		assert!(matches!(result, Err(Error::UpstreamUnavailable { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 0, "breaker must short-circuit without calling");
	}

	#[tokio::test]
	async fn unclassified_transient_failure_is_not_retried() {
		let guard = UpstreamGuard::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();

		let result = guard
			.call(CallOrigin::User, move || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Err::<(), Error>(Error::Transient("connection reset by peer".into())) }
			})
			.await;

		assert!(matches!(result, Err(Error::Transient(_))));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn classified_non_permanent_failure_retries_up_to_the_attempt_budget() {
		let guard = UpstreamGuard::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();

		let result = guard
			.call(CallOrigin::User, move || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Err::<(), Error>(Error::Transient("429 too many requests".into())) }
			})
			.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1, "the breaker opens after the first classified failure");
	}
}
