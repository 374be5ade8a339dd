//! Token-bucket rate limiting for calls to a single remote provider.
//!
//! One bucket (1 req/s, burst 1) covers every call, user and background, to a
//! given provider; an optional distinct bucket may additionally throttle
//! background calls. Waits are cancellable against a shutdown signal.

// crates.io
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
// self
use crate::{_prelude::*, provider::CallOrigin};

const RATE_PER_SECOND: u32 = 1;
const BURST: u32 = 1;

fn default_quota() -> Quota {
	let per_second = std::num::NonZeroU32::new(RATE_PER_SECOND).expect("non-zero rate");
	let burst = std::num::NonZeroU32::new(BURST).expect("non-zero burst");

	Quota::per_second(per_second).allow_burst(burst)
}

/// Token-bucket guard for a single provider's outbound calls.
#[derive(Debug)]
pub struct RateGuard {
	global: DefaultDirectRateLimiter,
	background: Option<DefaultDirectRateLimiter>,
}
impl RateGuard {
	/// Construct a guard with the default: a single shared 1 req/s bucket.
	pub fn new() -> Self {
		Self { global: RateLimiter::direct(default_quota()), background: None }
	}

	/// Construct a guard with an additional, distinct bucket applied only to
	/// background calls (on top of the global bucket).
	pub fn with_background_bucket() -> Self {
		Self {
			global: RateLimiter::direct(default_quota()),
			background: Some(RateLimiter::direct(default_quota())),
		}
	}

	/// Wait until a call is permitted, or return early if `cancel` fires first.
	pub async fn acquire(&self, origin: CallOrigin, cancel: &tokio::sync::Notify) -> Result<()> {
		wait_for(&self.global, cancel).await?;

		if origin == CallOrigin::Background
			&& let Some(background) = &self.background
		{
			wait_for(background, cancel).await?;
		}

		Ok(())
	}
}
impl Default for RateGuard {
	fn default() -> Self {
		Self::new()
	}
}

async fn wait_for(limiter: &DefaultDirectRateLimiter, cancel: &tokio::sync::Notify) -> Result<()> {
	loop {
		match limiter.check() {
			Ok(()) => return Ok(()),
			Err(not_until) => {
				let wait = not_until.wait_time_from(limiter.clock().now());

				tokio::select! {
					_ = tokio::time::sleep(wait) => continue,
					_ = cancel.notified() => {
						return Err(Error::Transient("rate limiter wait cancelled by shutdown".into()));
					},
				}
			},
		}
	}
}
