//! Provider contract and reference implementations.
//!
//! Concrete adapters (a static dataset lookup and an HTTP/JSON remote provider
//! with HTML-attribution parsing) are external collaborators out of scope for
//! this crate; only their interface contract is specified here, plus a minimal
//! in-memory provider used by tests.

// std
use std::collections::HashMap;
// self
use crate::{_prelude::*, model::ImageDescriptor};

/// Whether a provider call originates from a user-facing lookup or the
/// background refresh loop.
///
/// Providers may use this to route through a distinct rate-limiter bucket; the
/// default [`ImageProvider::fetch`] call is always treated as a user call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOrigin {
	/// A caller-initiated lookup.
	User,
	/// A background refresh scan.
	Background,
}

/// Fetch contract implemented by pluggable image providers.
///
/// Providers distinguish [`crate::Error::ImageNotFound`] (canonical "no
/// image"), [`crate::Error::UpstreamUnavailable`] (guard refusal), and
/// transient errors (network/parse, surfaced as [`crate::Error::Transient`]).
#[async_trait]
pub trait ImageProvider: Send + Sync + std::fmt::Debug {
	/// Fetch an image descriptor for `scientific_name`.
	async fn fetch(&self, scientific_name: &str) -> Result<ImageDescriptor> {
		self.fetch_with_origin(scientific_name, CallOrigin::User).await
	}

	/// Context-aware fetch variant allowing the guard to select a background
	/// rate-limiter bucket. The default implementation ignores `origin` and
	/// delegates to a single code path, which is sufficient for providers that
	/// do not distinguish user and background traffic.
	async fn fetch_with_origin(
		&self,
		scientific_name: &str,
		origin: CallOrigin,
	) -> Result<ImageDescriptor>;

	/// Stable identifier for this provider, used to stamp `source_provider`.
	fn name(&self) -> &str;
}

/// A provider backed by a fixed in-memory table, for tests.
///
/// Supports scripting not-found and transient-error responses, plus an
/// artificial delay, in order to exercise single-flight and timeout behavior.
#[derive(Clone, Debug)]
pub struct StaticProvider {
	name: Arc<str>,
	table: Arc<RwLock<HashMap<String, ScriptedOutcome>>>,
	delay: Arc<RwLock<Duration>>,
	call_count: Arc<std::sync::atomic::AtomicUsize>,
}
#[derive(Clone, Debug)]
enum ScriptedOutcome {
	Found(ImageDescriptor),
	NotFound,
	Transient(String),
}
impl StaticProvider {
	/// Construct an empty provider under the given name.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: Arc::from(name.into()),
			table: Arc::new(RwLock::new(HashMap::new())),
			delay: Arc::new(RwLock::new(Duration::ZERO)),
			call_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
		}
	}

	/// Register a successful lookup for `scientific_name`.
	pub async fn with_image(self, scientific_name: impl Into<String>, url: impl Into<String>) -> Self {
		let name = scientific_name.into();
		let descriptor =
			ImageDescriptor::positive(name.clone(), url.into(), "", "", "", "", self.name.to_string());

		self.table.write().await.insert(name, ScriptedOutcome::Found(descriptor));

		self
	}

	/// Register a not-found outcome for `scientific_name`.
	pub async fn with_not_found(self, scientific_name: impl Into<String>) -> Self {
		self.table.write().await.insert(scientific_name.into(), ScriptedOutcome::NotFound);

		self
	}

	/// Register a transient-error outcome for `scientific_name`.
	pub async fn with_transient_error(
		self,
		scientific_name: impl Into<String>,
		message: impl Into<String>,
	) -> Self {
		self.table
			.write()
			.await
			.insert(scientific_name.into(), ScriptedOutcome::Transient(message.into()));

		self
	}

	/// Set an artificial fetch delay, useful to exercise the single-flight
	/// wait/poll path under concurrency.
	pub async fn with_delay(self, delay: Duration) -> Self {
		*self.delay.write().await = delay;

		self
	}

	/// Number of `fetch`/`fetch_with_origin` calls observed so far.
	pub fn call_count(&self) -> usize {
		self.call_count.load(std::sync::atomic::Ordering::SeqCst)
	}
}
#[async_trait]
impl ImageProvider for StaticProvider {
	async fn fetch_with_origin(
		&self,
		scientific_name: &str,
		_origin: CallOrigin,
	) -> Result<ImageDescriptor> {
		self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

		let delay = *self.delay.read().await;

		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let outcome = self.table.read().await.get(scientific_name).cloned();

		match outcome {
			Some(ScriptedOutcome::Found(mut descriptor)) => {
				descriptor.cached_at = Utc::now();

				Ok(descriptor)
			},
			Some(ScriptedOutcome::NotFound) => Err(Error::ImageNotFound),
			Some(ScriptedOutcome::Transient(message)) => Err(Error::Transient(message)),
			None => Err(Error::ImageNotFound),
		}
	}

	fn name(&self) -> &str {
		&self.name
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn static_provider_returns_scripted_outcomes() {
		let provider = StaticProvider::new("mock")
			.with_image("Parus major", "http://x/Parus_major.jpg")
			.await
			.with_not_found("Notfoundicus imaginary")
			.await
			.with_transient_error("Flaky avis", "connection reset")
			.await;

		let found = provider.fetch("Parus major").await.unwrap();

		assert_eq!(found.url, "http://x/Parus_major.jpg");
		assert_eq!(found.source_provider, "mock");

		assert!(matches!(provider.fetch("Notfoundicus imaginary").await, Err(Error::ImageNotFound)));
		assert!(matches!(provider.fetch("Flaky avis").await, Err(Error::Transient(_))));
		assert_eq!(provider.call_count(), 3);
	}

	#[tokio::test]
	async fn static_provider_defaults_unknown_names_to_not_found() {
		let provider = StaticProvider::new("mock");

		assert!(matches!(provider.fetch("Unknown species").await, Err(Error::ImageNotFound)));
	}
}
