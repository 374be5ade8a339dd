//! Named cache registry with preferred-provider fallback routing.
//!
//! Maps `provider_name → Cache`, with a weak-backreference pattern that lets a
//! [`crate::cache::Cache`] look up its siblings without an ownership cycle.

// std
use std::collections::HashMap;
// self
use crate::{_prelude::*, cache::Cache, model::ImageDescriptor};

/// Which provider a cache should try first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferredProvider {
	/// Use the cache's own provider; no delegation.
	#[default]
	Auto,
	/// Delegate to the named provider's cache first.
	Named(String),
}
impl PreferredProvider {
	/// Parse the `image_provider` configuration value (`"auto"` is
	/// case-insensitive; anything else names a provider).
	pub fn parse(value: &str) -> Self {
		if value.eq_ignore_ascii_case("auto") {
			PreferredProvider::Auto
		} else {
			PreferredProvider::Named(value.to_string())
		}
	}
}

/// Whether to consult other registered caches after the preferred/own
/// provider fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPolicy {
	/// Return the failure; never consult other caches.
	#[default]
	None,
	/// Try every other registered cache, in a stable snapshot order.
	All,
}

/// Maps provider name to its [`Cache`] instance.
#[derive(Debug, Default)]
pub struct Registry {
	caches: RwLock<HashMap<String, Arc<Cache>>>,
}
impl Registry {
	/// Start building a registry.
	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::default()
	}

	/// Look up a registered cache by provider name.
	pub async fn cache(&self, provider_name: &str) -> Option<Arc<Cache>> {
		self.caches.read().await.get(provider_name).cloned()
	}

	/// Look up an image through the named provider's cache.
	pub async fn get(&self, provider_name: &str, scientific_name: &str) -> Result<ImageDescriptor> {
		let cache = self
			.cache(provider_name)
			.await
			.ok_or_else(|| Error::NotRegistered(provider_name.to_string()))?;

		cache.get(scientific_name).await
	}

	/// A stable snapshot of every registered cache except `exclude`, taken at
	/// call time. Iteration order is unspecified but must stay stable within a
	/// single lookup, so no provider is tried twice.
	pub(crate) async fn snapshot_other_caches(&self, exclude: &str) -> Vec<(String, Arc<Cache>)> {
		self.caches
			.read()
			.await
			.iter()
			.filter(|(name, _)| name.as_str() != exclude)
			.map(|(name, cache)| (name.clone(), Arc::clone(cache)))
			.collect()
	}

	/// Close every registered cache.
	pub async fn close_all(&self) {
		let caches: Vec<_> = self.caches.read().await.values().cloned().collect();

		for cache in caches {
			cache.close().await;
		}
	}
}

/// Builds a [`Registry`], wiring each cache's weak back-reference once the
/// registry itself is known.
#[derive(Default)]
pub struct RegistryBuilder {
	caches: HashMap<String, Arc<Cache>>,
}
impl RegistryBuilder {
	/// Register a cache under `provider_name`.
	pub fn register(mut self, provider_name: impl Into<String>, cache: Arc<Cache>) -> Self {
		self.caches.insert(provider_name.into(), cache);

		self
	}

	/// Finish building the registry, attaching the weak back-reference to
	/// every registered cache.
	pub fn build(self) -> Arc<Registry> {
		let registry = Arc::new(Registry { caches: RwLock::new(self.caches.clone()) });
		let weak = Arc::downgrade(&registry);

		for cache in self.caches.values() {
			cache.attach_registry(weak.clone());
		}

		registry
	}
}
