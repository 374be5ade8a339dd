//! Persistence port consumed by the cache engine.
//!
//! The durable store itself is an external collaborator out of scope for this
//! crate; this module defines only the trait contract plus two reference
//! implementations used in tests and as a graceful no-op default.

// std
use std::collections::HashMap;
// self
use crate::{_prelude::*, model::CacheEntry};

/// Persistence operations required of a durable store.
///
/// A `None` store (see [`NullStore`]) is a valid configuration: the cache
/// degrades to memory-only operation with no persistence and no refresh scan.
#[async_trait]
pub trait ImageStore: Send + Sync + std::fmt::Debug {
	/// Fetch a single row by its primary key.
	async fn get_image_cache(
		&self,
		provider_name: &str,
		scientific_name: &str,
	) -> Result<Option<CacheEntry>>;

	/// Fetch every row stored under `provider_name`.
	async fn get_all_image_caches(&self, provider_name: &str) -> Result<Vec<CacheEntry>>;

	/// Fetch a batch of rows, returning only the ones that were found.
	async fn get_image_cache_batch(
		&self,
		provider_name: &str,
		scientific_names: &[String],
	) -> Result<HashMap<String, CacheEntry>> {
		let mut found = HashMap::with_capacity(scientific_names.len());

		for name in scientific_names {
			if let Some(entry) = self.get_image_cache(provider_name, name).await? {
				found.insert(name.clone(), entry);
			}
		}

		Ok(found)
	}

	/// Upsert a row by its primary key `(provider_name, scientific_name)`.
	async fn save_image_cache(&self, entry: CacheEntry) -> Result<()>;
}

/// A store that persists nothing; the cache degrades to memory-only operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;
#[async_trait]
impl ImageStore for NullStore {
	async fn get_image_cache(&self, _: &str, _: &str) -> Result<Option<CacheEntry>> {
		Ok(None)
	}

	async fn get_all_image_caches(&self, _: &str) -> Result<Vec<CacheEntry>> {
		Ok(Vec::new())
	}

	async fn save_image_cache(&self, entry: CacheEntry) -> Result<()> {
		entry.validate()?;

		Ok(())
	}
}

/// In-memory store used by tests and as a reference implementation.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
	rows: Arc<RwLock<HashMap<(String, String), CacheEntry>>>,
}
impl InMemoryStore {
	/// Construct an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a row directly, bypassing validation. Useful for pre-loading tests.
	pub async fn seed(&self, entry: CacheEntry) {
		let key = (entry.provider_name.clone(), entry.descriptor.scientific_name.clone());

		self.rows.write().await.insert(key, entry);
	}

	/// Number of rows currently stored.
	pub async fn len(&self) -> usize {
		self.rows.read().await.len()
	}
}
#[async_trait]
impl ImageStore for InMemoryStore {
	async fn get_image_cache(
		&self,
		provider_name: &str,
		scientific_name: &str,
	) -> Result<Option<CacheEntry>> {
		let key = (provider_name.to_string(), scientific_name.to_string());

		Ok(self.rows.read().await.get(&key).cloned())
	}

	async fn get_all_image_caches(&self, provider_name: &str) -> Result<Vec<CacheEntry>> {
		let rows = self.rows.read().await;

		Ok(rows.values().filter(|entry| entry.provider_name == provider_name).cloned().collect())
	}

	async fn save_image_cache(&self, entry: CacheEntry) -> Result<()> {
		entry.validate()?;

		let key = (entry.provider_name.clone(), entry.descriptor.scientific_name.clone());

		self.rows.write().await.insert(key, entry);

		Ok(())
	}
}
