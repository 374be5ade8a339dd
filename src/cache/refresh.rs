//! Background refresh loop.
//!
//! A persistent ticker runs a recurring staleness scan per provider, rather
//! than a single refresh per call.

// self
use crate::{_prelude::*, cache::manager::Cache, provider::CallOrigin};

/// Tick cadence, batch size, and inter-entry pacing for a cache's refresh loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshConfig {
	/// How often to scan the store for stale entries.
	pub tick: Duration,
	/// Maximum number of stale entries refreshed per tick.
	pub batch_size: usize,
	/// Delay between consecutive provider calls within a batch, to avoid bursts.
	pub pacing: Duration,
}
impl Default for RefreshConfig {
	fn default() -> Self {
		Self { tick: Duration::from_secs(1), batch_size: 10, pacing: Duration::from_millis(100) }
	}
}

pub(crate) async fn run(cache: Arc<Cache>, config: RefreshConfig) {
	let mut ticker = tokio::time::interval(config.tick);

	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {},
			_ = cache.shutdown_signal().notified() => {},
		}

		if cache.is_closed() {
			tracing::debug!(provider = cache.provider_name(), "refresh loop shutting down");

			return;
		}

		if let Err(err) = refresh_once(&cache, &config).await {
			tracing::warn!(error = %err, provider = cache.provider_name(), "refresh scan failed");
		}
	}
}

async fn refresh_once(cache: &Arc<Cache>, config: &RefreshConfig) -> Result<()> {
	let entries = cache.store.get_all_image_caches(cache.provider_name()).await?;
	let now = Utc::now();

	let stale =
		entries.into_iter().filter(|entry| entry.descriptor.is_stale(now)).take(config.batch_size);

	#[cfg(feature = "metrics")]
	let mut tally = crate::metrics::RefreshTally::default();

	for entry in stale {
		if cache.is_closed() {
			break;
		}

		let name = entry.descriptor.scientific_name.clone();

		let Some(_ticket) = cache.try_claim_for_background_refresh(&name).await else {
			tracing::trace!(
				provider = cache.provider_name(),
				name,
				"skipping refresh; name is already initializing"
			);
			#[cfg(feature = "metrics")]
			{
				tally.skipped += 1;
			}

			continue;
		};

		match cache.fetch_direct(&name, CallOrigin::Background).await {
			Ok(descriptor) => {
				cache.persist(&name, descriptor).await;
				#[cfg(feature = "metrics")]
				{
					tally.refreshed += 1;
				}
			},
			Err(err) => {
				tracing::debug!(
					error = %err,
					provider = cache.provider_name(),
					name,
					"background refresh fetch failed; stale entry retained"
				);
				#[cfg(feature = "metrics")]
				{
					tally.failed += 1;
				}
			},
		}

		tokio::time::sleep(config.pacing).await;
	}

	#[cfg(feature = "metrics")]
	tally.record(cache.provider_name());

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{provider::StaticProvider, store::InMemoryStore, store::ImageStore};

	#[tokio::test]
	async fn refresh_overwrites_stale_entry() {
		let store = Arc::new(InMemoryStore::new());
		let stale_entry = crate::model::ImageDescriptor {
			cached_at: Utc::now() - TimeDelta::days(15),
			..crate::model::ImageDescriptor::positive(
				"Turdus merula",
				"http://old",
				"",
				"",
				"",
				"",
				"wikimedia",
			)
		}
		.into_entry("wikimedia");

		store.save_image_cache(stale_entry).await.unwrap();

		let provider = StaticProvider::new("wikimedia")
			.with_image("Turdus merula", "http://new/Turdus_merula.jpg")
			.await;
		let cache = Cache::with_config(
			"wikimedia",
			Arc::new(provider),
			store.clone(),
			Arc::new(crate::guard::UpstreamGuard::new()),
			crate::cache::manager::CacheConfig::default(),
			RefreshConfig { tick: Duration::from_millis(50), batch_size: 10, pacing: Duration::from_millis(10) },
		)
		.unwrap();

		let mut refreshed = false;

		for _ in 0..20 {
			tokio::time::sleep(Duration::from_millis(50)).await;

			let entry = store.get_image_cache("wikimedia", "Turdus merula").await.unwrap().unwrap();

			if entry.descriptor.url == "http://new/Turdus_merula.jpg" {
				refreshed = true;

				break;
			}
		}

		assert!(refreshed, "refresh loop did not overwrite the stale entry in time");
		cache.close().await;
	}
}
