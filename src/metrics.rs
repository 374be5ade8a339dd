//! Optional instrumentation, gated behind the `metrics` feature (with an
//! additional `prometheus` feature to install an exporter): free functions
//! wrapping the `metrics` facade crate, one per observable event.

// crates.io
use smallvec::SmallVec;

/// Record an in-memory cache hit for `provider_name`.
pub fn record_cache_hit(provider_name: &str) {
	metrics::counter!("bird_image_cache_hits_total", "provider" => provider_name.to_string())
		.increment(1);
}

/// Record a memory miss that had to consult the store or provider.
pub fn record_cache_miss(provider_name: &str) {
	metrics::counter!("bird_image_cache_misses_total", "provider" => provider_name.to_string())
		.increment(1);
}

/// Tally of one refresh tick's outcomes for a provider, recorded together so
/// the provider label is only computed once per tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefreshTally {
	/// Entries successfully refreshed.
	pub refreshed: u64,
	/// Entries whose refresh fetch failed; the stale entry was retained.
	pub failed: u64,
	/// Entries skipped because a user lookup was already initializing them.
	pub skipped: u64,
}
impl RefreshTally {
	/// Record every non-zero counter in this tally under `provider_name`.
	pub fn record(self, provider_name: &str) {
		let counters: SmallVec<[(&'static str, u64); 3]> = smallvec::smallvec![
			("bird_image_cache_refresh_success_total", self.refreshed),
			("bird_image_cache_refresh_error_total", self.failed),
			("bird_image_cache_refresh_skipped_total", self.skipped),
		];

		for (name, value) in counters {
			if value > 0 {
				metrics::counter!(name, "provider" => provider_name.to_string()).increment(value);
			}
		}
	}
}

/// Install a Prometheus exporter on the default global recorder.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter()
-> std::result::Result<(), metrics_exporter_prometheus::BuildError> {
	metrics_exporter_prometheus::PrometheusBuilder::new().install()
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str, provider: &str) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				let matches = key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& key.key().labels().any(|label| label.key() == "provider" && label.value() == provider);

				matches.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	#[test]
	fn records_hits_and_misses_per_provider() {
		let snapshot = capture_metrics(|| {
			record_cache_hit("wikimedia");
			record_cache_hit("wikimedia");
			record_cache_miss("wikimedia");
		});

		assert_eq!(counter_value(&snapshot, "bird_image_cache_hits_total", "wikimedia"), 2);
		assert_eq!(counter_value(&snapshot, "bird_image_cache_misses_total", "wikimedia"), 1);
	}

	#[test]
	fn refresh_tally_only_records_non_zero_counters() {
		let snapshot = capture_metrics(|| {
			let tally = RefreshTally { refreshed: 3, failed: 0, skipped: 1 };

			tally.record("avicommons");
		});

		assert_eq!(counter_value(&snapshot, "bird_image_cache_refresh_success_total", "avicommons"), 3);
		assert_eq!(counter_value(&snapshot, "bird_image_cache_refresh_error_total", "avicommons"), 0);
		assert_eq!(counter_value(&snapshot, "bird_image_cache_refresh_skipped_total", "avicommons"), 1);
	}
}
