//! End-to-end lifecycle scenarios against the public API.

use std::{sync::Arc, time::Duration};

use bird_image_cache::{
	Cache, CacheConfig, Error, FallbackPolicy, ImageStore, InMemoryStore, NullStore,
	PreferredProvider, RefreshConfig, Registry, StaticProvider, UpstreamGuard,
};

fn guard() -> Arc<UpstreamGuard> {
	Arc::new(UpstreamGuard::new())
}

#[tokio::test]
async fn cold_read_then_many_cache_hits_issue_one_provider_call() {
	let _ = tracing_subscriber::fmt::try_init();

	let provider = StaticProvider::new("wikimedia").with_image("Parus major", "http://x/p.jpg").await;
	let cache = Cache::new("wikimedia", Arc::new(provider.clone()), Arc::new(InMemoryStore::new()), guard())
		.expect("default config is valid");

	let first = cache.get("Parus major").await.expect("first lookup succeeds");

	for _ in 0..50 {
		let repeat = cache.get("Parus major").await.expect("repeat lookup succeeds");

		assert_eq!(repeat, first);
	}

	assert_eq!(provider.call_count(), 1);
	cache.close().await;
}

#[tokio::test]
async fn cache_degrades_gracefully_with_a_nil_store() {
	let _ = tracing_subscriber::fmt::try_init();

	let provider = StaticProvider::new("wikimedia").with_image("Cygnus olor", "http://x/c.jpg").await;
	let cache = Cache::new("wikimedia", Arc::new(provider), Arc::new(NullStore), guard())
		.expect("default config is valid");

	let descriptor = cache.get("Cygnus olor").await.expect("memory-only lookup still succeeds");

	assert_eq!(descriptor.url, "http://x/c.jpg");
	cache.close().await;
}

#[tokio::test]
async fn empty_scientific_name_is_rejected_without_state_change() {
	let _ = tracing_subscriber::fmt::try_init();

	let store = Arc::new(InMemoryStore::new());
	let cache = Cache::new("wikimedia", Arc::new(StaticProvider::new("wikimedia")), store.clone(), guard())
		.expect("default config is valid");

	assert!(matches!(cache.get("").await, Err(Error::InvalidInput(_))));
	assert_eq!(store.len().await, 0);
	cache.close().await;
}

#[tokio::test]
async fn registry_routes_preferred_then_falls_back_with_attribution() {
	let _ = tracing_subscriber::fmt::try_init();

	let wikimedia_store = Arc::new(InMemoryStore::new());
	let wikimedia = Cache::with_config(
		"wikimedia",
		Arc::new(StaticProvider::new("wikimedia").with_transient_error("Anas platyrhynchos", "timeout").await),
		wikimedia_store.clone(),
		guard(),
		CacheConfig { fallback_policy: FallbackPolicy::All, ..Default::default() },
		RefreshConfig { tick: Duration::from_secs(3600), ..Default::default() },
	)
	.expect("test config is valid");
	let avicommons = Cache::with_config(
		"avicommons",
		Arc::new(StaticProvider::new("avicommons").with_image("Anas platyrhynchos", "http://y/a.jpg").await),
		Arc::new(InMemoryStore::new()),
		guard(),
		CacheConfig::default(),
		RefreshConfig { tick: Duration::from_secs(3600), ..Default::default() },
	)
	.expect("default config is valid");

	let registry =
		Registry::builder().register("wikimedia", Arc::clone(&wikimedia)).register("avicommons", Arc::clone(&avicommons)).build();

	let descriptor = registry.get("wikimedia", "Anas platyrhynchos").await.expect("fallback succeeds");

	assert_eq!(descriptor.source_provider, "avicommons");

	let persisted = wikimedia_store
		.get_image_cache("wikimedia", "Anas platyrhynchos")
		.await
		.unwrap()
		.expect("fallback result persisted under the caller's bucket");

	assert_eq!(persisted.provider_name, "wikimedia");
	assert_eq!(persisted.descriptor.source_provider, "avicommons");

	wikimedia.close().await;
	avicommons.close().await;
}

#[tokio::test]
async fn preferred_provider_delegation_preserves_source_attribution() {
	let _ = tracing_subscriber::fmt::try_init();

	let wikimedia = Cache::with_config(
		"wikimedia",
		Arc::new(StaticProvider::new("wikimedia")),
		Arc::new(InMemoryStore::new()),
		guard(),
		CacheConfig {
			preferred_provider: PreferredProvider::Named("avicommons".into()),
			..Default::default()
		},
		RefreshConfig { tick: Duration::from_secs(3600), ..Default::default() },
	)
	.expect("test config is valid");
	let avicommons_store = Arc::new(InMemoryStore::new());
	let avicommons = Cache::with_config(
		"avicommons",
		Arc::new(StaticProvider::new("avicommons").with_image("Turdus migratorius", "http://a/t.jpg").await),
		avicommons_store.clone(),
		guard(),
		CacheConfig::default(),
		RefreshConfig { tick: Duration::from_secs(3600), ..Default::default() },
	)
	.expect("default config is valid");

	let _registry =
		Registry::builder().register("wikimedia", Arc::clone(&wikimedia)).register("avicommons", Arc::clone(&avicommons)).build();

	let descriptor = wikimedia.get("Turdus migratorius").await.expect("delegated lookup succeeds");

	assert_eq!(descriptor.source_provider, "avicommons");

	let under_preferred =
		avicommons_store.get_image_cache("avicommons", "Turdus migratorius").await.unwrap();

	assert!(under_preferred.is_some(), "delegated result is persisted under the preferred provider's bucket");

	wikimedia.close().await;
	avicommons.close().await;
}
