//! Cache engine: single-flight, two-tier reads, write-through.

// std
use std::collections::HashMap;
// self
use crate::{
	_prelude::*,
	cache::{entry::CacheSlot, refresh::RefreshConfig},
	guard::UpstreamGuard,
	model::ImageDescriptor,
	provider::{CallOrigin, ImageProvider},
	registry::{FallbackPolicy, PreferredProvider, Registry},
	store::ImageStore,
};

/// Deadline and retry knobs governing [`Cache::get`]'s wait/poll discipline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
	/// Hard per-lookup budget.
	pub lookup_deadline: Duration,
	/// Poll interval while waiting on another initializer.
	pub poll_interval: Duration,
	/// Number of polls before giving up on waiting.
	pub max_poll_retries: u32,
	/// Minimum budget granted for a final direct attempt.
	pub min_final_attempt: Duration,
	/// Preferred provider for registry-aware routing.
	pub preferred_provider: PreferredProvider,
	/// Fallback behavior after the preferred/own provider fails.
	pub fallback_policy: FallbackPolicy,
	/// Verbose logging switch. Does not change resolution semantics; widens
	/// the `tracing` events emitted around routing decisions.
	#[serde(default)]
	pub debug: bool,
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			lookup_deadline: Duration::from_secs(2),
			poll_interval: Duration::from_millis(300),
			max_poll_retries: 3,
			min_final_attempt: Duration::from_millis(100),
			preferred_provider: PreferredProvider::Auto,
			fallback_policy: FallbackPolicy::None,
			debug: false,
		}
	}
}
impl CacheConfig {
	/// Validate the deadline/poll knobs against the constraints this engine
	/// relies on. Construction aborts with [`Error::Configuration`] when a
	/// knob is nonsensical, rather than surfacing confusing behavior later
	/// (a zero poll interval busy-looping, a poll interval longer than the
	/// deadline never getting a chance to poll, and so on).
	pub fn validate(&self) -> Result<()> {
		if self.lookup_deadline.is_zero() {
			return Err(Error::Configuration {
				field: "lookup_deadline",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.poll_interval.is_zero() {
			return Err(Error::Configuration {
				field: "poll_interval",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.poll_interval > self.lookup_deadline {
			return Err(Error::Configuration {
				field: "poll_interval",
				reason: "Must not exceed lookup_deadline.".into(),
			});
		}
		if self.max_poll_retries == 0 {
			return Err(Error::Configuration {
				field: "max_poll_retries",
				reason: "Must allow at least one poll.".into(),
			});
		}
		if self.min_final_attempt.is_zero() {
			return Err(Error::Configuration {
				field: "min_final_attempt",
				reason: "Must be greater than zero.".into(),
			});
		}
		if let PreferredProvider::Named(name) = &self.preferred_provider
			&& name.is_empty()
		{
			return Err(Error::Configuration {
				field: "preferred_provider",
				reason: "Named provider must not be empty.".into(),
			});
		}

		Ok(())
	}
}

/// A named cache of image descriptors for one provider bucket.
///
/// Starts its background refresh loop immediately on construction; callers
/// must invoke [`Cache::close`] to stop it and release provider resources.
#[derive(Debug)]
pub struct Cache {
	pub(crate) provider_name: String,
	pub(crate) provider: Arc<dyn ImageProvider>,
	pub(crate) store: Arc<dyn ImageStore>,
	guard: Arc<UpstreamGuard>,
	config: CacheConfig,
	memory: RwLock<HashMap<String, CacheSlot>>,
	tickets: RwLock<HashMap<String, Arc<Mutex<()>>>>,
	registry: std::sync::OnceLock<std::sync::Weak<Registry>>,
	shutdown: Notify,
	closed: std::sync::atomic::AtomicBool,
	refresh_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}
impl Cache {
	/// Construct a cache with default deadline/refresh configuration.
	///
	/// Aborts with [`Error::Configuration`] if the default configuration
	/// somehow fails validation; present for symmetry with
	/// [`Cache::with_config`] and to keep both constructors fallible.
	pub fn new(
		provider_name: impl Into<String>,
		provider: Arc<dyn ImageProvider>,
		store: Arc<dyn ImageStore>,
		guard: Arc<UpstreamGuard>,
	) -> Result<Arc<Self>> {
		Self::with_config(provider_name, provider, store, guard, CacheConfig::default(), RefreshConfig::default())
	}

	/// Construct a cache with explicit deadline and refresh configuration.
	///
	/// Validates `config` first and aborts construction with
	/// [`Error::Configuration`] rather than spawning a refresh loop against
	/// knobs that would misbehave.
	pub fn with_config(
		provider_name: impl Into<String>,
		provider: Arc<dyn ImageProvider>,
		store: Arc<dyn ImageStore>,
		guard: Arc<UpstreamGuard>,
		config: CacheConfig,
		refresh_config: RefreshConfig,
	) -> Result<Arc<Self>> {
		config.validate()?;

		let cache = Arc::new(Self {
			provider_name: provider_name.into(),
			provider,
			store,
			guard,
			config,
			memory: RwLock::new(HashMap::new()),
			tickets: RwLock::new(HashMap::new()),
			registry: std::sync::OnceLock::new(),
			shutdown: Notify::new(),
			closed: std::sync::atomic::AtomicBool::new(false),
			refresh_handle: std::sync::Mutex::new(None),
		});

		let handle =
			tokio::spawn(crate::cache::refresh::run(Arc::clone(&cache), refresh_config));

		*cache.refresh_handle.lock().expect("refresh handle mutex poisoned") = Some(handle);

		Ok(cache)
	}

	/// This cache's provider name (its bucket in the store).
	pub fn provider_name(&self) -> &str {
		&self.provider_name
	}

	/// Fetch a descriptor for `scientific_name`, per the engine's resolution order.
	#[tracing::instrument(skip(self), fields(provider = %self.provider_name))]
	pub async fn get(&self, scientific_name: &str) -> Result<ImageDescriptor> {
		if scientific_name.is_empty() {
			return Err(Error::InvalidInput("scientific_name must not be empty".into()));
		}

		if let Some(descriptor) = self.fresh_from_memory(scientific_name).await {
			tracing::trace!(provider = %self.provider_name, name = scientific_name, "cache hit");
			#[cfg(feature = "metrics")]
			crate::metrics::record_cache_hit(&self.provider_name);

			return Self::as_result(descriptor);
		}

		#[cfg(feature = "metrics")]
		crate::metrics::record_cache_miss(&self.provider_name);

		let deadline = Instant::now() + self.config.lookup_deadline;
		let ticket = self.ticket_for(scientific_name).await;

		match Arc::clone(&ticket).try_lock_owned() {
			Ok(guard) => self.initialize(scientific_name, guard).await,
			Err(_) => self.wait_then_initialize(scientific_name, ticket, deadline).await,
		}
	}

	/// Best-effort batch lookup: memory-first, then per-miss `get`. Missing or
	/// failed names are simply absent from the result.
	#[tracing::instrument(skip(self, scientific_names), fields(provider = %self.provider_name, count = scientific_names.len()))]
	pub async fn get_batch(
		&self,
		scientific_names: &[String],
	) -> HashMap<String, ImageDescriptor> {
		let mut found = HashMap::with_capacity(scientific_names.len());

		for name in scientific_names {
			match self.get(name).await {
				Ok(descriptor) => {
					found.insert(name.clone(), descriptor);
				},
				Err(_) => continue,
			}
		}

		found
	}

	/// Idempotent shutdown: stops the refresh loop, cancels any in-flight
	/// guard waits (rate-limiter backoff, retry backoff), and releases the
	/// refresh task.
	#[tracing::instrument(skip(self), fields(provider = %self.provider_name))]
	pub async fn close(&self) {
		self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
		self.shutdown.notify_waiters();
		self.guard.shutdown();

		let handle = self.refresh_handle.lock().expect("refresh handle mutex poisoned").take();

		if let Some(handle) = handle {
			let _ = handle.await;
		}
	}

	pub(crate) fn attach_registry(&self, registry: std::sync::Weak<Registry>) {
		let _ = self.registry.set(registry);
	}

	pub(crate) fn shutdown_signal(&self) -> &Notify {
		&self.shutdown
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(std::sync::atomic::Ordering::SeqCst)
	}

	/// Try to claim `name` for a background refresh pass; returns `None` if a
	/// user lookup is already initializing it, so the refresh cycle skips it
	/// rather than contending with the user-facing path.
	pub(crate) async fn try_claim_for_background_refresh(
		&self,
		name: &str,
	) -> Option<tokio::sync::OwnedMutexGuard<()>> {
		let ticket = self.ticket_for(name).await;

		Arc::clone(&ticket).try_lock_owned().ok()
	}

	fn registry(&self) -> Option<Arc<Registry>> {
		self.registry.get().and_then(std::sync::Weak::upgrade)
	}

	fn as_result(descriptor: ImageDescriptor) -> Result<ImageDescriptor> {
		if descriptor.is_negative() { Err(Error::ImageNotFound) } else { Ok(descriptor) }
	}

	async fn fresh_from_memory(&self, name: &str) -> Option<ImageDescriptor> {
		self.memory.read().await.get(name).and_then(|slot| slot.fresh(Utc::now())).cloned()
	}

	async fn hydrate_memory(&self, name: &str, descriptor: ImageDescriptor) {
		self.memory.write().await.entry(name.to_string()).or_insert_with(CacheSlot::empty).set(descriptor);
	}

	async fn ticket_for(&self, name: &str) -> Arc<Mutex<()>> {
		if let Some(ticket) = self.tickets.read().await.get(name) {
			return Arc::clone(ticket);
		}

		Arc::clone(
			self.tickets.write().await.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))),
		)
	}

	/// Poll memory while another caller initializes `name`; after the poll
	/// budget is spent, try to become the initializer ourselves with whatever
	/// budget remains, falling back to an uncached direct fetch if even that
	/// is exhausted (the deadline discipline's explicit escape hatch).
	async fn wait_then_initialize(
		&self,
		name: &str,
		ticket: Arc<Mutex<()>>,
		deadline: Instant,
	) -> Result<ImageDescriptor> {
		for _ in 0..self.config.max_poll_retries {
			let remaining = deadline.saturating_duration_since(Instant::now());

			if remaining.is_zero() {
				break;
			}

			tokio::time::sleep(self.config.poll_interval.min(remaining)).await;

			if let Some(descriptor) = self.fresh_from_memory(name).await {
				return Self::as_result(descriptor);
			}
		}

		let remaining =
			deadline.saturating_duration_since(Instant::now()).max(self.config.min_final_attempt);

		match tokio::time::timeout(remaining, Arc::clone(&ticket).lock_owned()).await {
			Ok(guard) => self.initialize(name, guard).await,
			Err(_) => {
				tracing::debug!(
					provider = %self.provider_name,
					name,
					"lookup deadline exceeded waiting for initializer; issuing uncached direct fetch"
				);

				self.fetch_direct(name, CallOrigin::User).await
			},
		}
	}

	/// Sole initializer path: steps 4-7 of the resolution order. The mutex
	/// guard is held for the method's duration and released on return.
	async fn initialize(
		&self,
		name: &str,
		_ticket: tokio::sync::OwnedMutexGuard<()>,
	) -> Result<ImageDescriptor> {
		match self.store.get_image_cache(&self.provider_name, name).await {
			Ok(Some(entry)) if !entry.descriptor.is_stale(Utc::now()) => {
				self.hydrate_memory(name, entry.descriptor.clone()).await;

				return Self::as_result(entry.descriptor);
			},
			Ok(_) => {},
			Err(err) => {
				tracing::warn!(error = %err, provider = %self.provider_name, name, "store read failed; falling through to provider");
			},
		}

		match self.route(name).await {
			RouteOutcome::Delegated(descriptor) => {
				self.hydrate_memory(name, descriptor.clone()).await;

				Ok(descriptor)
			},
			RouteOutcome::Own(Ok(descriptor)) => {
				// Re-affirm `source_provider`: this cache's own provider is the
				// one that actually served the fetch, regardless of what the
				// provider implementation happened to set.
				let descriptor =
					ImageDescriptor { source_provider: self.provider.name().to_string(), ..descriptor };

				Ok(self.persist(name, descriptor).await)
			},
			RouteOutcome::Own(Err(err)) if err.is_not_found() => {
				let negative = ImageDescriptor::negative(name, self.provider_name.clone());

				self.persist(name, negative).await;

				Err(Error::ImageNotFound)
			},
			RouteOutcome::Own(Err(err)) | RouteOutcome::Failed(err) => Err(err),
			RouteOutcome::Fallback(descriptor) => Ok(self.persist(name, descriptor).await),
		}
	}

	/// Write-through: memory first, then best-effort store (logged on failure;
	/// memory remains authoritative). Stamps `cached_at` to the write time
	/// here, on the engine side, rather than trusting whatever the provider
	/// implementation set — a provider reporting a zero/stale `cached_at`
	/// would otherwise persist as already-stale and defeat caching entirely.
	/// Returns the stamped descriptor, since callers must hand back to the
	/// caller exactly the value that was written to memory.
	pub(crate) async fn persist(&self, name: &str, descriptor: ImageDescriptor) -> ImageDescriptor {
		let descriptor = ImageDescriptor { cached_at: Utc::now(), ..descriptor };

		self.hydrate_memory(name, descriptor.clone()).await;

		let entry = descriptor.clone().into_entry(self.provider_name.clone());

		if let Err(err) = self.store.save_image_cache(entry).await {
			tracing::warn!(error = %err, provider = %self.provider_name, name, "store write failed; memory remains authoritative");
		}

		descriptor
	}

	pub(crate) async fn fetch_direct(
		&self,
		name: &str,
		origin: CallOrigin,
	) -> Result<ImageDescriptor> {
		let provider = Arc::clone(&self.provider);
		let name = name.to_string();

		self.guard
			.call(origin, move || {
				let provider = Arc::clone(&provider);
				let name = name.clone();

				async move { provider.fetch_with_origin(&name, origin).await }
			})
			.await
	}

	/// The provider-selection protocol: preferred-provider delegation, then
	/// this cache's own provider, then all-fallback.
	async fn route(&self, name: &str) -> RouteOutcome {
		let Some(registry) = self.registry() else {
			return RouteOutcome::Own(self.fetch_direct(name, CallOrigin::User).await);
		};

		if self.config.debug {
			tracing::debug!(
				provider = %self.provider_name,
				name,
				preferred = ?self.config.preferred_provider,
				fallback_policy = ?self.config.fallback_policy,
				"resolving route"
			);
		}

		if let PreferredProvider::Named(preferred_name) = &self.config.preferred_provider
			&& preferred_name != &self.provider_name
			&& let Some(preferred_cache) = registry.cache(preferred_name).await
		{
			match preferred_cache.get(name).await {
				Ok(descriptor) => {
					let entry = descriptor.clone().into_entry(preferred_name.clone());

					if let Err(err) = preferred_cache.store.save_image_cache(entry).await {
						tracing::warn!(error = %err, provider = %preferred_name, name, "failed to persist delegated fetch under preferred provider");
					}

					return RouteOutcome::Delegated(descriptor);
				},
				Err(err) if self.config.fallback_policy == FallbackPolicy::None => {
					return RouteOutcome::Failed(err);
				},
				Err(_) => {},
			}
		}

		let own_result = self.fetch_direct(name, CallOrigin::User).await;

		if own_result.is_ok() || self.config.fallback_policy != FallbackPolicy::All {
			return RouteOutcome::Own(own_result);
		}

		let preferred_name = match &self.config.preferred_provider {
			PreferredProvider::Named(name) => Some(name.clone()),
			PreferredProvider::Auto => None,
		};

		for (other_name, other_cache) in registry.snapshot_other_caches(&self.provider_name).await {
			if preferred_name.as_deref() == Some(other_name.as_str()) {
				continue;
			}

			if let Ok(descriptor) = other_cache.fetch_direct(name, CallOrigin::User).await {
				return RouteOutcome::Fallback(descriptor);
			}
		}

		RouteOutcome::Own(own_result)
	}
}

enum RouteOutcome {
	/// Served via the preferred provider's own cache.
	Delegated(ImageDescriptor),
	/// Served (or failed) via this cache's own provider.
	Own(Result<ImageDescriptor>),
	/// Served by a registered cache other than the preferred one, after
	/// this cache's own provider also failed under `fallback_policy == All`.
	Fallback(ImageDescriptor),
	/// Preferred provider failed and `fallback_policy == None`.
	Failed(Error),
}
