//! Image descriptor and persistent cache entry definitions.

// self
use crate::_prelude::*;

/// Sentinel URL marking a negative entry ("known missing").
pub const NOT_FOUND_SENTINEL: &str = "__NOT_FOUND__";

/// Image metadata returned to callers.
///
/// Descriptors are plain value types: callers receive clones and cannot mutate
/// cache state through them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
	/// Image URL, or [`NOT_FOUND_SENTINEL`] for a negative entry.
	pub url: String,
	/// Scientific name the image was resolved for.
	pub scientific_name: String,
	/// License name attributed to the image.
	#[serde(default)]
	pub license_name: String,
	/// License URL attributed to the image.
	#[serde(default)]
	pub license_url: String,
	/// Attributed author name.
	#[serde(default)]
	pub author_name: String,
	/// Attributed author URL.
	#[serde(default)]
	pub author_url: String,
	/// UTC timestamp the descriptor was last (re)fetched.
	pub cached_at: DateTime<Utc>,
	/// Name of the provider that actually supplied this descriptor.
	///
	/// May differ from the cache bucket the entry is stored under, e.g. after
	/// fallback routing.
	pub source_provider: String,
}
impl ImageDescriptor {
	/// Build a positive descriptor stamped with the current time.
	pub fn positive(
		scientific_name: impl Into<String>,
		url: impl Into<String>,
		license_name: impl Into<String>,
		license_url: impl Into<String>,
		author_name: impl Into<String>,
		author_url: impl Into<String>,
		source_provider: impl Into<String>,
	) -> Self {
		Self {
			url: url.into(),
			scientific_name: scientific_name.into(),
			license_name: license_name.into(),
			license_url: license_url.into(),
			author_name: author_name.into(),
			author_url: author_url.into(),
			cached_at: Utc::now(),
			source_provider: source_provider.into(),
		}
	}

	/// Build a negative entry ("known missing") for the given species.
	pub fn negative(scientific_name: impl Into<String>, source_provider: impl Into<String>) -> Self {
		Self {
			url: NOT_FOUND_SENTINEL.to_string(),
			scientific_name: scientific_name.into(),
			license_name: String::new(),
			license_url: String::new(),
			author_name: String::new(),
			author_url: String::new(),
			cached_at: Utc::now(),
			source_provider: source_provider.into(),
		}
	}

	/// Whether this descriptor represents a known-missing image.
	pub fn is_negative(&self) -> bool {
		self.url == NOT_FOUND_SENTINEL
	}

	/// Classify this descriptor's TTL kind.
	pub fn kind(&self) -> EntryKind {
		if self.is_negative() { EntryKind::Negative } else { EntryKind::Positive }
	}

	/// Whether the descriptor is stale relative to `now` under its kind's TTL.
	pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
		TtlPolicy::is_stale(self.cached_at, self.kind(), now)
	}

	/// Attach a provider bucket, producing a persistable [`CacheEntry`].
	pub fn into_entry(self, provider_name: impl Into<String>) -> CacheEntry {
		CacheEntry { descriptor: self, provider_name: provider_name.into() }
	}
}

/// Classification of an entry for TTL purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
	/// A descriptor carrying a real image URL.
	Positive,
	/// A descriptor recording "known missing".
	Negative,
}

/// TTL policy: 14 days for positive entries, 15 minutes for negative entries.
pub struct TtlPolicy;
impl TtlPolicy {
	/// TTL for positive entries.
	pub const POSITIVE: Duration = Duration::from_secs(14 * 24 * 60 * 60);
	/// TTL for negative entries.
	pub const NEGATIVE: Duration = Duration::from_secs(15 * 60);

	/// TTL duration for the given entry kind.
	pub fn ttl_for(kind: EntryKind) -> Duration {
		match kind {
			EntryKind::Positive => Self::POSITIVE,
			EntryKind::Negative => Self::NEGATIVE,
		}
	}

	/// Whether `cached_at` is stale for `kind` as of `now`.
	///
	/// A zero/default `cached_at` is always stale.
	pub fn is_stale(cached_at: DateTime<Utc>, kind: EntryKind, now: DateTime<Utc>) -> bool {
		if cached_at == DateTime::<Utc>::UNIX_EPOCH {
			return true;
		}

		let ttl = Self::ttl_for(kind);
		let Ok(ttl) = TimeDelta::from_std(ttl) else { return true };

		now - cached_at >= ttl
	}
}

/// Persistent row: an [`ImageDescriptor`] attached to the cache bucket ("provider
/// name") that stores it. Primary key is `(provider_name, scientific_name)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
	/// Logical cache bucket this row is stored under.
	pub provider_name: String,
	/// Image metadata for the row.
	#[serde(flatten)]
	pub descriptor: ImageDescriptor,
}
impl CacheEntry {
	/// Validate the invariants `SaveImageCache` must enforce.
	pub fn validate(&self) -> crate::Result<()> {
		if self.provider_name.is_empty() {
			return Err(crate::Error::Store("provider_name must not be empty".into()));
		}
		if self.descriptor.scientific_name.is_empty() {
			return Err(crate::Error::Store("scientific_name must not be empty".into()));
		}

		Ok(())
	}
}
