//! Concurrent, multi-tier cache for bird image descriptors sourced from
//! pluggable upstream providers.
//!
//! The [`cache::Cache`] engine keeps a fresh descriptor per scientific name
//! behind a single-flight initialization ticket, backed by a durable
//! [`store::ImageStore`] and refreshed in the background before entries go
//! stale. A [`registry::Registry`] fans a lookup out across providers with
//! fallback and preserves attribution to whichever provider actually served
//! the image. Calls that cross into a remote provider are wrapped by an
//! [`guard::UpstreamGuard`] combining rate limiting, circuit breaking, and
//! retry budgeting.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod guard;
pub mod model;
pub mod provider;
pub mod registry;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

mod error;

pub use crate::{
	cache::{Cache, CacheConfig, RefreshConfig},
	error::{Error, Result},
	guard::{UpstreamGuard, breaker::BreakerReason},
	model::{CacheEntry, EntryKind, ImageDescriptor, TtlPolicy},
	provider::{CallOrigin, ImageProvider, StaticProvider},
	registry::{FallbackPolicy, PreferredProvider, Registry, RegistryBuilder},
	store::{ImageStore, InMemoryStore, NullStore},
};

/// Crate-internal prelude: the small set of types nearly every module needs.
mod _prelude {
	pub use std::sync::Arc;

	pub use async_trait::async_trait;
	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use serde::{Deserialize, Serialize};
	pub use tokio::{
		sync::{Mutex, Notify, RwLock},
		time::{Duration, Instant},
	};

	pub use crate::{Error, Result};
}
