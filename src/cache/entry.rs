//! Per-name cache slot.
//!
//! Wraps [`EntryState`] with the read/write operations the engine drives it
//! through: one slot per scientific name.

// self
use crate::{_prelude::*, cache::state::EntryState, model::ImageDescriptor};

/// One `(cache, scientific_name)` key's current view.
#[derive(Clone, Debug, Default)]
pub struct CacheSlot {
	state: EntryState,
}
impl CacheSlot {
	/// An empty slot, as if the name had never been looked up.
	pub fn empty() -> Self {
		Self { state: EntryState::Absent }
	}

	/// The held descriptor, regardless of staleness.
	pub fn descriptor(&self) -> Option<&ImageDescriptor> {
		self.state.descriptor()
	}

	/// The held descriptor, only if still fresh as of `now`.
	pub fn fresh(&self, now: DateTime<Utc>) -> Option<&ImageDescriptor> {
		match self.state.descriptor() {
			Some(descriptor) if !descriptor.is_stale(now) => Some(descriptor),
			_ => None,
		}
	}

	/// Replace the slot's contents with a freshly loaded or refreshed descriptor.
	pub fn set(&mut self, descriptor: ImageDescriptor) {
		self.state = EntryState::Present(descriptor);
	}
}
