//! Swappable handle to the connected store.
//!
//! The gateway may come up empty. Request handlers then see
//! [`OrderStateError::StoreUnavailable`] until the reconnect task installs a
//! store, which happens without blocking in-flight requests.

use super::OrderStateError;
use arc_swap::ArcSwapOption;
use market_storage::StorageService;
use std::sync::Arc;

struct ActiveStore {
	service: Arc<StorageService>,
	candidate: String,
}

#[derive(Default)]
pub struct StoreHandle {
	active: ArcSwapOption<ActiveStore>,
}

impl StoreHandle {
	/// A handle with nothing installed.
	pub fn degraded() -> Self {
		Self::default()
	}

	pub fn connected(service: Arc<StorageService>, candidate: impl Into<String>) -> Self {
		let handle = Self::default();
		handle.install(service, candidate);
		handle
	}

	pub fn install(&self, service: Arc<StorageService>, candidate: impl Into<String>) {
		self.active.store(Some(Arc::new(ActiveStore {
			service,
			candidate: candidate.into(),
		})));
	}

	/// Returns the current store or `StoreUnavailable`.
	pub fn get(&self) -> Result<Arc<StorageService>, OrderStateError> {
		self.active
			.load_full()
			.map(|active| active.service.clone())
			.ok_or_else(|| OrderStateError::StoreUnavailable("no storage candidate connected".into()))
	}

	/// Name of the candidate serving requests, if any.
	pub fn candidate(&self) -> Option<String> {
		self.active.load_full().map(|active| active.candidate.clone())
	}

	pub fn is_available(&self) -> bool {
		self.active.load().is_some()
	}
}
