//! Lifecycle management for the market engine.
//!
//! Startup checks the store once more before serving. Shutdown waits a short
//! while for in-flight notification tasks so their records are not lost.

use super::{EngineError, MarketEngine, MAX_CONCURRENT_HANDLERS};
use std::time::Duration;

/// How long shutdown waits for running handlers.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

impl MarketEngine {
	/// Performs any initialization required before running
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(market = %self.config.market.id, "Initializing market engine");
		match self.store.candidate() {
			Some(candidate) => {
				let storage = self
					.store
					.get()
					.map_err(|e| EngineError::Service(e.to_string()))?;
				storage
					.ping()
					.await
					.map_err(|e| EngineError::Service(format!("Store '{}' stopped answering: {}", candidate, e)))?;
				tracing::info!(component = "storage", %candidate, "Serving from store");
			},
			None => {
				tracing::warn!(component = "storage", "Starting degraded, orders are rejected until a store connects");
			},
		}
		Ok(())
	}

	/// Performs cleanup operations
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down market engine");

		let drain = self
			.semaphore
			.acquire_many(MAX_CONCURRENT_HANDLERS as u32);
		match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
			Ok(Ok(_permits)) => Ok(()),
			Ok(Err(e)) => Err(EngineError::Service(e.to_string())),
			Err(_) => {
				tracing::warn!("Notification tasks still running at shutdown");
				Ok(())
			},
		}
	}
}
