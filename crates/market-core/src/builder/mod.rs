//! Builder for constructing market engines.
//!
//! Composes a [`MarketEngine`] from configuration and factory tables:
//! storage candidates are dialled through the persistence gateway, and one
//! notification provider is built per channel.

use crate::engine::{event_bus::EventBus, MarketEngine};
use crate::rules::RuleTable;
use crate::state::catalog::seed_catalog;
use crate::state::StoreHandle;
use market_config::{ChannelConfig, Config};
use market_notify::{NotificationFactory, NotificationInterface, NotificationService};
use market_storage::{connect, ConnectOutcome, StorageCandidate, StorageFactory};
use market_types::{MarketEvent, NotificationChannel, StorageEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory tables the builder picks implementations from, keyed by the
/// names used in configuration.
pub struct MarketFactories {
	pub storage_factories: HashMap<String, StorageFactory>,
	pub notification_factories: HashMap<String, NotificationFactory>,
}

/// Builder for constructing a MarketEngine with pluggable implementations.
pub struct MarketBuilder {
	config: Config,
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::Table::new())
}

impl MarketBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Storage candidates in configured priority order.
	pub fn storage_candidates(
		&self,
		factories: &HashMap<String, StorageFactory>,
	) -> Result<Vec<StorageCandidate>, BuilderError> {
		let mut candidates = Vec::with_capacity(self.config.storage.candidates.len());
		for name in &self.config.storage.candidates {
			let factory = factories.get(name).ok_or_else(|| {
				BuilderError::Config(format!("Unknown storage implementation '{}'", name))
			})?;
			let config = self
				.config
				.storage
				.implementations
				.get(name)
				.cloned()
				.unwrap_or_else(empty_table);
			candidates.push(StorageCandidate::new(name.clone(), *factory, config));
		}
		if candidates.is_empty() {
			return Err(BuilderError::MissingComponent("storage candidates".into()));
		}
		Ok(candidates)
	}

	fn notification_provider(
		&self,
		channel: NotificationChannel,
		settings: &ChannelConfig,
		factories: &HashMap<String, NotificationFactory>,
	) -> Result<Option<Arc<dyn NotificationInterface>>, BuilderError> {
		let Some(name) = settings.primary.as_deref() else {
			tracing::warn!(component = "notifications", %channel, "No provider configured, messages will be skipped");
			return Ok(None);
		};
		let factory = factories.get(name).ok_or_else(|| {
			BuilderError::Config(format!("Unknown {} provider '{}'", channel, name))
		})?;
		let config = settings
			.implementations
			.get(name)
			.cloned()
			.unwrap_or_else(empty_table);

		match factory(channel, &config) {
			Ok(provider) => {
				tracing::info!(
					component = "notifications",
					%channel,
					implementation = %name,
					configured = provider.is_configured(),
					"Loaded"
				);
				Ok(Some(Arc::from(provider)))
			},
			Err(e) => {
				tracing::error!(
					component = "notifications",
					%channel,
					implementation = %name,
					error = %e,
					"Failed to create notification provider"
				);
				Err(BuilderError::Config(format!(
					"Failed to create {} provider '{}': {}",
					channel, name, e
				)))
			},
		}
	}

	/// Builds the engine. An unreachable store is not an error: the engine
	/// starts degraded and keeps retrying the candidates.
	pub async fn build(self, factories: MarketFactories) -> Result<MarketEngine, BuilderError> {
		let candidates = self.storage_candidates(&factories.storage_factories)?;
		let event_bus = EventBus::new(1000);

		let store = match connect(&candidates).await {
			ConnectOutcome::Connected { service, candidate } => {
				seed_catalog(&service, &self.config.catalog.products)
					.await
					.map_err(|e| BuilderError::Config(format!("Failed to seed catalog: {}", e)))?;
				StoreHandle::connected(service, candidate)
			},
			ConnectOutcome::Unavailable { failures } => {
				event_bus
					.publish(MarketEvent::Storage(StorageEvent::Unavailable {
						failures: failures.iter().map(|f| f.to_string()).collect(),
					}))
					.ok();
				StoreHandle::degraded()
			},
		};

		let mut providers: HashMap<NotificationChannel, Arc<dyn NotificationInterface>> =
			HashMap::new();
		for (channel, settings) in [
			(NotificationChannel::Sms, &self.config.notifications.sms),
			(NotificationChannel::Email, &self.config.notifications.email),
		] {
			if let Some(provider) =
				self.notification_provider(channel, settings, &factories.notification_factories)?
			{
				providers.insert(channel, provider);
			}
		}
		let notifier = Arc::new(NotificationService::new(
			providers,
			Duration::from_secs(self.config.notifications.timeout_seconds),
		));

		let rules = RuleTable::from_config(&self.config.notifications);
		tracing::info!(component = "notifications", rules = rules.len(), "Rule table loaded");

		Ok(MarketEngine::new(
			self.config,
			Arc::new(store),
			candidates,
			notifier,
			rules,
			event_bus,
		))
	}
}
