//! Dynamic factory registry for storage and notification implementations.
//!
//! Every implementation a crate exports is registered under its configured
//! name. The builder then receives only the factories the configuration
//! actually names.

use market_config::Config;
use market_core::{MarketBuilder, MarketEngine, MarketFactories};
use market_notify::NotificationFactory;
use market_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub notification: HashMap<String, NotificationFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			notification: HashMap::new(),
		}
	}

	/// Register a storage implementation
	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	/// Register a notification provider
	pub fn register_notification(&mut self, name: impl Into<String>, factory: NotificationFactory) {
		self.notification.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Initialize the global registry with all available implementations
pub fn initialize_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in market_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in market_notify::get_all_implementations() {
			tracing::debug!("Registering notification provider: {}", name);
			registry.register_notification(name, factory);
		}

		registry
	})
}

/// Get the global factory registry
pub fn get_registry() -> &'static FactoryRegistry {
	initialize_registry()
}

/// Collects the factories for `names`, failing on the first unknown one.
macro_rules! build_factories {
	($factories:expr, $registry:expr, $names:expr, $registry_field:ident, $type_name:literal) => {{
		for name in $names {
			if let Some(factory) = $registry.$registry_field.get(name) {
				$factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
	}};
}

/// Build the market engine using the registry and config
pub async fn build_market_from_config(
	config: Config,
) -> Result<MarketEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let mut storage_factories = HashMap::new();
	build_factories!(
		storage_factories,
		registry,
		&config.storage.candidates,
		storage,
		"storage"
	);

	let mut notification_factories = HashMap::new();
	let notifications = &config.notifications;
	build_factories!(
		notification_factories,
		registry,
		notifications.sms.primary.iter(),
		notification,
		"sms"
	);
	build_factories!(
		notification_factories,
		registry,
		notifications.email.primary.iter(),
		notification,
		"email"
	);

	let factories = MarketFactories {
		storage_factories,
		notification_factories,
	};

	Ok(MarketBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use market_config::builders::ConfigBuilder;

	#[test]
	fn test_registry_contains_builtins() {
		let registry = get_registry();
		assert!(registry.storage.contains_key("memory"));
		assert!(registry.storage.contains_key("file"));
		for name in ["http", "log", "mock"] {
			assert!(registry.notification.contains_key(name));
		}
	}

	#[tokio::test]
	async fn test_unknown_provider_is_rejected() {
		let config = ConfigBuilder::new()
			.sms_provider("carrier-pigeon", toml::Value::Table(toml::Table::new()))
			.build();
		let err = build_market_from_config(config).await.err().unwrap();
		assert!(err.to_string().contains("Unknown sms implementation 'carrier-pigeon'"));
	}

	#[tokio::test]
	async fn test_builds_with_memory_and_log() {
		let config = ConfigBuilder::new()
			.sms_provider("log", toml::Value::Table(toml::Table::new()))
			.email_provider("log", toml::Value::Table(toml::Table::new()))
			.build();
		let engine = build_market_from_config(config).await.unwrap();
		assert_eq!(engine.store_candidate().as_deref(), Some("memory"));
	}
}
