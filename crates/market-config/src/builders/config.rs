//! Fluent builder for `Config` values in tests.

use crate::{
	ApiConfig, CatalogConfig, ChannelConfig, Config, MarketConfig, NotificationsConfig,
	StorageConfig,
};
use market_types::{CatalogProduct, NotificationRule};
use std::collections::HashMap;

/// Builds a valid `Config` backed by the in-memory store, with no
/// notification providers unless one is added.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	market_id: String,
	max_write_attempts: u32,
	candidates: Vec<(String, toml::Value)>,
	reconnect_interval_seconds: u64,
	notifications: NotificationsConfig,
	products: Vec<CatalogProduct>,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			market_id: "test-market".to_string(),
			max_write_attempts: 5,
			candidates: Vec::new(),
			reconnect_interval_seconds: 1,
			notifications: NotificationsConfig {
				retry_interval_seconds: 0,
				..NotificationsConfig::default()
			},
			products: Vec::new(),
			api: None,
		}
	}

	pub fn market_id(mut self, id: impl Into<String>) -> Self {
		self.market_id = id.into();
		self
	}

	pub fn max_write_attempts(mut self, attempts: u32) -> Self {
		self.max_write_attempts = attempts;
		self
	}

	/// Appends a storage candidate. Without any, `memory` is used.
	pub fn storage_candidate(mut self, name: impl Into<String>, config: toml::Value) -> Self {
		self.candidates.push((name.into(), config));
		self
	}

	pub fn reconnect_interval_seconds(mut self, seconds: u64) -> Self {
		self.reconnect_interval_seconds = seconds;
		self
	}

	/// Selects the SMS provider and its settings.
	pub fn sms_provider(mut self, name: impl Into<String>, config: toml::Value) -> Self {
		self.notifications.sms = channel(name.into(), config);
		self
	}

	/// Selects the email provider and its settings.
	pub fn email_provider(mut self, name: impl Into<String>, config: toml::Value) -> Self {
		self.notifications.email = channel(name.into(), config);
		self
	}

	pub fn notification_timeout_seconds(mut self, seconds: u64) -> Self {
		self.notifications.timeout_seconds = seconds;
		self
	}

	pub fn retry_interval_seconds(mut self, seconds: u64) -> Self {
		self.notifications.retry_interval_seconds = seconds;
		self
	}

	pub fn max_notification_attempts(mut self, attempts: u32) -> Self {
		self.notifications.max_attempts = attempts;
		self
	}

	pub fn rule(mut self, rule: NotificationRule) -> Self {
		self.notifications.rules.push(rule);
		self
	}

	pub fn replace_default_rules(mut self, replace: bool) -> Self {
		self.notifications.replace_default_rules = replace;
		self
	}

	pub fn product(mut self, product: CatalogProduct) -> Self {
		self.products.push(product);
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		let candidates = if self.candidates.is_empty() {
			vec![(
				"memory".to_string(),
				toml::Value::Table(toml::Table::new()),
			)]
		} else {
			self.candidates
		};

		Config {
			market: MarketConfig {
				id: self.market_id,
				max_write_attempts: self.max_write_attempts,
			},
			storage: StorageConfig {
				candidates: candidates.iter().map(|(name, _)| name.clone()).collect(),
				implementations: candidates.into_iter().collect(),
				reconnect_interval_seconds: self.reconnect_interval_seconds,
			},
			notifications: self.notifications,
			catalog: CatalogConfig {
				products: self.products,
			},
			api: self.api,
		}
	}
}

fn channel(name: String, config: toml::Value) -> ChannelConfig {
	let mut implementations = HashMap::new();
	implementations.insert(name.clone(), config);
	ChannelConfig {
		primary: Some(name),
		implementations,
	}
}
