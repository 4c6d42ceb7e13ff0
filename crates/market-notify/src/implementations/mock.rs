//! Mock notification provider for tests and demos.
//!
//! Accepts every message unless told to fail, and keeps a copy of what it
//! was asked to send so tests can inspect it.

use crate::{
	DeliveryReceipt, NotificationError, NotificationFactory, NotificationInterface,
	NotificationRegistry,
};
use async_trait::async_trait;
use market_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, NotificationChannel, OutgoingMessage,
	Schema, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Behaviour knobs for [`MockNotifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockNotifierConfig {
	/// Fail every send.
	#[serde(default)]
	pub fail: bool,
	/// Fail only the first `fail_first` sends, then succeed.
	#[serde(default)]
	pub fail_first: u32,
	/// Report the provider as lacking credentials.
	#[serde(default = "default_configured")]
	pub configured: bool,
	/// Artificial delay before answering.
	#[serde(default)]
	pub latency_ms: u64,
}

fn default_configured() -> bool {
	true
}

impl Default for MockNotifierConfig {
	fn default() -> Self {
		Self {
			fail: false,
			fail_first: 0,
			configured: default_configured(),
			latency_ms: 0,
		}
	}
}

pub struct MockNotifierSchema;

impl ConfigSchema for MockNotifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("fail", FieldType::Boolean),
				Field::new(
					"fail_first",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new("configured", FieldType::Boolean),
				Field::new(
					"latency_ms",
					FieldType::Integer {
						min: Some(0),
						max: Some(60_000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// A provider that records messages instead of delivering them.
pub struct MockNotifier {
	config: MockNotifierConfig,
	attempts: AtomicU32,
	sent: Mutex<Vec<(String, OutgoingMessage)>>,
}

impl MockNotifier {
	pub fn new(config: MockNotifierConfig) -> Self {
		Self {
			config,
			attempts: AtomicU32::new(0),
			sent: Mutex::new(Vec::new()),
		}
	}

	/// Messages accepted so far as `(recipient, message)`.
	pub async fn sent(&self) -> Vec<(String, OutgoingMessage)> {
		self.sent.lock().await.clone()
	}

	/// Number of times `send` was called, successful or not.
	pub fn attempts(&self) -> u32 {
		self.attempts.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl NotificationInterface for MockNotifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockNotifierSchema)
	}

	fn is_configured(&self) -> bool {
		self.config.configured
	}

	async fn send(
		&self,
		recipient: &str,
		message: &OutgoingMessage,
	) -> Result<DeliveryReceipt, NotificationError> {
		let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
		if self.config.latency_ms > 0 {
			tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
		}
		if self.config.fail || attempt <= self.config.fail_first {
			return Err(NotificationError::Network(format!(
				"mock failure on attempt {}",
				attempt
			)));
		}
		self.sent
			.lock()
			.await
			.push((recipient.to_string(), message.clone()));
		Ok(DeliveryReceipt {
			provider_message_id: Some(format!("mock-{}", attempt)),
		})
	}
}

/// Factory function to create a mock provider from configuration.
pub fn create_notifier(
	_channel: NotificationChannel,
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	MockNotifierSchema
		.validate(config)
		.map_err(|e| NotificationError::Configuration(e.to_string()))?;
	let config: MockNotifierConfig = config
		.clone()
		.try_into()
		.map_err(|e: toml::de::Error| NotificationError::Configuration(e.to_string()))?;
	Ok(Box::new(MockNotifier::new(config)))
}

/// Registry for the mock provider.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = NotificationFactory;

	fn factory() -> Self::Factory {
		create_notifier
	}
}

impl NotificationRegistry for Registry {}
