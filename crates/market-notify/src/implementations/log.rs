//! Provider that writes messages to the log instead of delivering them.
//!
//! Meant for development setups without SMS or email credentials.

use crate::{
	DeliveryReceipt, NotificationError, NotificationFactory, NotificationInterface,
	NotificationRegistry,
};
use async_trait::async_trait;
use market_types::{
	mask_recipient, ConfigSchema, Field, FieldType, ImplementationRegistry, NotificationChannel,
	OutgoingMessage, Schema, ValidationError,
};
use tracing::info;

pub struct LogNotifier {
	channel: NotificationChannel,
	/// Log the full body, not just the subject.
	include_body: bool,
}

impl LogNotifier {
	pub fn new(channel: NotificationChannel, include_body: bool) -> Self {
		Self {
			channel,
			include_body,
		}
	}
}

pub struct LogNotifierSchema;

impl ConfigSchema for LogNotifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![Field::new("include_body", FieldType::Boolean)]).validate(config)
	}
}

#[async_trait]
impl NotificationInterface for LogNotifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LogNotifierSchema)
	}

	async fn send(
		&self,
		recipient: &str,
		message: &OutgoingMessage,
	) -> Result<DeliveryReceipt, NotificationError> {
		if self.include_body {
			info!(
				channel = %self.channel,
				recipient = %mask_recipient(recipient),
				subject = %message.subject,
				body = %message.text,
				"Outgoing notification"
			);
		} else {
			info!(
				channel = %self.channel,
				recipient = %mask_recipient(recipient),
				subject = %message.subject,
				"Outgoing notification"
			);
		}
		Ok(DeliveryReceipt::default())
	}
}

pub fn create_notifier(
	channel: NotificationChannel,
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	LogNotifierSchema
		.validate(config)
		.map_err(|e| NotificationError::Configuration(e.to_string()))?;
	let include_body = config
		.get("include_body")
		.and_then(|v| v.as_bool())
		.unwrap_or(false);
	Ok(Box::new(LogNotifier::new(channel, include_body)))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "log";
	type Factory = NotificationFactory;

	fn factory() -> Self::Factory {
		create_notifier
	}
}

impl NotificationRegistry for Registry {}
