//! HTTP gateway provider for SMS and email.
//!
//! Both channels post JSON to a configured endpoint with a bearer API key.
//! SMS bodies look like `{recipientPhone, message, senderId}`; email bodies
//! look like `{recipientEmail, subject, htmlBody, textBody, from}`. Any 2xx
//! answer counts as accepted, and a `messageId` (or `id`) field in the
//! response is kept as the provider message id.

use crate::{
	DeliveryReceipt, NotificationError, NotificationFactory, NotificationInterface,
	NotificationRegistry,
};
use async_trait::async_trait;
use market_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, NotificationChannel, OutgoingMessage,
	Schema, SecretString, ValidationError,
};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_SENDER_ID: &str = "FarmMarket";
const DEFAULT_FROM: &str = "orders@farm-market.local";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SmsPayload<'a> {
	recipient_phone: &'a str,
	message: &'a str,
	sender_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailPayload<'a> {
	recipient_email: &'a str,
	subject: &'a str,
	html_body: &'a str,
	text_body: &'a str,
	from: &'a str,
}

pub struct HttpNotifier {
	channel: NotificationChannel,
	client: reqwest::Client,
	api_url: String,
	/// `None` when no key was configured.
	api_key: Option<SecretString>,
	/// SMS sender id or email from-address, depending on the channel.
	sender: String,
	request_timeout: Duration,
}

impl HttpNotifier {
	pub fn new(
		channel: NotificationChannel,
		api_url: impl Into<String>,
		api_key: Option<SecretString>,
		sender: impl Into<String>,
		request_timeout: Duration,
	) -> Result<Self, NotificationError> {
		let client = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| NotificationError::Configuration(format!("HTTP client: {}", e)))?;
		Ok(Self {
			channel,
			client,
			api_url: api_url.into(),
			api_key: api_key.and_then(SecretString::non_blank),
			sender: sender.into(),
			request_timeout,
		})
	}

	fn payload(&self, recipient: &str, message: &OutgoingMessage) -> Result<serde_json::Value, NotificationError> {
		let value = match self.channel {
			NotificationChannel::Sms => serde_json::to_value(SmsPayload {
				recipient_phone: recipient,
				message: &message.text,
				sender_id: &self.sender,
			}),
			NotificationChannel::Email => serde_json::to_value(EmailPayload {
				recipient_email: recipient,
				subject: &message.subject,
				html_body: message.html.as_deref().unwrap_or(&message.text),
				text_body: &message.text,
				from: &self.sender,
			}),
		};
		value.map_err(|e| NotificationError::Configuration(e.to_string()))
	}
}

fn classify(error: reqwest::Error, limit: Duration) -> NotificationError {
	if error.is_timeout() {
		NotificationError::Timeout(limit)
	} else {
		NotificationError::Network(error.to_string())
	}
}

pub struct HttpNotifierSchema;

impl ConfigSchema for HttpNotifierSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("api_url", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
					_ => Err("api_url must be an http(s) URL".to_string()),
				}
			})],
			vec![
				Field::new("api_key", FieldType::String),
				Field::new("sender_id", FieldType::String),
				Field::new("from", FieldType::String),
				Field::new(
					"request_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(120),
					},
				),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl NotificationInterface for HttpNotifier {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpNotifierSchema)
	}

	fn is_configured(&self) -> bool {
		self.api_key.is_some()
	}

	async fn send(
		&self,
		recipient: &str,
		message: &OutgoingMessage,
	) -> Result<DeliveryReceipt, NotificationError> {
		let api_key = self
			.api_key
			.as_ref()
			.ok_or_else(|| NotificationError::NotConfigured(format!("{} api_key", self.channel)))?;
		let body = self.payload(recipient, message)?;

		let response = self
			.client
			.post(&self.api_url)
			.bearer_auth(api_key.expose_secret())
			.json(&body)
			.send()
			.await
			.map_err(|e| classify(e, self.request_timeout))?;

		let status = response.status();
		if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
			return Err(NotificationError::RateLimited(format!(
				"{} gateway answered 429",
				self.channel
			)));
		}
		if !status.is_success() {
			let message = response.text().await.unwrap_or_default();
			return Err(NotificationError::Rejected {
				status: status.as_u16(),
				message: message.chars().take(200).collect(),
			});
		}

		// Some gateways answer with an empty body.
		let provider_message_id = response
			.json::<serde_json::Value>()
			.await
			.ok()
			.and_then(|json| {
				json.get("messageId")
					.or_else(|| json.get("id"))
					.and_then(|id| match id {
						serde_json::Value::String(s) => Some(s.clone()),
						serde_json::Value::Number(n) => Some(n.to_string()),
						_ => None,
					})
			});
		debug!(channel = %self.channel, status = status.as_u16(), "Gateway accepted message");

		Ok(DeliveryReceipt { provider_message_id })
	}
}

/// Builds an HTTP provider for `channel`.
///
/// Required: `api_url`. Optional: `api_key` (blank means "not configured"),
/// `sender_id` (SMS), `from` (email), `request_timeout_seconds`.
pub fn create_notifier(
	channel: NotificationChannel,
	config: &toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError> {
	HttpNotifierSchema
		.validate(config)
		.map_err(|e| NotificationError::Configuration(e.to_string()))?;

	let api_url = config
		.get("api_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| NotificationError::Configuration("api_url is required".to_string()))?;
	let api_key = config
		.get("api_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from);
	let sender = match channel {
		NotificationChannel::Sms => config
			.get("sender_id")
			.and_then(|v| v.as_str())
			.unwrap_or(DEFAULT_SENDER_ID),
		NotificationChannel::Email => config
			.get("from")
			.and_then(|v| v.as_str())
			.unwrap_or(DEFAULT_FROM),
	};
	let request_timeout = config
		.get("request_timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|secs| Duration::from_secs(secs as u64))
		.unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

	Ok(Box::new(HttpNotifier::new(
		channel,
		api_url,
		api_key,
		sender,
		request_timeout,
	)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = NotificationFactory;

	fn factory() -> Self::Factory {
		create_notifier
	}
}

impl NotificationRegistry for Registry {}
