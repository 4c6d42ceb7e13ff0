//! Notification dispatch for the order service.
//!
//! Providers deliver SMS and email messages. [`NotificationService`] sits in
//! front of them and turns every attempt into a [`NotificationRecord`]:
//! `sent` when the provider accepted the message, `skipped` when no attempt
//! could be made, `failed` when the provider errored or ran out of time.
//! Dispatch itself never fails, so a broken provider cannot undo the order
//! change that triggered the message.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use market_types::{
	mask_recipient, truncate_id, ConfigSchema, ImplementationRegistry, NotificationChannel,
	NotificationOutcome, NotificationRecord, OutgoingMessage,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod templates;

pub mod implementations {
	pub mod http;
	pub mod log;
	pub mod mock;
}

/// Errors reported by notification providers.
#[derive(Debug, Error)]
pub enum NotificationError {
	#[error("Network error: {0}")]
	Network(String),
	/// The provider answered with an error status.
	#[error("Provider rejected message with status {status}: {message}")]
	Rejected { status: u16, message: String },
	#[error("Rate limited: {0}")]
	RateLimited(String),
	#[error("Provider did not answer within {0:?}")]
	Timeout(Duration),
	/// Credentials or endpoint absent; the provider cannot be used.
	#[error("Provider not configured: {0}")]
	NotConfigured(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl NotificationError {
	/// Short class name stored on failed records.
	pub fn class(&self) -> &'static str {
		match self {
			NotificationError::Network(_) => "network",
			NotificationError::Rejected { .. } => "rejected",
			NotificationError::RateLimited(_) => "rate_limited",
			NotificationError::Timeout(_) => "timeout",
			NotificationError::NotConfigured(_) => "not_configured",
			NotificationError::Configuration(_) => "configuration",
		}
	}
}

/// What a provider reports back for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
	pub provider_message_id: Option<String>,
}

/// Interface every SMS or email provider implements.
#[async_trait]
pub trait NotificationInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// False when credentials are missing; sends are then recorded as
	/// skipped without calling [`send`](Self::send).
	fn is_configured(&self) -> bool {
		true
	}

	/// Delivers one message to one recipient.
	async fn send(
		&self,
		recipient: &str,
		message: &OutgoingMessage,
	) -> Result<DeliveryReceipt, NotificationError>;
}

/// Constructor every provider implementation exposes. The channel tells
/// implementations that serve both channels which wire format to use.
pub type NotificationFactory = fn(
	NotificationChannel,
	&toml::Value,
) -> Result<Box<dyn NotificationInterface>, NotificationError>;

pub trait NotificationRegistry: ImplementationRegistry<Factory = NotificationFactory> {}

/// Every built-in provider as `(name, factory)`.
pub fn get_all_implementations() -> Vec<(&'static str, NotificationFactory)> {
	use implementations::{http, log, mock};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(log::Registry::NAME, log::Registry::factory()),
		(mock::Registry::NAME, mock::Registry::factory()),
	]
}

/// One message to send as part of a batch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
	pub channel: NotificationChannel,
	/// Phone number or email address, if the order has one.
	pub recipient: Option<String>,
	pub message: OutgoingMessage,
	/// Event name recorded on the result.
	pub event: String,
	/// Record this request is a retry of.
	pub retry_of: Option<String>,
}

/// Routes messages to the provider configured for each channel.
pub struct NotificationService {
	providers: HashMap<NotificationChannel, Arc<dyn NotificationInterface>>,
	timeout: Duration,
}

impl NotificationService {
	pub fn new(
		providers: HashMap<NotificationChannel, Arc<dyn NotificationInterface>>,
		timeout: Duration,
	) -> Self {
		Self { providers, timeout }
	}

	/// Sends one message and reports what happened. Never returns an error.
	///
	/// `correlation_id` is the order id and only used for logging.
	pub async fn dispatch(
		&self,
		request: DispatchRequest,
		correlation_id: &str,
	) -> NotificationRecord {
		let DispatchRequest {
			channel,
			recipient,
			message,
			event,
			retry_of,
		} = request;
		let recipient = recipient
			.map(|r| r.trim().to_string())
			.filter(|r| !r.is_empty());

		let record = |outcome: NotificationOutcome| {
			let mut record = NotificationRecord::new(
				channel,
				recipient.clone().unwrap_or_default(),
				message.text.clone(),
				event.clone(),
				outcome,
				Utc::now(),
			);
			record.retry_of = retry_of.clone();
			record
		};

		let Some(provider) = self.providers.get(&channel) else {
			debug!(
				order_id = %truncate_id(correlation_id),
				%channel,
				%event,
				"No provider for channel, skipping"
			);
			return record(NotificationOutcome::Skipped)
				.with_error(format!("no {} provider configured", channel));
		};

		if !provider.is_configured() {
			info!(
				order_id = %truncate_id(correlation_id),
				%channel,
				%event,
				"Provider credentials missing, skipping"
			);
			return record(NotificationOutcome::Skipped)
				.with_error(format!("{} provider credentials missing", channel));
		}

		let Some(address) = recipient.as_deref() else {
			info!(
				order_id = %truncate_id(correlation_id),
				%channel,
				%event,
				"No recipient address, skipping"
			);
			return record(NotificationOutcome::Skipped).with_error("no recipient address");
		};

		let result = match tokio::time::timeout(self.timeout, provider.send(address, &message)).await {
			Ok(result) => result,
			Err(_) => Err(NotificationError::Timeout(self.timeout)),
		};

		match result {
			Ok(receipt) => {
				info!(
					order_id = %truncate_id(correlation_id),
					%channel,
					%event,
					recipient = %mask_recipient(address),
					"Notification sent"
				);
				record(NotificationOutcome::Sent)
					.with_provider_message_id(receipt.provider_message_id)
			},
			Err(e) => {
				warn!(
					order_id = %truncate_id(correlation_id),
					%channel,
					%event,
					recipient = %mask_recipient(address),
					error = %e,
					"Notification failed"
				);
				record(NotificationOutcome::Failed).with_error(format!("{}: {}", e.class(), e))
			},
		}
	}

	/// Sends a batch concurrently. Results are in request order, one per
	/// request.
	pub async fn dispatch_all(
		&self,
		requests: Vec<DispatchRequest>,
		correlation_id: &str,
	) -> Vec<NotificationRecord> {
		join_all(
			requests
				.into_iter()
				.map(|request| self.dispatch(request, correlation_id)),
		)
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mockall::mock;

	mock! {
		pub Provider {}

		#[async_trait]
		impl NotificationInterface for Provider {
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
			fn is_configured(&self) -> bool;
			async fn send(
				&self,
				recipient: &str,
				message: &OutgoingMessage,
			) -> Result<DeliveryReceipt, NotificationError>;
		}
	}

	fn request(channel: NotificationChannel, recipient: Option<&str>) -> DispatchRequest {
		DispatchRequest {
			channel,
			recipient: recipient.map(str::to_string),
			message: OutgoingMessage::text("Order update", "Your order is on its way"),
			event: "order_shipped".to_string(),
			retry_of: None,
		}
	}

	fn service_with(
		channel: NotificationChannel,
		provider: MockProvider,
		timeout: Duration,
	) -> NotificationService {
		let mut providers: HashMap<NotificationChannel, Arc<dyn NotificationInterface>> =
			HashMap::new();
		providers.insert(channel, Arc::new(provider));
		NotificationService::new(providers, timeout)
	}

	#[tokio::test]
	async fn test_success_records_provider_id() {
		let mut provider = MockProvider::new();
		provider.expect_is_configured().return_const(true);
		provider
			.expect_send()
			.withf(|recipient, _| recipient == "+15550001")
			.times(1)
			.returning(|_, _| {
				Ok(DeliveryReceipt {
					provider_message_id: Some("sms-77".to_string()),
				})
			});

		let service = service_with(NotificationChannel::Sms, provider, Duration::from_secs(1));
		let record = service
			.dispatch(request(NotificationChannel::Sms, Some("+15550001")), "order-1")
			.await;

		assert_eq!(record.outcome, NotificationOutcome::Sent);
		assert_eq!(record.provider_message_id.as_deref(), Some("sms-77"));
		assert_eq!(record.recipient, "+15550001");
		assert_eq!(record.event, "order_shipped");
	}

	#[tokio::test]
	async fn test_provider_error_becomes_failed_record() {
		let mut provider = MockProvider::new();
		provider.expect_is_configured().return_const(true);
		provider.expect_send().returning(|_, _| {
			Err(NotificationError::Rejected {
				status: 401,
				message: "invalid api key".to_string(),
			})
		});

		let service = service_with(NotificationChannel::Email, provider, Duration::from_secs(1));
		let record = service
			.dispatch(
				request(NotificationChannel::Email, Some("asha@example.com")),
				"order-1",
			)
			.await;

		assert_eq!(record.outcome, NotificationOutcome::Failed);
		assert!(record.error.as_deref().unwrap().starts_with("rejected"));
	}

	#[tokio::test]
	async fn test_missing_provider_or_credentials_or_address_is_skipped() {
		let empty = NotificationService::new(HashMap::new(), Duration::from_secs(1));
		let record = empty
			.dispatch(request(NotificationChannel::Sms, Some("+15550001")), "o")
			.await;
		assert_eq!(record.outcome, NotificationOutcome::Skipped);

		let mut unconfigured = MockProvider::new();
		unconfigured.expect_is_configured().return_const(false);
		unconfigured.expect_send().never();
		let service = service_with(NotificationChannel::Sms, unconfigured, Duration::from_secs(1));
		let record = service
			.dispatch(request(NotificationChannel::Sms, Some("+15550001")), "o")
			.await;
		assert_eq!(record.outcome, NotificationOutcome::Skipped);
		assert!(record.error.unwrap().contains("credentials"));

		let mut configured = MockProvider::new();
		configured.expect_is_configured().return_const(true);
		configured.expect_send().never();
		let service = service_with(NotificationChannel::Sms, configured, Duration::from_secs(1));
		let record = service
			.dispatch(request(NotificationChannel::Sms, Some("   ")), "o")
			.await;
		assert_eq!(record.outcome, NotificationOutcome::Skipped);
		assert_eq!(record.recipient, "");
	}

	#[tokio::test]
	async fn test_slow_provider_times_out() {
		let service = NotificationService::new(
			HashMap::from([(
				NotificationChannel::Email,
				Arc::new(implementations::mock::MockNotifier::new(
					implementations::mock::MockNotifierConfig {
						latency_ms: 500,
						..Default::default()
					},
				)) as Arc<dyn NotificationInterface>,
			)]),
			Duration::from_millis(20),
		);
		let record = service
			.dispatch(request(NotificationChannel::Email, Some("a@b.co")), "o")
			.await;
		assert_eq!(record.outcome, NotificationOutcome::Failed);
		assert!(record.error.unwrap().starts_with("timeout"));
	}

	#[tokio::test]
	async fn test_batch_isolates_failures() {
		let mut sms = MockProvider::new();
		sms.expect_is_configured().return_const(true);
		sms.expect_send()
			.returning(|_, _| Ok(DeliveryReceipt::default()));
		let mut email = MockProvider::new();
		email.expect_is_configured().return_const(true);
		email
			.expect_send()
			.returning(|_, _| Err(NotificationError::Network("connection reset".into())));

		let mut providers: HashMap<NotificationChannel, Arc<dyn NotificationInterface>> =
			HashMap::new();
		providers.insert(NotificationChannel::Sms, Arc::new(sms));
		providers.insert(NotificationChannel::Email, Arc::new(email));
		let service = NotificationService::new(providers, Duration::from_secs(1));

		let records = service
			.dispatch_all(
				vec![
					request(NotificationChannel::Sms, Some("+15550001")),
					request(NotificationChannel::Email, Some("asha@example.com")),
				],
				"order-1",
			)
			.await;

		assert_eq!(records.len(), 2);
		assert_eq!(records[0].outcome, NotificationOutcome::Sent);
		assert_eq!(records[1].outcome, NotificationOutcome::Failed);
	}
}
