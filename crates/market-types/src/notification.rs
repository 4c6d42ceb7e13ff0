//! Notification channels, outcomes, audit records and rule definitions.
//!
//! Every attempt to tell a farmer or a customer about an order is captured as
//! a [`NotificationRecord`] on the order itself, whether the provider accepted
//! the message, rejected it, or was never configured. Which attempts happen is
//! decided by a table of [`NotificationRule`]s keyed on status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::OrderStatus;

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
	Sms,
	Email,
}

impl NotificationChannel {
	pub fn as_str(&self) -> &'static str {
		match self {
			NotificationChannel::Sms => "sms",
			NotificationChannel::Email => "email",
		}
	}
}

impl fmt::Display for NotificationChannel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for NotificationChannel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"sms" => Ok(NotificationChannel::Sms),
			"email" => Ok(NotificationChannel::Email),
			other => Err(format!("Unknown notification channel '{}'", other)),
		}
	}
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationOutcome {
	/// The provider accepted the message.
	Sent,
	/// No attempt was made: provider or recipient address missing.
	Skipped,
	/// The provider call failed or timed out.
	Failed,
}

/// Audit entry for one notification attempt. Never edited after it is
/// appended; a retry produces a new record pointing back via `retry_of`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
	pub id: String,
	pub channel: NotificationChannel,
	/// Phone number or email address; empty when the order had none.
	pub recipient: String,
	/// Rendered text that was (or would have been) sent.
	pub message: String,
	pub sent_at: DateTime<Utc>,
	pub outcome: NotificationOutcome,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider_message_id: Option<String>,
	/// Error class and detail for `failed` and `skipped` records.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Name of the template / lifecycle event that produced this record.
	pub event: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry_of: Option<String>,
}

impl NotificationRecord {
	pub fn new(
		channel: NotificationChannel,
		recipient: impl Into<String>,
		message: impl Into<String>,
		event: impl Into<String>,
		outcome: NotificationOutcome,
		sent_at: DateTime<Utc>,
	) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			channel,
			recipient: recipient.into(),
			message: message.into(),
			sent_at,
			outcome,
			provider_message_id: None,
			error: None,
			event: event.into(),
			retry_of: None,
		}
	}

	pub fn with_error(mut self, error: impl Into<String>) -> Self {
		self.error = Some(error.into());
		self
	}

	pub fn with_provider_message_id(mut self, id: Option<String>) -> Self {
		self.provider_message_id = id;
		self
	}

	pub fn retrying(mut self, original_id: impl Into<String>) -> Self {
		self.retry_of = Some(original_id.into());
		self
	}

	pub fn is_failed(&self) -> bool {
		self.outcome == NotificationOutcome::Failed
	}
}

/// A rendered message ready for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
	/// Email subject. Ignored by SMS providers.
	pub subject: String,
	pub text: String,
	/// HTML body for email; providers fall back to `text` when absent.
	pub html: Option<String>,
}

impl OutgoingMessage {
	pub fn text(subject: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			subject: subject.into(),
			text: text.into(),
			html: None,
		}
	}
}

/// Who a rule addresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
	Farmer,
	Customer,
}

/// Message templates known to the renderer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplate {
	/// Confirmation sent to the customer at checkout.
	OrderConfirmation,
	/// Tells the farmer there is an order to fulfil.
	NewOrderForFarmer,
	OrderCancelledFarmer,
	OrderCancelledCustomer,
	OrderShipped,
	OrderDelivered,
	/// Generic "your order is now X" message for custom rules.
	StatusUpdate,
}

impl MessageTemplate {
	/// Event name recorded on the notification record.
	pub fn event_name(&self) -> &'static str {
		match self {
			MessageTemplate::OrderConfirmation => "order_confirmation",
			MessageTemplate::NewOrderForFarmer => "new_order_for_farmer",
			MessageTemplate::OrderCancelledFarmer => "order_cancelled_farmer",
			MessageTemplate::OrderCancelledCustomer => "order_cancelled_customer",
			MessageTemplate::OrderShipped => "order_shipped",
			MessageTemplate::OrderDelivered => "order_delivered",
			MessageTemplate::StatusUpdate => "status_update",
		}
	}

	pub fn from_event_name(name: &str) -> Option<Self> {
		[
			MessageTemplate::OrderConfirmation,
			MessageTemplate::NewOrderForFarmer,
			MessageTemplate::OrderCancelledFarmer,
			MessageTemplate::OrderCancelledCustomer,
			MessageTemplate::OrderShipped,
			MessageTemplate::OrderDelivered,
			MessageTemplate::StatusUpdate,
		]
		.into_iter()
		.find(|t| t.event_name() == name)
	}
}

/// Source side of a transition rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StatusMatcher {
	/// `"*"` in configuration.
	Any(AnyStatus),
	One(OrderStatus),
	AnyOf(Vec<OrderStatus>),
}

/// Wildcard marker, serialized as `"*"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnyStatus {
	#[serde(rename = "*")]
	Wildcard,
}

impl StatusMatcher {
	pub fn any() -> Self {
		StatusMatcher::Any(AnyStatus::Wildcard)
	}

	pub fn matches(&self, status: OrderStatus) -> bool {
		match self {
			StatusMatcher::Any(_) => true,
			StatusMatcher::One(s) => *s == status,
			StatusMatcher::AnyOf(list) => list.contains(&status),
		}
	}
}

/// When a rule fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum NotificationTrigger {
	/// The order was just placed.
	Created,
	/// A status transition `from -> to` succeeded.
	Transition { from: StatusMatcher, to: OrderStatus },
}

/// One row of the notification rule table.
///
/// ```toml
/// [[notifications.rules]]
/// on = "transition"
/// from = "*"
/// to = "Shipped"
/// recipient = "farmer"
/// channel = "sms"
/// template = "status_update"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRule {
	#[serde(flatten)]
	pub trigger: NotificationTrigger,
	pub recipient: RecipientRole,
	pub channel: NotificationChannel,
	pub template: MessageTemplate,
}

impl NotificationRule {
	pub fn on_transition(
		from: StatusMatcher,
		to: OrderStatus,
		recipient: RecipientRole,
		channel: NotificationChannel,
		template: MessageTemplate,
	) -> Self {
		Self {
			trigger: NotificationTrigger::Transition { from, to },
			recipient,
			channel,
			template,
		}
	}

	pub fn on_created(
		recipient: RecipientRole,
		channel: NotificationChannel,
		template: MessageTemplate,
	) -> Self {
		Self {
			trigger: NotificationTrigger::Created,
			recipient,
			channel,
			template,
		}
	}

	pub fn fires_on_transition(&self, from: OrderStatus, to: OrderStatus) -> bool {
		matches!(
			&self.trigger,
			NotificationTrigger::Transition { from: m, to: t } if *t == to && m.matches(from)
		)
	}

	pub fn fires_on_creation(&self) -> bool {
		matches!(self.trigger, NotificationTrigger::Created)
	}
}
