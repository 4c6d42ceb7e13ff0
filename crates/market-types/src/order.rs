//! Order entity for the marketplace.
//!
//! An order is created once at checkout and afterwards only changes through
//! status transitions and notification appends. The customer, farmer and
//! product details captured at creation are never edited.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::NotificationRecord;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
	/// Order has been placed and awaits the farmer.
	Pending,
	/// Farmer has been asked to fulfil the order.
	Processing,
	/// Goods are on their way to the customer.
	Shipped,
	/// Goods have reached the customer. Terminal.
	Delivered,
	/// Order was cancelled before shipping. Terminal.
	Cancelled,
}

impl OrderStatus {
	/// Returns every status in lifecycle order.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Pending,
			Self::Processing,
			Self::Shipped,
			Self::Delivered,
			Self::Cancelled,
		]
		.into_iter()
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "Pending",
			OrderStatus::Processing => "Processing",
			OrderStatus::Shipped => "Shipped",
			OrderStatus::Delivered => "Delivered",
			OrderStatus::Cancelled => "Cancelled",
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error returned when a string is not one of the five order statuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order status '{0}', expected one of Pending, Processing, Shipped, Delivered, Cancelled")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
	type Err = UnknownStatus;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OrderStatus::all()
			.find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
			.ok_or_else(|| UnknownStatus(s.to_string()))
	}
}

/// One entry of an order's status history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
	pub status: OrderStatus,
	pub timestamp: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
	/// Who performed the change ("customer", an admin name, "system").
	pub updated_by: String,
}

/// Customer contact and delivery details captured at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
	pub name: String,
	pub email: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone: Option<String>,
	pub delivery_address: String,
}

/// The farmer who listed the ordered product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FarmerInfo {
	pub id: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
}

/// What was ordered and what it costs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
	pub product_id: String,
	pub product_name: String,
	pub quantity: Decimal,
	/// Selling unit, e.g. "kg" or "crate".
	pub unit: String,
	pub unit_price: Decimal,
	pub total: Decimal,
}

impl OrderDetails {
	/// Builds details with `total = unit_price * quantity`.
	pub fn priced(
		product_id: impl Into<String>,
		product_name: impl Into<String>,
		quantity: Decimal,
		unit: impl Into<String>,
		unit_price: Decimal,
	) -> Self {
		Self {
			product_id: product_id.into(),
			product_name: product_name.into(),
			quantity,
			unit: unit.into(),
			unit_price,
			total: (unit_price * quantity).round_dp(2),
		}
	}
}

/// Mutable administrator notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub admin_notes: Option<String>,
}

/// A customer's order for one product from one farmer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	/// Idempotency key supplied by the client, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_reference: Option<String>,
	/// Current status; always equal to the last history entry's status.
	pub status: OrderStatus,
	/// Append-only status history.
	pub status_history: Vec<StatusEntry>,
	/// Append-only notification audit log.
	#[serde(default)]
	pub notifications: Vec<NotificationRecord>,
	pub customer_info: CustomerInfo,
	pub farmer: FarmerInfo,
	pub order_details: OrderDetails,
	#[serde(default)]
	pub notes: OrderNotes,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Creates a new `Pending` order with its first history entry.
	pub fn new(
		id: impl Into<String>,
		client_reference: Option<String>,
		customer_info: CustomerInfo,
		farmer: FarmerInfo,
		order_details: OrderDetails,
		placed_by: impl Into<String>,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			id: id.into(),
			client_reference,
			status: OrderStatus::Pending,
			status_history: vec![StatusEntry {
				status: OrderStatus::Pending,
				timestamp: now,
				note: Some("Order placed".to_string()),
				updated_by: placed_by.into(),
			}],
			notifications: Vec::new(),
			customer_info,
			farmer,
			order_details,
			notes: OrderNotes::default(),
			created_at: now,
			updated_at: now,
		}
	}

	/// Sets the status and appends the matching history entry in one step.
	///
	/// Legality of the transition is checked by the state machine before this
	/// is called.
	pub fn record_transition(&mut self, entry: StatusEntry) {
		self.status = entry.status;
		self.updated_at = entry.timestamp;
		self.status_history.push(entry);
	}

	/// Appends a notification record, keeping `sent_at` non-decreasing.
	pub fn record_notification(&mut self, mut record: NotificationRecord) {
		if let Some(last) = self.notifications.last() {
			if record.sent_at < last.sent_at {
				record.sent_at = last.sent_at;
			}
		}
		self.notifications.push(record);
	}

	/// Returns true when `status` agrees with the newest history entry.
	pub fn is_consistent(&self) -> bool {
		self.status_history
			.last()
			.is_some_and(|entry| entry.status == self.status)
	}

	/// Finds a notification record by id.
	pub fn notification(&self, id: &str) -> Option<&NotificationRecord> {
		self.notifications.iter().find(|record| record.id == id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{NotificationChannel, NotificationOutcome};
	use chrono::Duration;

	fn sample_order() -> Order {
		Order::new(
			"order-1",
			None,
			CustomerInfo {
				name: "Asha".to_string(),
				email: "asha@example.com".to_string(),
				phone: None,
				delivery_address: "12 Mill Road".to_string(),
			},
			FarmerInfo {
				id: "farmer-1".to_string(),
				name: "Ravi".to_string(),
				phone: Some("+15550001".to_string()),
				email: None,
			},
			OrderDetails::priced(
				"tomato",
				"Tomatoes",
				Decimal::new(25, 1),
				"kg",
				Decimal::from(40),
			),
			"customer",
			Utc::now(),
		)
	}

	#[test]
	fn test_new_order_is_pending_and_consistent() {
		let order = sample_order();
		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.status_history.len(), 1);
		assert!(order.is_consistent());
		assert_eq!(order.order_details.total, Decimal::from(100));
	}

	#[test]
	fn test_record_transition_keeps_history_in_sync() {
		let mut order = sample_order();
		order.record_transition(StatusEntry {
			status: OrderStatus::Processing,
			timestamp: Utc::now(),
			note: None,
			updated_by: "admin".to_string(),
		});
		assert_eq!(order.status, OrderStatus::Processing);
		assert_eq!(order.status_history.len(), 2);
		assert!(order.is_consistent());
	}

	#[test]
	fn test_record_notification_clamps_sent_at() {
		let mut order = sample_order();
		let now = Utc::now();
		let first = NotificationRecord::new(
			NotificationChannel::Sms,
			"+15550001",
			"first",
			"order_processing",
			NotificationOutcome::Sent,
			now,
		);
		let earlier = NotificationRecord::new(
			NotificationChannel::Email,
			"asha@example.com",
			"second",
			"order_processing",
			NotificationOutcome::Failed,
			now - Duration::seconds(5),
		);
		order.record_notification(first);
		order.record_notification(earlier);
		assert_eq!(order.notifications.len(), 2);
		assert!(order.notifications[1].sent_at >= order.notifications[0].sent_at);
	}

	#[test]
	fn test_status_parsing() {
		assert_eq!("processing".parse::<OrderStatus>(), Ok(OrderStatus::Processing));
		assert_eq!(" Shipped ".parse::<OrderStatus>(), Ok(OrderStatus::Shipped));
		assert!("Refunded".parse::<OrderStatus>().is_err());
	}

	#[test]
	fn test_order_wire_format_is_camel_case() {
		let order = sample_order();
		let json = serde_json::to_value(&order).unwrap();
		assert!(json.get("statusHistory").is_some());
		assert!(json.get("customerInfo").is_some());
		assert_eq!(json["status"], "Pending");
		assert_eq!(json["statusHistory"][0]["updatedBy"], "customer");
	}
}
