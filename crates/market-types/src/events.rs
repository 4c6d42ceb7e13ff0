//! Events published on the engine's event bus.
//!
//! The HTTP handlers and the state machine never call notification providers
//! directly. They publish an event and return; subscribers react on their own
//! tasks.

use serde::{Deserialize, Serialize};

use crate::{NotificationRecord, Order, OrderStatus};

/// Top level event, grouped by producing component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
	Order(OrderEvent),
	Notification(NotificationEvent),
	Storage(StorageEvent),
}

/// Order lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A new order was written with status `Pending`.
	Created { order: Order },
	/// A transition was committed. `order` is the record as written.
	StatusChanged {
		order: Order,
		from: OrderStatus,
		to: OrderStatus,
	},
}

/// Notification audit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationEvent {
	/// A record was appended to an order.
	Recorded {
		order_id: String,
		record: NotificationRecord,
	},
}

/// Persistence gateway events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageEvent {
	/// A candidate answered and is now serving requests.
	Connected { candidate: String },
	/// No candidate answered; the service runs degraded.
	Unavailable { failures: Vec<String> },
}
