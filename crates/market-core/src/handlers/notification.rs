//! Notification handler.
//!
//! Runs after an order is created or a transition is committed. Every bound
//! rule becomes one provider call, all calls run concurrently, and every
//! outcome is appended to the order as a record.

use crate::engine::event_bus::EventBus;
use crate::rules::RuleTable;
use crate::state::OrderStateMachine;
use market_notify::templates::{recipient_address, render};
use market_notify::{DispatchRequest, NotificationService};
use market_types::{
	truncate_id, MarketEvent, NotificationEvent, NotificationRecord, NotificationRule, Order,
	OrderStatus,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum NotificationHandlerError {
	#[error("State error: {0}")]
	State(String),
}

pub struct NotificationHandler {
	notifier: Arc<NotificationService>,
	state_machine: Arc<OrderStateMachine>,
	rules: Arc<RuleTable>,
	event_bus: EventBus,
}

/// Builds the provider call for one rule.
pub(crate) fn dispatch_request(rule: &NotificationRule, order: &Order) -> DispatchRequest {
	DispatchRequest {
		channel: rule.channel,
		recipient: recipient_address(order, rule.recipient, rule.channel),
		message: render(rule.template, order, rule.channel),
		event: rule.template.event_name().to_string(),
		retry_of: None,
	}
}

impl NotificationHandler {
	pub fn new(
		notifier: Arc<NotificationService>,
		state_machine: Arc<OrderStateMachine>,
		rules: Arc<RuleTable>,
		event_bus: EventBus,
	) -> Self {
		Self {
			notifier,
			state_machine,
			rules,
			event_bus,
		}
	}

	/// Sends the creation messages for a freshly placed order.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id)))]
	pub async fn handle_created(
		&self,
		order: Order,
	) -> Result<Vec<NotificationRecord>, NotificationHandlerError> {
		let rules = self.rules.for_creation();
		self.notify(&order, rules).await
	}

	/// Sends the messages bound to `from -> to`.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order.id), %from, %to))]
	pub async fn handle_transition(
		&self,
		order: Order,
		from: OrderStatus,
		to: OrderStatus,
	) -> Result<Vec<NotificationRecord>, NotificationHandlerError> {
		let rules = self.rules.for_transition(from, to);
		self.notify(&order, rules).await
	}

	async fn notify(
		&self,
		order: &Order,
		rules: Vec<&NotificationRule>,
	) -> Result<Vec<NotificationRecord>, NotificationHandlerError> {
		if rules.is_empty() {
			debug!("No notification rules bound");
			return Ok(Vec::new());
		}

		let requests = rules
			.into_iter()
			.map(|rule| dispatch_request(rule, order))
			.collect();
		let records = self.notifier.dispatch_all(requests, &order.id).await;

		self.state_machine
			.append_notifications(&order.id, records.clone())
			.await
			.map_err(|e| NotificationHandlerError::State(e.to_string()))?;

		for record in &records {
			self.event_bus
				.publish(MarketEvent::Notification(NotificationEvent::Recorded {
					order_id: order.id.clone(),
					record: record.clone(),
				}))
				.ok();
		}
		Ok(records)
	}
}
