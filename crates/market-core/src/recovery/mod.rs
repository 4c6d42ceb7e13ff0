//! Retry sweep for failed notifications.
//!
//! Periodically walks the stored orders, finds `failed` notification records
//! that nobody has retried yet, and sends them again. The new attempt is
//! appended as its own record with `retryOf` pointing at the failed one; the
//! failed record itself is never touched. A chain of attempts stops once it
//! reaches the configured maximum.

use crate::engine::event_bus::EventBus;
use crate::state::{OrderStateError, OrderStateMachine};
use market_notify::templates::render;
use market_notify::{DispatchRequest, NotificationService};
use market_types::{
	truncate_id, MarketEvent, MessageTemplate, NotificationEvent, NotificationOutcome,
	NotificationRecord, Order,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur during a sweep.
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("State machine error: {0}")]
	StateMachine(String),
}

impl From<OrderStateError> for RecoveryError {
	fn from(e: OrderStateError) -> Self {
		RecoveryError::StateMachine(e.to_string())
	}
}

/// Report of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
	/// Orders examined.
	pub scanned_orders: usize,
	/// Retries attempted.
	pub retried: usize,
	/// Retries the provider accepted.
	pub recovered: usize,
	/// Failed records left alone because their chain hit the limit.
	pub exhausted: usize,
}

/// Failed records of `order` that should be retried now.
///
/// A record qualifies when it failed, has no retry yet, and its chain
/// (the record plus everything it retries) is shorter than `max_attempts`.
pub fn retry_candidates(order: &Order, max_attempts: u32) -> (Vec<&NotificationRecord>, usize) {
	let by_id: HashMap<&str, &NotificationRecord> = order
		.notifications
		.iter()
		.map(|record| (record.id.as_str(), record))
		.collect();
	let retried: HashSet<&str> = order
		.notifications
		.iter()
		.filter_map(|record| record.retry_of.as_deref())
		.collect();

	let chain_length = |record: &NotificationRecord| {
		let mut length = 1u32;
		let mut parent = record.retry_of.as_deref();
		while let Some(id) = parent {
			length += 1;
			parent = by_id.get(id).and_then(|r| r.retry_of.as_deref());
			if length > max_attempts {
				break;
			}
		}
		length
	};

	let mut exhausted = 0;
	let candidates = order
		.notifications
		.iter()
		.filter(|record| record.is_failed() && !retried.contains(record.id.as_str()))
		.filter(|record| {
			let open = chain_length(record) < max_attempts;
			if !open {
				exhausted += 1;
			}
			open
		})
		.collect();
	(candidates, exhausted)
}

pub struct RetrySweep {
	state_machine: Arc<OrderStateMachine>,
	notifier: Arc<NotificationService>,
	event_bus: EventBus,
	max_attempts: u32,
	/// Held for the length of a pass; at most one pass runs at a time.
	running: Mutex<()>,
}

impl RetrySweep {
	pub fn new(
		state_machine: Arc<OrderStateMachine>,
		notifier: Arc<NotificationService>,
		event_bus: EventBus,
		max_attempts: u32,
	) -> Self {
		Self {
			state_machine,
			notifier,
			event_bus,
			max_attempts,
			running: Mutex::new(()),
		}
	}

	/// Runs one pass over every stored order.
	///
	/// Returns an empty report without touching anything if another pass is
	/// still running, so a failed record is never retried twice.
	#[instrument(skip_all)]
	pub async fn sweep(&self) -> Result<SweepReport, RecoveryError> {
		let Ok(_running) = self.running.try_lock() else {
			debug!("Previous retry sweep still running, skipping this pass");
			return Ok(SweepReport::default());
		};
		let mut report = SweepReport::default();

		for order_id in self.state_machine.list_order_ids().await? {
			let order = match self.state_machine.get_order(&order_id).await {
				Ok(order) => order,
				Err(OrderStateError::OrderNotFound(_)) => continue,
				Err(e) => return Err(e.into()),
			};
			report.scanned_orders += 1;

			let (candidates, exhausted) = retry_candidates(&order, self.max_attempts);
			report.exhausted += exhausted;
			if candidates.is_empty() {
				continue;
			}

			let requests: Vec<DispatchRequest> = candidates
				.iter()
				.filter_map(|record| {
					let Some(template) = MessageTemplate::from_event_name(&record.event) else {
						warn!(
							order_id = %truncate_id(&order.id),
							event = %record.event,
							"Cannot retry record with unknown event"
						);
						return None;
					};
					Some(DispatchRequest {
						channel: record.channel,
						recipient: Some(record.recipient.clone()),
						message: render(template, &order, record.channel),
						event: record.event.clone(),
						retry_of: Some(record.id.clone()),
					})
				})
				.collect();
			if requests.is_empty() {
				continue;
			}

			report.retried += requests.len();
			let records = self.notifier.dispatch_all(requests, &order.id).await;
			report.recovered += records
				.iter()
				.filter(|r| r.outcome == NotificationOutcome::Sent)
				.count();

			self.state_machine
				.append_notifications(&order.id, records.clone())
				.await?;
			for record in records {
				self.event_bus
					.publish(MarketEvent::Notification(NotificationEvent::Recorded {
						order_id: order.id.clone(),
						record,
					}))
					.ok();
			}
			debug!(order_id = %truncate_id(&order.id), "Retried failed notifications");
		}

		if report.retried > 0 {
			info!(
				retried = report.retried,
				recovered = report.recovered,
				exhausted = report.exhausted,
				"Notification retry sweep finished"
			);
		}
		Ok(report)
	}
}
