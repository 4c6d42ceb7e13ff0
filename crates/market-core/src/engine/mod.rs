//! Core market engine that orchestrates the order lifecycle.
//!
//! The engine is the entry point for the HTTP layer. It runs order creation
//! and transitions through the state machine, then hands the notification
//! work to a separate task so the caller gets its answer as soon as the
//! write is committed. Its run loop drives the periodic work: reconnecting a
//! degraded store and sweeping failed notifications.

pub mod event_bus;
pub mod lifecycle;

use crate::handlers::NotificationHandler;
use crate::recovery::RetrySweep;
use crate::rules::RuleTable;
use crate::state::catalog::seed_catalog;
use crate::state::{
	CreatedOrder, OrderStateError, OrderStateMachine, StoreHandle, TransitionRequest, Transitioned,
};
use market_config::Config;
use market_notify::NotificationService;
use market_storage::{connect, ConnectOutcome, StorageCandidate};
use market_types::{CreateOrderRequest, MarketEvent, Order, OrderEvent, StorageEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Upper bound on notification tasks running at once.
pub(crate) const MAX_CONCURRENT_HANDLERS: usize = 100;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Service error: {0}")]
	Service(String),
	#[error("Handler error: {0}")]
	Handler(String),
}

/// Main engine for the order service.
#[derive(Clone)]
pub struct MarketEngine {
	pub(crate) config: Config,
	pub(crate) store: Arc<StoreHandle>,
	/// Candidates retried while the store is unavailable.
	pub(crate) candidates: Arc<Vec<StorageCandidate>>,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) notification_handler: Arc<NotificationHandler>,
	pub(crate) retry_sweep: Arc<RetrySweep>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) semaphore: Arc<Semaphore>,
}

impl MarketEngine {
	pub fn new(
		config: Config,
		store: Arc<StoreHandle>,
		candidates: Vec<StorageCandidate>,
		notifier: Arc<NotificationService>,
		rules: RuleTable,
		event_bus: event_bus::EventBus,
	) -> Self {
		let state_machine = Arc::new(OrderStateMachine::new(
			store.clone(),
			config.market.max_write_attempts,
		));
		let notification_handler = Arc::new(NotificationHandler::new(
			notifier.clone(),
			state_machine.clone(),
			Arc::new(rules),
			event_bus.clone(),
		));
		let retry_sweep = Arc::new(RetrySweep::new(
			state_machine.clone(),
			notifier,
			event_bus.clone(),
			config.notifications.max_attempts,
		));

		Self {
			config,
			store,
			candidates: Arc::new(candidates),
			state_machine,
			notification_handler,
			retry_sweep,
			event_bus,
			semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_HANDLERS)),
		}
	}

	/// Places an order. Creation messages are sent in the background; a
	/// resubmitted client reference returns the existing order and sends
	/// nothing.
	pub async fn create_order(
		&self,
		request: CreateOrderRequest,
	) -> Result<CreatedOrder, OrderStateError> {
		let created = self.state_machine.create_order(&request, "customer").await?;
		if created.is_new {
			self.event_bus
				.publish(MarketEvent::Order(OrderEvent::Created {
					order: created.order.clone(),
				}))
				.ok();
			let order = created.order.clone();
			self.spawn_handler(move |engine| async move {
				engine
					.notification_handler
					.handle_created(order)
					.await
					.map(|_| ())
					.map_err(|e| EngineError::Handler(e.to_string()))
			});
		}
		Ok(created)
	}

	/// Applies a status change. Notifications bound to the transition are
	/// sent in the background and never affect the result.
	pub async fn transition(
		&self,
		order_id: &str,
		request: TransitionRequest,
	) -> Result<Order, OrderStateError> {
		let Transitioned { order, from } = self.state_machine.transition(order_id, &request).await?;
		let to = order.status;

		self.event_bus
			.publish(MarketEvent::Order(OrderEvent::StatusChanged {
				order: order.clone(),
				from,
				to,
			}))
			.ok();
		let committed = order.clone();
		self.spawn_handler(move |engine| async move {
			engine
				.notification_handler
				.handle_transition(committed, from, to)
				.await
				.map(|_| ())
				.map_err(|e| EngineError::Handler(e.to_string()))
		});

		Ok(order)
	}

	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		self.state_machine.get_order(order_id).await
	}

	pub async fn list_order_ids(&self) -> Result<Vec<String>, OrderStateError> {
		self.state_machine.list_order_ids().await
	}

	/// Name of the storage candidate in use, or `None` while degraded.
	pub fn store_candidate(&self) -> Option<String> {
		self.store.candidate()
	}

	/// Tries the storage candidates again if no store is installed.
	///
	/// Returns true when a store is available afterwards.
	pub async fn reconnect(&self) -> bool {
		if self.store.is_available() {
			return true;
		}
		match connect(&self.candidates).await {
			ConnectOutcome::Connected { service, candidate } => {
				if let Err(e) = seed_catalog(&service, &self.config.catalog.products).await {
					warn!(component = "storage", candidate = %candidate, error = %e, "Catalog seeding failed after reconnect");
					return false;
				}
				self.store.install(service, candidate.clone());
				info!(component = "storage", candidate = %candidate, "Store reconnected, leaving degraded mode");
				self.event_bus
					.publish(MarketEvent::Storage(StorageEvent::Connected { candidate }))
					.ok();
				true
			},
			ConnectOutcome::Unavailable { failures } => {
				self.event_bus
					.publish(MarketEvent::Storage(StorageEvent::Unavailable {
						failures: failures.iter().map(|f| f.to_string()).collect(),
					}))
					.ok();
				false
			},
		}
	}

	/// Runs until Ctrl+C.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				error!("Failed to listen for shutdown signal: {}", e);
			}
		})
		.await
	}

	/// Runs the periodic tasks until `shutdown` completes.
	pub async fn run_until<S>(&self, shutdown: S) -> Result<(), EngineError>
	where
		S: Future<Output = ()>,
	{
		let reconnect_every = Duration::from_secs(self.config.storage.reconnect_interval_seconds.max(1));
		let mut reconnect = tokio::time::interval(reconnect_every);
		reconnect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		let retry_secs = self.config.notifications.retry_interval_seconds;
		let mut retry = tokio::time::interval(Duration::from_secs(retry_secs.max(1)));
		retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				_ = reconnect.tick() => {
					if !self.store.is_available() {
						self.reconnect().await;
					}
				}

				_ = retry.tick(), if retry_secs > 0 => {
					if self.store.is_available() {
						self.spawn_handler(|engine| async move {
							engine
								.retry_sweep
								.sweep()
								.await
								.map(|_| ())
								.map_err(|e| EngineError::Service(format!("Retry sweep failed: {}", e)))
						});
					}
				}

				_ = &mut shutdown => {
					break;
				}
			}
		}

		self.shutdown().await
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the retry sweep, for running a pass on demand.
	pub fn retry_sweep(&self) -> &Arc<RetrySweep> {
		&self.retry_sweep
	}

	/// Spawns a handler task, bounded by the engine's semaphore. The permit
	/// is taken inside the task, so callers never wait on handler capacity.
	/// Errors are logged, never returned.
	fn spawn_handler<F, Fut>(&self, handler: F)
	where
		F: FnOnce(MarketEngine) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
	{
		let engine = self.clone();
		let semaphore = self.semaphore.clone();
		tokio::spawn(async move {
			let _permit = match semaphore.acquire_owned().await {
				Ok(permit) => permit,
				Err(e) => {
					error!("Failed to acquire semaphore permit: {}", e);
					return;
				},
			};
			if let Err(e) = handler(engine).await {
				error!("Handler error: {}", e);
			}
		});
	}
}
