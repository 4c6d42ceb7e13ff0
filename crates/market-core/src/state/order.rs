//! Order state machine implementation.
//!
//! Orders move Pending -> Processing -> Shipped -> Delivered. Pending and
//! Processing orders may also be Cancelled. Delivered and Cancelled are
//! terminal.
//!
//! Every write is a compare-and-set against the revision the order was read
//! at. A transition that loses a race re-reads the order and gives up with
//! [`OrderStateError::ConcurrentConflict`] if the status it was checked
//! against has moved; notification appends simply retry. Running out of
//! attempts without the status moving surfaces as
//! [`OrderStateError::StoreUnavailable`], which callers may retry.

use super::catalog::lookup_product;
use super::StoreHandle;
use chrono::Utc;
use market_storage::{StorageError, StorageService, Versioned};
use market_types::{
	truncate_id, CreateOrderRequest, CustomerInfo, NotificationRecord, Order,
	OrderDetails, OrderStatus, StatusEntry, StorageKey,
};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	/// Another writer changed the order first.
	#[error("Concurrent update on order {0}")]
	ConcurrentConflict(String),
	#[error("Store unavailable: {0}")]
	StoreUnavailable(String),
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Product not found: {0}")]
	ProductNotFound(String),
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for OrderStateError {
	fn from(e: StorageError) -> Self {
		match e {
			StorageError::Unreachable(detail) => OrderStateError::StoreUnavailable(detail),
			other => OrderStateError::Storage(other.to_string()),
		}
	}
}

/// Allowed successors of each status.
static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;
	HashMap::from([
		(Pending, HashSet::from([Processing, Cancelled])),
		(Processing, HashSet::from([Shipped, Cancelled])),
		(Shipped, HashSet::from([Delivered])),
		(Delivered, HashSet::new()),
		(Cancelled, HashSet::new()),
	])
});

/// A status change requested by an administrator (or the system).
#[derive(Debug, Clone)]
pub struct TransitionRequest {
	pub target: OrderStatus,
	/// Recorded as `updatedBy` on the history entry.
	pub actor: String,
	pub note: Option<String>,
	/// Replaces `notes.adminNotes` when present.
	pub admin_notes: Option<String>,
	/// Fail with `ConcurrentConflict` unless the order is currently in this
	/// status.
	pub expected_status: Option<OrderStatus>,
}

impl TransitionRequest {
	pub fn to(target: OrderStatus, actor: impl Into<String>) -> Self {
		Self {
			target,
			actor: actor.into(),
			note: None,
			admin_notes: None,
			expected_status: None,
		}
	}

	pub fn with_note(mut self, note: impl Into<String>) -> Self {
		self.note = Some(note.into());
		self
	}

	pub fn expecting(mut self, status: OrderStatus) -> Self {
		self.expected_status = Some(status);
		self
	}
}

/// A committed transition.
#[derive(Debug, Clone)]
pub struct Transitioned {
	pub order: Order,
	pub from: OrderStatus,
}

/// Result of [`OrderStateMachine::create_order`].
#[derive(Debug, Clone)]
pub struct CreatedOrder {
	pub order: Order,
	/// False when the client reference matched an existing order.
	pub is_new: bool,
}

/// Manages order state transitions and persistence
pub struct OrderStateMachine {
	store: Arc<StoreHandle>,
	max_write_attempts: u32,
}

impl OrderStateMachine {
	pub fn new(store: Arc<StoreHandle>, max_write_attempts: u32) -> Self {
		Self {
			store,
			max_write_attempts: max_write_attempts.max(1),
		}
	}

	/// Checks if a state transition is valid
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		TRANSITIONS.get(&from).is_some_and(|next| next.contains(&to))
	}

	/// Legal next statuses of `status`, in lifecycle order.
	pub fn successors(status: OrderStatus) -> Vec<OrderStatus> {
		OrderStatus::all()
			.filter(|next| Self::is_valid_transition(status, *next))
			.collect()
	}

	fn storage(&self) -> Result<Arc<StorageService>, OrderStateError> {
		self.store.get()
	}

	async fn load(
		&self,
		storage: &StorageService,
		order_id: &str,
	) -> Result<Versioned<Order>, OrderStateError> {
		match storage.retrieve(StorageKey::Orders.as_str(), order_id).await {
			Ok(found) => Ok(found),
			Err(StorageError::NotFound) => Err(OrderStateError::OrderNotFound(order_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Places a new `Pending` order for a catalog product.
	///
	/// With a `client_reference` the call is idempotent: a second request
	/// carrying the same reference gets the first order back unchanged.
	pub async fn create_order(
		&self,
		request: &CreateOrderRequest,
		placed_by: &str,
	) -> Result<CreatedOrder, OrderStateError> {
		let storage = self.storage()?;

		if let Some(reference) = request.client_reference.as_deref() {
			if let Some(order) = self.lookup_reference(&storage, reference).await? {
				info!(
					order_id = %truncate_id(&order.id),
					client_reference = %reference,
					"Client reference already placed, returning existing order"
				);
				return Ok(CreatedOrder {
					order,
					is_new: false,
				});
			}
		}

		if request.quantity <= rust_decimal::Decimal::ZERO {
			return Err(OrderStateError::Validation(
				"quantity must be greater than zero".into(),
			));
		}

		let product = lookup_product(&storage, &request.product_id)
			.await?
			.ok_or_else(|| OrderStateError::ProductNotFound(request.product_id.clone()))?;

		let order = Order::new(
			uuid::Uuid::new_v4().to_string(),
			request.client_reference.clone(),
			CustomerInfo {
				name: request.customer.name.trim().to_string(),
				email: request.customer.email.trim().to_string(),
				phone: request.customer.phone.clone(),
				delivery_address: request.delivery_address.trim().to_string(),
			},
			product.farmer.clone(),
			OrderDetails::priced(
				&product.id,
				&product.name,
				request.quantity,
				&product.unit,
				product.unit_price,
			),
			placed_by,
			Utc::now(),
		);

		// Claim the reference before writing the order so two resubmissions
		// of the same local order cannot both create one.
		if let Some(reference) = order.client_reference.as_deref() {
			if let Some(existing) = self.claim_reference(&storage, reference, &order.id).await? {
				return Ok(CreatedOrder {
					order: existing,
					is_new: false,
				});
			}
		}

		if let Err(e) = storage
			.insert(StorageKey::Orders.as_str(), &order.id, &order)
			.await
		{
			if let Some(reference) = order.client_reference.as_deref() {
				if let Err(cleanup) = storage
					.remove(StorageKey::OrderByClientRef.as_str(), reference)
					.await
				{
					warn!(client_reference = %reference, error = %cleanup, "Failed to release client reference");
				}
			}
			return Err(e.into());
		}

		// A concurrent request may have reclaimed the reference while this
		// order was being written. The index owner wins.
		if let Some(reference) = order.client_reference.as_deref() {
			let owner = storage
				.try_retrieve::<String>(StorageKey::OrderByClientRef.as_str(), reference)
				.await?
				.map(|index| index.value);
			if owner.as_deref() != Some(order.id.as_str()) {
				storage.remove(StorageKey::Orders.as_str(), &order.id).await?;
				return match self.lookup_reference(&storage, reference).await? {
					Some(existing) => Ok(CreatedOrder {
						order: existing,
						is_new: false,
					}),
					None => Err(OrderStateError::ConcurrentConflict(reference.to_string())),
				};
			}
		}

		info!(
			order_id = %truncate_id(&order.id),
			product = %order.order_details.product_id,
			total = %order.order_details.total,
			"Order placed"
		);
		Ok(CreatedOrder {
			order,
			is_new: true,
		})
	}

	/// Points `reference` at `order_id`.
	///
	/// Returns the order that already owns the reference, if any. An index
	/// entry whose order was never written (the process stopped between the
	/// two writes) is stale and gets taken over.
	async fn claim_reference(
		&self,
		storage: &StorageService,
		reference: &str,
		order_id: &str,
	) -> Result<Option<Order>, OrderStateError> {
		let index_ns = StorageKey::OrderByClientRef.as_str();
		match storage.insert(index_ns, reference, &order_id).await {
			Ok(_) => return Ok(None),
			Err(StorageError::Conflict { .. }) => {},
			Err(e) => return Err(e.into()),
		}

		let Some(index) = storage.try_retrieve::<String>(index_ns, reference).await? else {
			return Err(OrderStateError::ConcurrentConflict(reference.to_string()));
		};
		if let Some(existing) = storage
			.try_retrieve::<Order>(StorageKey::Orders.as_str(), &index.value)
			.await?
		{
			return Ok(Some(existing.value));
		}

		warn!(
			client_reference = %reference,
			stale_order = %truncate_id(&index.value),
			"Client reference points at a missing order, reclaiming"
		);
		match storage
			.replace(index_ns, reference, &order_id, index.revision)
			.await
		{
			Ok(_) => Ok(None),
			Err(StorageError::Conflict { .. }) => {
				Err(OrderStateError::ConcurrentConflict(reference.to_string()))
			},
			Err(e) => Err(e.into()),
		}
	}

	async fn lookup_reference(
		&self,
		storage: &StorageService,
		reference: &str,
	) -> Result<Option<Order>, OrderStateError> {
		let Some(index) = storage
			.try_retrieve::<String>(StorageKey::OrderByClientRef.as_str(), reference)
			.await?
		else {
			return Ok(None);
		};
		Ok(storage
			.try_retrieve::<Order>(StorageKey::Orders.as_str(), &index.value)
			.await?
			.map(|found| found.value))
	}

	/// Moves an order to `request.target`, appending one history entry.
	///
	/// Nothing is written when the transition is illegal or the expected
	/// status does not match.
	pub async fn transition(
		&self,
		order_id: &str,
		request: &TransitionRequest,
	) -> Result<Transitioned, OrderStateError> {
		let storage = self.storage()?;
		let mut validated_from: Option<OrderStatus> = None;

		for attempt in 1..=self.max_write_attempts {
			let Versioned {
				value: mut order,
				revision,
			} = self.load(&storage, order_id).await?;

			// After a lost race, only re-apply if nothing moved underneath.
			if let Some(previous) = validated_from {
				if previous != order.status {
					return Err(OrderStateError::ConcurrentConflict(order_id.to_string()));
				}
			}
			if let Some(expected) = request.expected_status {
				if expected != order.status {
					return Err(OrderStateError::ConcurrentConflict(order_id.to_string()));
				}
			}
			let from = order.status;
			if !Self::is_valid_transition(from, request.target) {
				return Err(OrderStateError::InvalidTransition {
					from,
					to: request.target,
				});
			}
			validated_from = Some(from);

			order.record_transition(StatusEntry {
				status: request.target,
				timestamp: Utc::now(),
				note: request.note.clone(),
				updated_by: request.actor.clone(),
			});
			if let Some(notes) = &request.admin_notes {
				order.notes.admin_notes = Some(notes.clone());
			}

			match storage
				.replace(StorageKey::Orders.as_str(), order_id, &order, revision)
				.await
			{
				Ok(_) => {
					info!(
						order_id = %truncate_id(order_id),
						%from,
						to = %request.target,
						actor = %request.actor,
						"Order status changed"
					);
					return Ok(Transitioned { order, from });
				},
				Err(StorageError::Conflict { .. }) => {
					debug!(order_id = %truncate_id(order_id), attempt, "Transition lost a write race, re-reading");
				},
				Err(e) => return Err(e.into()),
			}
		}

		warn!(
			order_id = %truncate_id(order_id),
			attempts = self.max_write_attempts,
			"Giving up on transition after repeated conflicts"
		);
		Err(Self::write_contention(order_id, self.max_write_attempts))
	}

	/// Error for a write that kept losing races while the order itself never
	/// moved out from under the caller. Safe to retry.
	fn write_contention(order_id: &str, attempts: u32) -> OrderStateError {
		OrderStateError::StoreUnavailable(format!(
			"order {} still contended after {} write attempts",
			order_id, attempts
		))
	}

	/// Appends one notification record.
	pub async fn append_notification(
		&self,
		order_id: &str,
		record: NotificationRecord,
	) -> Result<Order, OrderStateError> {
		self.append_notifications(order_id, vec![record]).await
	}

	/// Appends records in the given order with a single write. Conflicts with
	/// other writers are retried since appends commute with transitions.
	pub async fn append_notifications(
		&self,
		order_id: &str,
		records: Vec<NotificationRecord>,
	) -> Result<Order, OrderStateError> {
		let storage = self.storage()?;

		for attempt in 1..=self.max_write_attempts {
			let Versioned {
				value: mut order,
				revision,
			} = self.load(&storage, order_id).await?;
			if records.is_empty() {
				return Ok(order);
			}
			for record in records.iter().cloned() {
				order.record_notification(record);
			}
			order.updated_at = Utc::now().max(order.updated_at);

			match storage
				.replace(StorageKey::Orders.as_str(), order_id, &order, revision)
				.await
			{
				Ok(_) => return Ok(order),
				Err(StorageError::Conflict { .. }) => {
					debug!(order_id = %truncate_id(order_id), attempt, "Notification append conflicted, retrying");
				},
				Err(e) => return Err(e.into()),
			}
		}

		Err(Self::write_contention(order_id, self.max_write_attempts))
	}

	/// Gets an order by ID
	pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderStateError> {
		let storage = self.storage()?;
		Ok(self.load(&storage, order_id).await?.value)
	}

	pub async fn find_by_client_reference(
		&self,
		reference: &str,
	) -> Result<Option<Order>, OrderStateError> {
		let storage = self.storage()?;
		self.lookup_reference(&storage, reference).await
	}

	/// Ids of every stored order, sorted.
	pub async fn list_order_ids(&self) -> Result<Vec<String>, OrderStateError> {
		Ok(self.storage()?.list_ids(StorageKey::Orders.as_str()).await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use market_storage::implementations::memory::MemoryStorage;
	use market_storage::StorageInterface;
	use market_types::{CatalogProduct, ConfigSchema, CustomerContact, FarmerInfo, NotificationChannel, NotificationOutcome};
	use rust_decimal::Decimal;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::sync::Barrier;

	fn product() -> CatalogProduct {
		CatalogProduct {
			id: "mango-kg".to_string(),
			name: "Alphonso mangoes".to_string(),
			unit: "kg".to_string(),
			unit_price: Decimal::new(450, 2),
			farmer: FarmerInfo {
				id: "farmer-ravi".to_string(),
				name: "Ravi".to_string(),
				phone: Some("+15550001".to_string()),
				email: None,
			},
		}
	}

	fn request(reference: Option<&str>) -> CreateOrderRequest {
		CreateOrderRequest {
			customer: CustomerContact {
				name: "Asha".to_string(),
				email: "asha@example.com".to_string(),
				phone: None,
			},
			product_id: "mango-kg".to_string(),
			quantity: Decimal::from(2),
			delivery_address: "12 Mill Road".to_string(),
			client_reference: reference.map(str::to_string),
		}
	}

	async fn machine_with(backend: Box<dyn StorageInterface>) -> OrderStateMachine {
		let storage = Arc::new(StorageService::new(backend));
		storage
			.store(StorageKey::Products.as_str(), "mango-kg", &product())
			.await
			.unwrap();
		OrderStateMachine::new(Arc::new(StoreHandle::connected(storage, "memory")), 5)
	}

	async fn machine() -> OrderStateMachine {
		machine_with(Box::new(MemoryStorage::new())).await
	}

	#[tokio::test]
	async fn test_create_prices_and_starts_pending() {
		let machine = machine().await;
		let created = machine.create_order(&request(None), "customer").await.unwrap();
		let order = created.order;

		assert!(created.is_new);
		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.status_history.len(), 1);
		assert_eq!(order.status_history[0].note.as_deref(), Some("Order placed"));
		assert_eq!(order.order_details.total, Decimal::new(900, 2));
		assert_eq!(order.farmer.id, "farmer-ravi");
		assert_eq!(machine.get_order(&order.id).await.unwrap(), order);
	}

	#[tokio::test]
	async fn test_unknown_product_and_bad_quantity_rejected() {
		let machine = machine().await;
		let mut unknown = request(None);
		unknown.product_id = "durian".to_string();
		assert!(matches!(
			machine.create_order(&unknown, "customer").await,
			Err(OrderStateError::ProductNotFound(_))
		));

		let mut zero = request(None);
		zero.quantity = Decimal::ZERO;
		assert!(matches!(
			machine.create_order(&zero, "customer").await,
			Err(OrderStateError::Validation(_))
		));
		assert!(machine.list_order_ids().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_client_reference_dedups() {
		let machine = machine().await;
		let first = machine
			.create_order(&request(Some("local-abc")), "customer")
			.await
			.unwrap();
		let second = machine
			.create_order(&request(Some("local-abc")), "customer")
			.await
			.unwrap();

		assert!(first.is_new);
		assert!(!second.is_new);
		assert_eq!(first.order.id, second.order.id);
		assert_eq!(machine.list_order_ids().await.unwrap().len(), 1);
		assert_eq!(
			machine
				.find_by_client_reference("local-abc")
				.await
				.unwrap()
				.map(|o| o.id),
			Some(first.order.id)
		);
	}

	#[test]
	fn test_transition_table() {
		use OrderStatus::*;
		assert_eq!(OrderStateMachine::successors(Pending), vec![Processing, Cancelled]);
		assert_eq!(OrderStateMachine::successors(Processing), vec![Shipped, Cancelled]);
		assert_eq!(OrderStateMachine::successors(Shipped), vec![Delivered]);
		assert!(OrderStateMachine::successors(Delivered).is_empty());
		assert!(OrderStateMachine::successors(Cancelled).is_empty());
	}

	#[tokio::test]
	async fn test_full_lifecycle_keeps_history_consistent() {
		let machine = machine().await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;

		for target in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
			let done = machine
				.transition(&id, &TransitionRequest::to(target, "admin"))
				.await
				.unwrap();
			assert!(done.order.is_consistent());
			assert_eq!(done.order.status, target);
		}
		let order = machine.get_order(&id).await.unwrap();
		assert_eq!(order.status_history.len(), 4);
	}

	#[tokio::test]
	async fn test_illegal_transition_leaves_order_untouched() {
		let machine = machine().await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;
		for target in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
			machine
				.transition(&id, &TransitionRequest::to(target, "admin"))
				.await
				.unwrap();
		}
		let before = machine.get_order(&id).await.unwrap();

		let err = machine
			.transition(&id, &TransitionRequest::to(OrderStatus::Processing, "admin"))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrderStateError::InvalidTransition {
				from: OrderStatus::Delivered,
				to: OrderStatus::Processing
			}
		));
		assert_eq!(machine.get_order(&id).await.unwrap(), before);
	}

	#[tokio::test]
	async fn test_cancelled_is_terminal() {
		let machine = machine().await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;
		machine
			.transition(
				&id,
				&TransitionRequest::to(OrderStatus::Cancelled, "admin").with_note("Out of stock"),
			)
			.await
			.unwrap();

		let err = machine
			.transition(&id, &TransitionRequest::to(OrderStatus::Processing, "admin"))
			.await
			.unwrap_err();
		assert!(matches!(err, OrderStateError::InvalidTransition { .. }));
		let order = machine.get_order(&id).await.unwrap();
		assert_eq!(order.status, OrderStatus::Cancelled);
		assert_eq!(order.status_history.len(), 2);
	}

	#[tokio::test]
	async fn test_expected_status_mismatch_is_conflict() {
		let machine = machine().await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;
		let err = machine
			.transition(
				&id,
				&TransitionRequest::to(OrderStatus::Shipped, "admin").expecting(OrderStatus::Processing),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderStateError::ConcurrentConflict(_)));
		assert_eq!(machine.get_order(&id).await.unwrap().status_history.len(), 1);
	}

	#[tokio::test]
	async fn test_unknown_order() {
		let machine = machine().await;
		assert!(matches!(
			machine
				.transition("missing", &TransitionRequest::to(OrderStatus::Processing, "admin"))
				.await,
			Err(OrderStateError::OrderNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_degraded_store_reports_unavailable() {
		let machine = OrderStateMachine::new(Arc::new(StoreHandle::degraded()), 5);
		assert!(matches!(
			machine.create_order(&request(None), "customer").await,
			Err(OrderStateError::StoreUnavailable(_))
		));
		assert!(matches!(
			machine.get_order("x").await,
			Err(OrderStateError::StoreUnavailable(_))
		));
	}

	/// Holds the first two order reads until both have happened, so two
	/// transitions are guaranteed to start from the same revision.
	struct LockstepReads {
		inner: MemoryStorage,
		reads: AtomicUsize,
		barrier: Barrier,
	}

	#[async_trait]
	impl StorageInterface for LockstepReads {
		async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
			let found = self.inner.get_bytes(key).await;
			if key.starts_with("orders:") && self.reads.fetch_add(1, Ordering::SeqCst) < 2 {
				self.barrier.wait().await;
			}
			found
		}
		async fn compare_and_set(
			&self,
			key: &str,
			expected: Option<u64>,
			value: Vec<u8>,
		) -> Result<u64, StorageError> {
			self.inner.compare_and_set(key, expected, value).await
		}
		async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
			self.inner.set_bytes(key, value).await
		}
		async fn delete(&self, key: &str) -> Result<(), StorageError> {
			self.inner.delete(key).await
		}
		async fn exists(&self, key: &str) -> Result<bool, StorageError> {
			self.inner.exists(key).await
		}
		async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
			self.inner.keys(prefix).await
		}
		async fn ping(&self) -> Result<(), StorageError> {
			Ok(())
		}
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			self.inner.config_schema()
		}
	}

	#[tokio::test]
	async fn test_concurrent_transitions_have_one_winner() {
		let machine = Arc::new(
			machine_with(Box::new(LockstepReads {
				inner: MemoryStorage::new(),
				reads: AtomicUsize::new(0),
				barrier: Barrier::new(2),
			}))
			.await,
		);
		// Orders are created without reading the orders namespace.
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;

		let (a, b) = {
			let (m1, m2) = (machine.clone(), machine.clone());
			let (id1, id2) = (id.clone(), id.clone());
			tokio::join!(
				tokio::spawn(async move {
					m1.transition(&id1, &TransitionRequest::to(OrderStatus::Processing, "admin-a"))
						.await
				}),
				tokio::spawn(async move {
					m2.transition(&id2, &TransitionRequest::to(OrderStatus::Cancelled, "admin-b"))
						.await
				}),
			)
		};
		let results = [a.unwrap(), b.unwrap()];
		let winners = results.iter().filter(|r| r.is_ok()).count();
		assert_eq!(winners, 1);
		assert!(results.iter().any(|r| matches!(
			r,
			Err(OrderStateError::ConcurrentConflict(_)) | Err(OrderStateError::InvalidTransition { .. })
		)));

		let order = machine.get_order(&id).await.unwrap();
		assert_eq!(order.status_history.len(), 2);
		assert!(order.is_consistent());
	}

	#[tokio::test]
	async fn test_appends_keep_sent_at_monotonic() {
		let machine = machine().await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;
		let now = Utc::now();
		let later = NotificationRecord::new(
			NotificationChannel::Sms,
			"+15550001",
			"a",
			"new_order_for_farmer",
			NotificationOutcome::Sent,
			now,
		);
		let earlier = NotificationRecord::new(
			NotificationChannel::Email,
			"asha@example.com",
			"b",
			"order_confirmation",
			NotificationOutcome::Failed,
			now - chrono::Duration::seconds(5),
		);
		machine.append_notification(&id, later).await.unwrap();
		let order = machine.append_notification(&id, earlier).await.unwrap();

		assert_eq!(order.notifications.len(), 2);
		assert!(order.notifications[1].sent_at >= order.notifications[0].sent_at);
		assert_eq!(order.status, OrderStatus::Pending);
	}

	/// Rejects the next `remaining` conditional order updates as if another
	/// writer had got there first.
	struct ContendedWrites {
		inner: MemoryStorage,
		remaining: AtomicUsize,
	}

	#[async_trait]
	impl StorageInterface for ContendedWrites {
		async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
			self.inner.get_bytes(key).await
		}
		async fn compare_and_set(
			&self,
			key: &str,
			expected: Option<u64>,
			value: Vec<u8>,
		) -> Result<u64, StorageError> {
			let contended = key.starts_with("orders:")
				&& expected.is_some()
				&& self
					.remaining
					.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
					.is_ok();
			if contended {
				return Err(StorageError::Conflict {
					key: key.to_string(),
					expected,
					actual: expected.map(|r| r + 1),
				});
			}
			self.inner.compare_and_set(key, expected, value).await
		}
		async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
			self.inner.set_bytes(key, value).await
		}
		async fn delete(&self, key: &str) -> Result<(), StorageError> {
			self.inner.delete(key).await
		}
		async fn exists(&self, key: &str) -> Result<bool, StorageError> {
			self.inner.exists(key).await
		}
		async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
			self.inner.keys(prefix).await
		}
		async fn ping(&self) -> Result<(), StorageError> {
			Ok(())
		}
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			self.inner.config_schema()
		}
	}

	fn contended(conflicts: usize) -> Box<dyn StorageInterface> {
		Box::new(ContendedWrites {
			inner: MemoryStorage::new(),
			remaining: AtomicUsize::new(conflicts),
		})
	}

	#[tokio::test]
	async fn test_transition_survives_a_few_lost_races() {
		let machine = machine_with(contended(3)).await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;

		let done = machine
			.transition(&id, &TransitionRequest::to(OrderStatus::Processing, "admin"))
			.await
			.unwrap();
		assert_eq!(done.from, OrderStatus::Pending);
		assert_eq!(done.order.status_history.len(), 2);
	}

	#[tokio::test]
	async fn test_exhausted_write_attempts_are_retryable() {
		let machine = machine_with(contended(50)).await;
		let id = machine
			.create_order(&request(None), "customer")
			.await
			.unwrap()
			.order
			.id;

		let err = machine
			.transition(&id, &TransitionRequest::to(OrderStatus::Processing, "admin"))
			.await
			.unwrap_err();
		assert!(matches!(err, OrderStateError::StoreUnavailable(_)));

		let record = NotificationRecord::new(
			NotificationChannel::Email,
			"asha@example.com",
			"hi",
			"order_confirmation",
			NotificationOutcome::Sent,
			Utc::now(),
		);
		assert!(matches!(
			machine.append_notification(&id, record).await,
			Err(OrderStateError::StoreUnavailable(_))
		));

		let order = machine.get_order(&id).await.unwrap();
		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.status_history.len(), 1);
		assert!(order.notifications.is_empty());
	}

	#[tokio::test]
	async fn test_stale_client_reference_is_reclaimed() {
		let machine = machine().await;
		let storage = machine.store.get().unwrap();
		// Index written, order never stored.
		storage
			.insert(StorageKey::OrderByClientRef.as_str(), "local-lost", &"ghost-order".to_string())
			.await
			.unwrap();

		let first = machine
			.create_order(&request(Some("local-lost")), "customer")
			.await
			.unwrap();
		assert!(first.is_new);
		assert_ne!(first.order.id, "ghost-order");

		let again = machine
			.create_order(&request(Some("local-lost")), "customer")
			.await
			.unwrap();
		assert!(!again.is_new);
		assert_eq!(again.order.id, first.order.id);
		assert_eq!(machine.list_order_ids().await.unwrap(), vec![first.order.id.clone()]);
		assert_eq!(
			machine
				.find_by_client_reference("local-lost")
				.await
				.unwrap()
				.map(|o| o.id),
			Some(first.order.id)
		);
	}
}
