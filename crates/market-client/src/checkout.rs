//! Checkout that keeps working while the order service is down.
//!
//! The server is always tried first. When it cannot be reached, times out or
//! answers 5xx, the checkout is kept as a [`LocalPendingOrder`] under a
//! `local-` id and shown to the customer as placed. A 4xx is a real answer
//! and is returned as an error. Pending orders are pushed to the server only
//! when [`Checkout::reconcile`] is called; the local id travels as the
//! `clientReference`, so a resubmission the server already accepted is not
//! duplicated.

use crate::cache::{LocalOrderCache, LocalPendingOrder};
use crate::client::OrderApiClient;
use crate::ClientError;
use market_notify::templates::render;
use market_notify::NotificationInterface;
use market_types::{
	mask_recipient, truncate_id, CatalogProduct, CreateOrderRequest, CreateOrderResponse,
	CustomerContact, MessageTemplate, NotificationChannel, Order,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a checkout.
#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
	/// The server created the order.
	Confirmed(CreateOrderResponse),
	/// The server was unreachable; the order is held locally.
	Pending(LocalPendingOrder),
}

impl CheckoutOutcome {
	/// The id to show the customer, server-assigned or local.
	pub fn order_id(&self) -> &str {
		match self {
			CheckoutOutcome::Confirmed(response) => &response.order_id,
			CheckoutOutcome::Pending(pending) => &pending.local_id,
		}
	}

	pub fn is_pending(&self) -> bool {
		matches!(self, CheckoutOutcome::Pending(_))
	}

	/// The order as the confirmation screen renders it.
	pub fn order(&self) -> Order {
		match self {
			CheckoutOutcome::Confirmed(response) => response.order.clone(),
			CheckoutOutcome::Pending(pending) => pending.preview(),
		}
	}
}

/// A pending order the server has now accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledOrder {
	pub local_id: String,
	pub order_id: String,
}

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
	pub confirmed: Vec<ReconciledOrder>,
	/// Local ids still waiting, with the error of this attempt.
	pub still_pending: Vec<(String, String)>,
}

pub struct Checkout {
	api: OrderApiClient,
	cache: LocalOrderCache,
	mailer: Option<Arc<dyn NotificationInterface>>,
}

impl Checkout {
	pub fn new(api: OrderApiClient, cache: LocalOrderCache) -> Self {
		Self {
			api,
			cache,
			mailer: None,
		}
	}

	/// Email provider used for the confirmation of locally held orders.
	pub fn with_mailer(mut self, mailer: Arc<dyn NotificationInterface>) -> Self {
		self.mailer = Some(mailer);
		self
	}

	pub fn cache(&self) -> &LocalOrderCache {
		&self.cache
	}

	/// Places an order for `quantity` of `product`.
	pub async fn place_order(
		&mut self,
		product: &CatalogProduct,
		customer: CustomerContact,
		quantity: Decimal,
		delivery_address: impl Into<String>,
	) -> Result<CheckoutOutcome, ClientError> {
		let request = CreateOrderRequest {
			customer,
			product_id: product.id.clone(),
			quantity,
			delivery_address: delivery_address.into(),
			client_reference: None,
		};

		match self.api.create_order(&request).await {
			Ok(response) => {
				info!(order_id = %truncate_id(&response.order_id), "Order confirmed by server");
				Ok(CheckoutOutcome::Confirmed(response))
			},
			Err(e) if e.is_fallback() => {
				let pending = LocalPendingOrder::from_checkout(request, product, &e);
				warn!(
					local_id = %pending.local_id,
					error = %e,
					"Order service unavailable, holding order locally"
				);
				self.cache.insert(pending.clone())?;
				self.send_local_confirmation(&pending);
				Ok(CheckoutOutcome::Pending(pending))
			},
			Err(e) => Err(e),
		}
	}

	/// Sends the confirmation email for a locally held order in the
	/// background. Failures are logged only.
	fn send_local_confirmation(&self, pending: &LocalPendingOrder) {
		let Some(mailer) = self.mailer.clone() else {
			return;
		};
		let preview = pending.preview();
		let recipient = preview.customer_info.email.clone();
		let message = render(
			MessageTemplate::OrderConfirmation,
			&preview,
			NotificationChannel::Email,
		);
		let local_id = pending.local_id.clone();
		tokio::spawn(async move {
			match mailer.send(&recipient, &message).await {
				Ok(_) => info!(
					%local_id,
					recipient = %mask_recipient(&recipient),
					"Sent local order confirmation"
				),
				Err(e) => warn!(%local_id, error = %e, "Local order confirmation failed"),
			}
		});
	}

	/// Resubmits every pending order once.
	///
	/// Orders the server accepts leave the cache; the rest stay with their
	/// attempt count and last error updated.
	pub async fn reconcile(&mut self) -> Result<ReconcileReport, ClientError> {
		let mut report = ReconcileReport::default();
		let pending: Vec<LocalPendingOrder> = self.cache.pending().to_vec();

		for order in pending {
			match self.api.create_order(&order.resubmission()).await {
				Ok(response) => {
					self.cache.remove(&order.local_id)?;
					info!(
						local_id = %order.local_id,
						order_id = %truncate_id(&response.order_id),
						"Reconciled pending order"
					);
					report.confirmed.push(ReconciledOrder {
						local_id: order.local_id,
						order_id: response.order_id,
					});
				},
				Err(e) => {
					warn!(local_id = %order.local_id, error = %e, "Pending order still not accepted");
					self.cache.record_failure(&order.local_id, &e)?;
					report.still_pending.push((order.local_id, e.to_string()));
				},
			}
		}
		Ok(report)
	}

	/// Drops a pending order at the customer's request.
	pub fn discard(&mut self, local_id: &str) -> Result<LocalPendingOrder, ClientError> {
		self.cache
			.remove(local_id)?
			.ok_or_else(|| ClientError::UnknownLocalOrder(local_id.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::is_local_id;
	use crate::client::ClientConfig;
	use axum::extract::State;
	use axum::http::StatusCode;
	use axum::routing::post;
	use axum::{Json, Router};
	use chrono::Utc;
	use market_notify::implementations::mock::{MockNotifier, MockNotifierConfig};
	use market_types::{CustomerInfo, ErrorResponse, FarmerInfo, OrderDetails, OrderStatus};
	use std::sync::atomic::{AtomicU16, Ordering};
	use std::time::Duration;
	use tokio::sync::Mutex;

	fn product() -> CatalogProduct {
		CatalogProduct {
			id: "eggs-dozen".to_string(),
			name: "Free range eggs".to_string(),
			unit: "dozen".to_string(),
			unit_price: Decimal::new(575, 2),
			farmer: FarmerInfo {
				id: "farmer-joao".to_string(),
				name: "Joao".to_string(),
				phone: Some("+15550004".to_string()),
				email: None,
			},
		}
	}

	fn customer() -> CustomerContact {
		CustomerContact {
			name: "Lee".to_string(),
			email: "lee@example.com".to_string(),
			phone: None,
		}
	}

	/// Stub order API answering with `status`; 201 answers echo an order.
	#[derive(Clone, Default)]
	struct Stub {
		status: Arc<AtomicU16>,
		references: Arc<Mutex<Vec<Option<String>>>>,
	}

	async fn create(
		State(stub): State<Stub>,
		Json(request): Json<CreateOrderRequest>,
	) -> Result<(StatusCode, Json<CreateOrderResponse>), (StatusCode, Json<ErrorResponse>)> {
		stub.references
			.lock()
			.await
			.push(request.client_reference.clone());
		let status = StatusCode::from_u16(stub.status.load(Ordering::SeqCst))
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		if status != StatusCode::CREATED {
			let error = if status.is_server_error() {
				"STORE_UNAVAILABLE"
			} else {
				"PRODUCT_NOT_FOUND"
			};
			return Err((
				status,
				Json(ErrorResponse {
					error: error.to_string(),
					message: "stubbed failure".to_string(),
					details: None,
					retry_after: None,
				}),
			));
		}
		let product = product();
		let order = Order::new(
			"0d6f1c2a-5b1e-4c55-9a77-2f1e0b8c3d4e",
			request.client_reference.clone(),
			CustomerInfo {
				name: request.customer.name,
				email: request.customer.email,
				phone: request.customer.phone,
				delivery_address: request.delivery_address,
			},
			product.farmer.clone(),
			OrderDetails::priced(
				product.id,
				product.name,
				request.quantity,
				product.unit,
				product.unit_price,
			),
			"customer",
			Utc::now(),
		);
		Ok((
			StatusCode::CREATED,
			Json(CreateOrderResponse {
				order_id: order.id.clone(),
				status: OrderStatus::Pending,
				order,
			}),
		))
	}

	async fn start_stub(status: u16) -> (String, Stub) {
		let stub = Stub::default();
		stub.status.store(status, Ordering::SeqCst);
		let app = Router::new()
			.route("/api/orders", post(create))
			.with_state(stub.clone());
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		(format!("http://{}", addr), stub)
	}

	/// A base URL nothing listens on.
	async fn dead_url() -> String {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);
		format!("http://{}", addr)
	}

	fn checkout(base_url: &str) -> Checkout {
		let config = ClientConfig::new(base_url).with_timeout(Duration::from_secs(2));
		Checkout::new(
			OrderApiClient::new(&config).unwrap(),
			LocalOrderCache::in_memory(),
		)
	}

	#[tokio::test]
	async fn test_unreachable_server_yields_local_pending_order() {
		let url = dead_url().await;
		let mut checkout = checkout(&url);

		let outcome = checkout
			.place_order(&product(), customer(), Decimal::from(3), "1 Barn Way")
			.await
			.unwrap();

		assert!(outcome.is_pending());
		assert!(is_local_id(outcome.order_id()));
		let CheckoutOutcome::Pending(pending) = &outcome else {
			panic!("expected a pending order");
		};
		assert_eq!(pending.item.product_id, "eggs-dozen");
		assert_eq!(pending.item.quantity, Decimal::from(3));
		assert_eq!(pending.item.unit_price, Decimal::new(575, 2));
		assert_eq!(pending.total, Decimal::new(1725, 2));
		assert!(pending.last_error.is_some());

		let shown = outcome.order();
		assert_eq!(shown.status, OrderStatus::Pending);
		assert_eq!(shown.order_details.total, pending.total);
		assert_eq!(checkout.cache().len(), 1);
	}

	#[tokio::test]
	async fn test_server_error_falls_back_and_client_error_does_not() {
		let (url, stub) = start_stub(503).await;
		let mut checkout = checkout(&url);
		let outcome = checkout
			.place_order(&product(), customer(), Decimal::ONE, "1 Barn Way")
			.await
			.unwrap();
		assert!(outcome.is_pending());

		stub.status.store(422, Ordering::SeqCst);
		let rejected = checkout
			.place_order(&product(), customer(), Decimal::ONE, "1 Barn Way")
			.await;
		match rejected {
			Err(ClientError::Rejected { status, body }) => {
				assert_eq!(status, 422);
				assert_eq!(body.error, "PRODUCT_NOT_FOUND");
			},
			other => panic!("expected a rejection, got {:?}", other.map(|o| o.is_pending())),
		}
		assert_eq!(checkout.cache().len(), 1);
	}

	#[tokio::test]
	async fn test_confirmed_checkout_skips_cache() {
		let (url, _stub) = start_stub(201).await;
		let mut checkout = checkout(&url);
		let outcome = checkout
			.place_order(&product(), customer(), Decimal::from(2), "1 Barn Way")
			.await
			.unwrap();
		assert!(!outcome.is_pending());
		assert!(!is_local_id(outcome.order_id()));
		assert!(checkout.cache().is_empty());
	}

	#[tokio::test]
	async fn test_reconcile_resubmits_with_client_reference() {
		let (url, stub) = start_stub(503).await;
		let mut checkout = checkout(&url);
		let outcome = checkout
			.place_order(&product(), customer(), Decimal::from(2), "1 Barn Way")
			.await
			.unwrap();
		let local_id = outcome.order_id().to_string();

		let report = checkout.reconcile().await.unwrap();
		assert!(report.confirmed.is_empty());
		assert_eq!(report.still_pending.len(), 1);
		assert_eq!(checkout.cache().get(&local_id).unwrap().attempts, 2);

		stub.status.store(201, Ordering::SeqCst);
		let report = checkout.reconcile().await.unwrap();
		assert_eq!(report.confirmed.len(), 1);
		assert_eq!(report.confirmed[0].local_id, local_id);
		assert!(checkout.cache().is_empty());

		let references = stub.references.lock().await.clone();
		assert_eq!(references.len(), 3);
		assert_eq!(references[0], None);
		assert_eq!(references[2].as_deref(), Some(local_id.as_str()));
	}

	#[tokio::test]
	async fn test_discard_removes_pending_order() {
		let url = dead_url().await;
		let mut checkout = checkout(&url);
		let outcome = checkout
			.place_order(&product(), customer(), Decimal::ONE, "1 Barn Way")
			.await
			.unwrap();
		let local_id = outcome.order_id().to_string();

		let discarded = checkout.discard(&local_id).unwrap();
		assert_eq!(discarded.local_id, local_id);
		assert!(checkout.cache().is_empty());
		assert!(matches!(
			checkout.discard(&local_id),
			Err(ClientError::UnknownLocalOrder(_))
		));
	}

	#[tokio::test]
	async fn test_local_confirmation_email_is_best_effort() {
		let url = dead_url().await;
		let mailer = Arc::new(MockNotifier::new(MockNotifierConfig::default()));
		let mut checkout = checkout(&url).with_mailer(mailer.clone());

		let outcome = checkout
			.place_order(&product(), customer(), Decimal::ONE, "1 Barn Way")
			.await
			.unwrap();
		assert!(outcome.is_pending());

		let mut sent = Vec::new();
		for _ in 0..50 {
			sent = mailer.sent().await;
			if !sent.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].0, "lee@example.com");
		assert!(sent[0].1.html.is_some());

		let failing = Arc::new(MockNotifier::new(MockNotifierConfig {
			fail: true,
			..MockNotifierConfig::default()
		}));
		let mut checkout = self::checkout(&url).with_mailer(failing);
		let outcome = checkout
			.place_order(&product(), customer(), Decimal::ONE, "1 Barn Way")
			.await
			.unwrap();
		assert!(outcome.is_pending());
	}
}
