//! Session-local store of orders the server has not confirmed yet.
//!
//! A [`LocalPendingOrder`] keeps the complete checkout payload so it can be
//! resubmitted later without loss. The cache optionally mirrors itself to a
//! JSON file, written through a temp file and rename.

use crate::ClientError;
use chrono::{DateTime, Utc};
use market_types::{
	CatalogProduct, CreateOrderRequest, CustomerInfo, FarmerInfo, Order, OrderDetails,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Prefix that marks an order id as locally assigned.
pub const LOCAL_ID_PREFIX: &str = "local-";

pub fn is_local_id(id: &str) -> bool {
	id.starts_with(LOCAL_ID_PREFIX)
}

/// The ordered item as priced at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
	pub product_id: String,
	pub product_name: String,
	pub farmer: FarmerInfo,
	pub quantity: Decimal,
	pub unit: String,
	pub unit_price: Decimal,
}

impl PendingItem {
	/// Line details priced exactly as the server prices a new order.
	pub fn details(&self) -> OrderDetails {
		OrderDetails::priced(
			self.product_id.clone(),
			self.product_name.clone(),
			self.quantity,
			self.unit.clone(),
			self.unit_price,
		)
	}
}

/// A checkout the server has not acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalPendingOrder {
	pub local_id: String,
	/// Exactly what was sent to the server the first time.
	pub request: CreateOrderRequest,
	pub item: PendingItem,
	pub total: Decimal,
	pub created_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	/// Server submissions made so far, including the checkout call.
	pub attempts: u32,
}

impl LocalPendingOrder {
	/// Builds a pending order for a checkout that could not reach the server.
	///
	/// The total is priced by [`OrderDetails::priced`], as on the server.
	pub fn from_checkout(
		request: CreateOrderRequest,
		product: &CatalogProduct,
		error: &ClientError,
	) -> Self {
		let item = PendingItem {
			product_id: product.id.clone(),
			product_name: product.name.clone(),
			farmer: product.farmer.clone(),
			quantity: request.quantity,
			unit: product.unit.clone(),
			unit_price: product.unit_price,
		};
		let total = item.details().total;
		Self {
			local_id: format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()),
			item,
			request,
			total,
			created_at: Utc::now(),
			last_error: Some(error.to_string()),
			attempts: 1,
		}
	}

	/// The payload to resubmit, keyed by the local id so the server can
	/// recognise a repeat.
	pub fn resubmission(&self) -> CreateOrderRequest {
		CreateOrderRequest {
			client_reference: Some(self.local_id.clone()),
			..self.request.clone()
		}
	}

	/// An `Order` view of this checkout, for confirmation screens and the
	/// local confirmation email.
	pub fn preview(&self) -> Order {
		let customer = &self.request.customer;
		Order::new(
			self.local_id.clone(),
			Some(self.local_id.clone()),
			CustomerInfo {
				name: customer.name.clone(),
				email: customer.email.clone(),
				phone: customer.phone.clone(),
				delivery_address: self.request.delivery_address.clone(),
			},
			self.item.farmer.clone(),
			self.item.details(),
			"customer",
			self.created_at,
		)
	}
}

/// Pending orders owned by one client session.
///
/// Deliberately not `Clone`: every mutation goes through `&mut self`.
#[derive(Debug, Default)]
pub struct LocalOrderCache {
	path: Option<PathBuf>,
	orders: Vec<LocalPendingOrder>,
}

impl LocalOrderCache {
	/// A cache that lives only as long as the session.
	pub fn in_memory() -> Self {
		Self::default()
	}

	/// Opens a file-backed cache, loading any orders saved earlier.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
		let path = path.into();
		let orders = match fs::read(&path) {
			Ok(data) => serde_json::from_slice(&data)
				.map_err(|e| ClientError::Cache(format!("{}: {}", path.display(), e)))?,
			Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
			Err(e) => return Err(ClientError::Cache(format!("{}: {}", path.display(), e))),
		};
		Ok(Self {
			path: Some(path),
			orders,
		})
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	pub fn len(&self) -> usize {
		self.orders.len()
	}

	pub fn is_empty(&self) -> bool {
		self.orders.is_empty()
	}

	/// Pending orders, oldest first.
	pub fn pending(&self) -> &[LocalPendingOrder] {
		&self.orders
	}

	pub fn get(&self, local_id: &str) -> Option<&LocalPendingOrder> {
		self.orders.iter().find(|o| o.local_id == local_id)
	}

	pub fn insert(&mut self, order: LocalPendingOrder) -> Result<(), ClientError> {
		self.orders.retain(|o| o.local_id != order.local_id);
		self.orders.push(order);
		self.persist()
	}

	/// Records a failed resubmission.
	pub fn record_failure(&mut self, local_id: &str, error: &ClientError) -> Result<(), ClientError> {
		let order = self
			.orders
			.iter_mut()
			.find(|o| o.local_id == local_id)
			.ok_or_else(|| ClientError::UnknownLocalOrder(local_id.to_string()))?;
		order.attempts += 1;
		order.last_error = Some(error.to_string());
		self.persist()
	}

	pub fn remove(&mut self, local_id: &str) -> Result<Option<LocalPendingOrder>, ClientError> {
		let Some(index) = self.orders.iter().position(|o| o.local_id == local_id) else {
			return Ok(None);
		};
		let removed = self.orders.remove(index);
		self.persist()?;
		Ok(Some(removed))
	}

	fn persist(&self) -> Result<(), ClientError> {
		let Some(path) = &self.path else {
			return Ok(());
		};
		let data = serde_json::to_vec_pretty(&self.orders)
			.map_err(|e| ClientError::Cache(e.to_string()))?;
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, data)
			.and_then(|_| fs::rename(&temp_path, path))
			.map_err(|e| ClientError::Cache(format!("{}: {}", path.display(), e)))
	}
}
