//! Storage namespaces used by the order service.

use std::str::FromStr;

/// Namespaces under which records are kept in the key/value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records, keyed by order id.
	Orders,
	/// Client reference to order id index used for idempotent checkout.
	OrderByClientRef,
	/// Catalog products, keyed by product id.
	Products,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderByClientRef => "order_by_client_ref",
			StorageKey::Products => "products",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Orders, Self::OrderByClientRef, Self::Products].into_iter()
	}

	/// Full store key for `id` in this namespace, `"<namespace>:<id>"`.
	pub fn key(&self, id: &str) -> String {
		format!("{}:{}", self.as_str(), id)
	}

	/// Prefix matching every key of this namespace.
	pub fn prefix(&self) -> String {
		format!("{}:", self.as_str())
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		StorageKey::all().find(|k| k.as_str() == s).ok_or(())
	}
}
