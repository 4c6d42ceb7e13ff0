//! Catalog seeding.
//!
//! Products come from configuration and are written to the `products`
//! namespace whenever a store is connected, so order creation can resolve
//! them with a plain read.

use market_storage::{StorageError, StorageService};
use market_types::{CatalogProduct, StorageKey};
use tracing::info;

/// Writes every product, overwriting older copies. Returns how many were
/// written.
pub async fn seed_catalog(
	storage: &StorageService,
	products: &[CatalogProduct],
) -> Result<usize, StorageError> {
	for product in products {
		storage
			.store(StorageKey::Products.as_str(), &product.id, product)
			.await?;
	}
	if !products.is_empty() {
		info!(products = products.len(), "Catalog seeded");
	}
	Ok(products.len())
}

pub async fn lookup_product(
	storage: &StorageService,
	product_id: &str,
) -> Result<Option<CatalogProduct>, StorageError> {
	Ok(storage
		.try_retrieve(StorageKey::Products.as_str(), product_id)
		.await?
		.map(|found| found.value))
}

#[cfg(test)]
mod tests {
	use super::*;
	use market_storage::implementations::memory::MemoryStorage;
	use market_types::FarmerInfo;
	use rust_decimal::Decimal;

	#[tokio::test]
	async fn test_seed_then_lookup() {
		let storage = StorageService::new(Box::new(MemoryStorage::new()));
		let product = CatalogProduct {
			id: "eggs-dozen".to_string(),
			name: "Free range eggs".to_string(),
			unit: "dozen".to_string(),
			unit_price: Decimal::new(600, 2),
			farmer: FarmerInfo {
				id: "f2".to_string(),
				name: "Meera".to_string(),
				phone: None,
				email: Some("meera@example.com".to_string()),
			},
		};

		assert_eq!(seed_catalog(&storage, &[product.clone()]).await.unwrap(), 1);
		// Seeding twice is harmless.
		seed_catalog(&storage, &[product.clone()]).await.unwrap();

		assert_eq!(lookup_product(&storage, "eggs-dozen").await.unwrap(), Some(product));
		assert_eq!(lookup_product(&storage, "milk").await.unwrap(), None);
	}
}
