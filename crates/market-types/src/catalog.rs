//! Read-only catalog entries used to price and route new orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::FarmerInfo;

/// A product listed by a farmer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
	pub id: String,
	pub name: String,
	pub unit: String,
	#[serde(alias = "unit_price")]
	pub unit_price: Decimal,
	pub farmer: FarmerInfo,
}
