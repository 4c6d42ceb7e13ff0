//! Order endpoints.
//!
//! Handlers validate the request body, call the engine, and map
//! [`OrderStateError`] onto the HTTP error contract.

use market_core::{MarketEngine, OrderStateError, TransitionRequest};
use market_types::{
	APIError, CreateOrderRequest, CreateOrderResponse, HealthResponse, Order, OrderStatus,
	UpdateStatusRequest,
};
use validator::Validate;

/// Actor recorded on the history entry when the caller names none.
const DEFAULT_ACTOR: &str = "admin";

/// Maps an engine error onto the API error contract.
pub fn api_error(e: OrderStateError, retry_after: u64) -> APIError {
	match e {
		OrderStateError::InvalidTransition { .. } => APIError::Conflict {
			error_type: "INVALID_TRANSITION".to_string(),
			message: e.to_string(),
		},
		OrderStateError::ConcurrentConflict(_) => APIError::Conflict {
			error_type: "CONCURRENT_CONFLICT".to_string(),
			message: e.to_string(),
		},
		OrderStateError::StoreUnavailable(_) => APIError::ServiceUnavailable {
			error_type: "STORE_UNAVAILABLE".to_string(),
			message: e.to_string(),
			retry_after: Some(retry_after),
		},
		OrderStateError::OrderNotFound(_) => APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message: e.to_string(),
		},
		OrderStateError::ProductNotFound(_) => APIError::UnprocessableEntity {
			error_type: "PRODUCT_NOT_FOUND".to_string(),
			message: e.to_string(),
			details: None,
		},
		OrderStateError::Validation(_) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message: e.to_string(),
			details: None,
		},
		OrderStateError::Storage(_) => APIError::InternalServerError {
			error_type: "STORAGE_ERROR".to_string(),
			message: e.to_string(),
		},
	}
}

fn parse_status(field: &str, value: &str) -> Result<OrderStatus, APIError> {
	value.parse::<OrderStatus>().map_err(|_| APIError::BadRequest {
		error_type: "INVALID_STATUS".to_string(),
		message: format!(
			"{} '{}' is not one of: {}",
			field,
			value,
			OrderStatus::all()
				.map(|s| s.as_str())
				.collect::<Vec<_>>()
				.join(", ")
		),
		details: None,
	})
}

fn retry_after(engine: &MarketEngine) -> u64 {
	engine.config().storage.reconnect_interval_seconds.max(1)
}

/// Creates an order. Returns whether it is new; a repeated client
/// reference returns the existing order.
pub async fn create_order(
	engine: &MarketEngine,
	request: CreateOrderRequest,
) -> Result<(bool, CreateOrderResponse), APIError> {
	request.validate().map_err(APIError::from_validation)?;

	let created = engine
		.create_order(request)
		.await
		.map_err(|e| api_error(e, retry_after(engine)))?;
	Ok((
		created.is_new,
		CreateOrderResponse {
			order_id: created.order.id.clone(),
			status: created.order.status,
			order: created.order,
		},
	))
}

/// Applies a status change and returns the updated order.
pub async fn update_status(
	engine: &MarketEngine,
	order_id: &str,
	request: UpdateStatusRequest,
) -> Result<Order, APIError> {
	request.validate().map_err(APIError::from_validation)?;

	let target = parse_status("status", &request.status)?;
	let expected_status = request
		.expected_status
		.as_deref()
		.map(|value| parse_status("expectedStatus", value))
		.transpose()?;

	let transition = TransitionRequest {
		target,
		actor: request
			.updated_by
			.unwrap_or_else(|| DEFAULT_ACTOR.to_string()),
		note: request.note,
		admin_notes: request.admin_notes,
		expected_status,
	};

	engine
		.transition(order_id, transition)
		.await
		.map_err(|e| api_error(e, retry_after(engine)))
}

pub async fn get_order(engine: &MarketEngine, order_id: &str) -> Result<Order, APIError> {
	engine
		.get_order(order_id)
		.await
		.map_err(|e| api_error(e, retry_after(engine)))
}

pub fn health(engine: &MarketEngine) -> HealthResponse {
	let store = engine.store_candidate();
	HealthResponse {
		status: if store.is_some() { "ok" } else { "degraded" }.to_string(),
		store,
	}
}
