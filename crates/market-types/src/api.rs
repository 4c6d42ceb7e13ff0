//! Request and response types for the order HTTP API.
//!
//! All payloads are camelCase JSON. Request bodies carry `validator` derives so
//! the handlers can reject malformed input before it reaches the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::{Order, OrderStatus};

/// Customer details submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomerContact {
	#[validate(length(min = 1, max = 200, message = "name must not be empty"))]
	pub name: String,
	#[validate(email(message = "email must be a valid address"))]
	pub email: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[validate(length(min = 5, max = 20, message = "phone must be 5 to 20 characters"))]
	pub phone: Option<String>,
}

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
	#[validate(nested)]
	pub customer: CustomerContact,
	#[validate(length(min = 1, message = "productId must not be empty"))]
	pub product_id: String,
	#[validate(custom(function = "validate_quantity"))]
	pub quantity: Decimal,
	#[validate(length(min = 1, max = 500, message = "deliveryAddress must not be empty"))]
	pub delivery_address: String,
	/// Idempotency key; resubmitting with the same value returns the
	/// order created the first time.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[validate(length(min = 1, max = 128))]
	pub client_reference: Option<String>,
}

fn validate_quantity(quantity: &Decimal) -> Result<(), validator::ValidationError> {
	if quantity.is_sign_positive() && !quantity.is_zero() {
		Ok(())
	} else {
		let mut err = validator::ValidationError::new("quantity");
		err.message = Some("quantity must be greater than zero".into());
		Err(err)
	}
}

/// Response of `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
	pub order_id: String,
	pub status: OrderStatus,
	pub order: Order,
}

/// Body of `PUT /api/orders/{id}/status`.
///
/// `status` and `expected_status` are kept as strings so an unknown value can
/// be reported as `INVALID_STATUS` rather than a generic body error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
	pub status: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[validate(length(max = 1000))]
	pub note: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[validate(length(min = 1, max = 100))]
	pub updated_by: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	#[validate(length(max = 4000))]
	pub admin_notes: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_status: Option<String>,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
	/// `"ok"` when a store is connected, `"degraded"` otherwise.
	pub status: String,
	/// Name of the connected storage candidate.
	pub store: Option<String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
	/// Machine readable code, e.g. `INVALID_TRANSITION`.
	pub error: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry_after: Option<u64>,
}

/// API error with its HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// 400
	BadRequest {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// 404
	NotFound { error_type: String, message: String },
	/// 409
	Conflict { error_type: String, message: String },
	/// 422
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// 503
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// 500
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	pub fn error_type(&self) -> &str {
		match self {
			APIError::BadRequest { error_type, .. }
			| APIError::NotFound { error_type, .. }
			| APIError::Conflict { error_type, .. }
			| APIError::UnprocessableEntity { error_type, .. }
			| APIError::ServiceUnavailable { error_type, .. }
			| APIError::InternalServerError { error_type, .. } => error_type,
		}
	}

	fn message(&self) -> &str {
		match self {
			APIError::BadRequest { message, .. }
			| APIError::NotFound { message, .. }
			| APIError::Conflict { message, .. }
			| APIError::UnprocessableEntity { message, .. }
			| APIError::ServiceUnavailable { message, .. }
			| APIError::InternalServerError { message, .. } => message,
		}
	}

	pub fn to_error_response(&self) -> ErrorResponse {
		let (details, retry_after) = match self {
			APIError::BadRequest { details, .. }
			| APIError::UnprocessableEntity { details, .. } => (details.clone(), None),
			APIError::ServiceUnavailable { retry_after, .. } => (None, *retry_after),
			_ => (None, None),
		};
		ErrorResponse {
			error: self.error_type().to_string(),
			message: self.message().to_string(),
			details,
			retry_after,
		}
	}

	/// Converts `validator` output into a 400 with per-field details.
	pub fn from_validation(errors: validator::ValidationErrors) -> Self {
		APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message: "Request body failed validation".to_string(),
			details: serde_json::to_value(&errors).ok(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			APIError::BadRequest { .. } => "Bad Request",
			APIError::NotFound { .. } => "Not Found",
			APIError::Conflict { .. } => "Conflict",
			APIError::UnprocessableEntity { .. } => "Unprocessable Entity",
			APIError::ServiceUnavailable { .. } => "Service Unavailable",
			APIError::InternalServerError { .. } => "Internal Server Error",
		};
		write!(f, "{}: {}", label, self.message())
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(quantity: Decimal, email: &str) -> CreateOrderRequest {
		CreateOrderRequest {
			customer: CustomerContact {
				name: "Asha".to_string(),
				email: email.to_string(),
				phone: None,
			},
			product_id: "tomato".to_string(),
			quantity,
			delivery_address: "12 Mill Road".to_string(),
			client_reference: None,
		}
	}

	#[test]
	fn test_create_request_validation() {
		assert!(request(Decimal::new(15, 1), "asha@example.com").validate().is_ok());
		assert!(request(Decimal::ZERO, "asha@example.com").validate().is_err());
		assert!(request(Decimal::from(-2), "asha@example.com").validate().is_err());
		assert!(request(Decimal::ONE, "not-an-email").validate().is_err());
	}

	#[test]
	fn test_create_request_from_camel_case_json() {
		let body = r#"{
			"customer": {"name": "Asha", "email": "asha@example.com"},
			"productId": "tomato",
			"quantity": "2.5",
			"deliveryAddress": "12 Mill Road",
			"clientReference": "local-123"
		}"#;
		let req: CreateOrderRequest = serde_json::from_str(body).unwrap();
		assert_eq!(req.quantity, Decimal::new(25, 1));
		assert_eq!(req.client_reference.as_deref(), Some("local-123"));
	}

	#[test]
	fn test_api_error_response_shape() {
		let err = APIError::ServiceUnavailable {
			error_type: "STORE_UNAVAILABLE".to_string(),
			message: "No storage backend reachable".to_string(),
			retry_after: Some(30),
		};
		assert_eq!(err.status_code(), 503);
		let json = serde_json::to_value(err.to_error_response()).unwrap();
		assert_eq!(json["error"], "STORE_UNAVAILABLE");
		assert_eq!(json["retryAfter"], 30);

		let err = APIError::Conflict {
			error_type: "INVALID_TRANSITION".to_string(),
			message: "Delivered -> Processing".to_string(),
		};
		assert_eq!(err.status_code(), 409);
		assert_eq!(err.to_string(), "Conflict: Delivered -> Processing");
	}
}
