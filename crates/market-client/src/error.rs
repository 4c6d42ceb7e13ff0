use market_types::ErrorResponse;
use thiserror::Error;

/// Errors surfaced by the order API client and the checkout flow.
#[derive(Debug, Error)]
pub enum ClientError {
	/// The server could not be reached at all.
	#[error("Order service unreachable: {0}")]
	Unreachable(String),
	#[error("Order service did not answer within {0:?}")]
	Timeout(std::time::Duration),
	/// The server answered with a 5xx status.
	#[error("Order service unavailable ({status}): {message}")]
	Unavailable { status: u16, message: String },
	/// The server refused the request (4xx). Not retried, not cached.
	#[error("Order rejected ({status}): {}", .body.message)]
	Rejected { status: u16, body: ErrorResponse },
	#[error("Invalid response: {0}")]
	Decode(String),
	#[error("Local order cache error: {0}")]
	Cache(String),
	#[error("No pending order with id '{0}'")]
	UnknownLocalOrder(String),
}

impl ClientError {
	/// True when checkout should fall back to a local pending order.
	pub fn is_fallback(&self) -> bool {
		matches!(
			self,
			ClientError::Unreachable(_) | ClientError::Timeout(_) | ClientError::Unavailable { .. }
		)
	}
}
