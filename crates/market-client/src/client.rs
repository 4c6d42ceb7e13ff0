//! Thin HTTP client for the order API.
//!
//! Every call carries the configured timeout. Failures are sorted into the
//! kinds checkout cares about: unreachable, timed out, 5xx, or a real
//! rejection carrying the server's error body.

use crate::ClientError;
use market_types::{
	CreateOrderRequest, CreateOrderResponse, ErrorResponse, Order,
	UpdateStatusRequest,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the order API lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
	pub base_url: String,
	#[serde(default = "default_timeout_seconds")]
	pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
	8
}

impl ClientConfig {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			timeout_seconds: default_timeout_seconds(),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout_seconds = timeout.as_secs().max(1);
		self
	}

	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_seconds)
	}
}

pub struct OrderApiClient {
	client: reqwest::Client,
	base_url: String,
	timeout: Duration,
}

impl OrderApiClient {
	pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
		let timeout = config.timeout();
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ClientError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			base_url: config.base_url.trim_end_matches('/').to_string(),
			timeout,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	fn classify(&self, e: reqwest::Error) -> ClientError {
		if e.is_timeout() {
			ClientError::Timeout(self.timeout)
		} else {
			ClientError::Unreachable(e.to_string())
		}
	}

	async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
		let status = response.status();
		if status.is_success() {
			return response
				.json::<T>()
				.await
				.map_err(|e| ClientError::Decode(e.to_string()));
		}

		let text = response.text().await.unwrap_or_default();
		let body = serde_json::from_str::<ErrorResponse>(&text).unwrap_or_else(|_| ErrorResponse {
			error: status
				.canonical_reason()
				.unwrap_or("UNKNOWN")
				.to_uppercase()
				.replace(' ', "_"),
			message: text.clone(),
			details: None,
			retry_after: None,
		});
		if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
			Err(ClientError::Unavailable {
				status: status.as_u16(),
				message: body.message,
			})
		} else {
			Err(ClientError::Rejected {
				status: status.as_u16(),
				body,
			})
		}
	}

	/// `POST /api/orders`.
	pub async fn create_order(
		&self,
		request: &CreateOrderRequest,
	) -> Result<CreateOrderResponse, ClientError> {
		let response = self
			.client
			.post(self.url("/api/orders"))
			.json(request)
			.send()
			.await
			.map_err(|e| self.classify(e))?;
		Self::decode(response).await
	}

	/// `GET /api/orders/{id}`.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, ClientError> {
		let response = self
			.client
			.get(self.url(&format!("/api/orders/{}", order_id)))
			.send()
			.await
			.map_err(|e| self.classify(e))?;
		Self::decode(response).await
	}

	/// `PUT /api/orders/{id}/status`.
	pub async fn update_status(
		&self,
		order_id: &str,
		request: &UpdateStatusRequest,
	) -> Result<Order, ClientError> {
		let response = self
			.client
			.put(self.url(&format!("/api/orders/{}/status", order_id)))
			.json(request)
			.send()
			.await
			.map_err(|e| self.classify(e))?;
		Self::decode(response).await
	}
}
