//! HTTP server for the order API.
//!
//! Routes live under `/api`. Every request passes through request tracing,
//! CORS and a body size limit. A request that outlives the configured timeout
//! is answered with 503 while its work finishes in the background.

use axum::{
	extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
	http::{HeaderValue, Method, StatusCode},
	response::Json,
	routing::{get, post, put},
	Router,
};
use market_config::{ApiConfig, CorsConfig};
use market_core::MarketEngine;
use market_types::{
	APIError, CreateOrderRequest, CreateOrderResponse, HealthResponse, Order, UpdateStatusRequest,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<MarketEngine>,
	/// Upper bound on a single request.
	pub request_timeout: Duration,
}

fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let origins: Vec<HeaderValue> = cors
		.allowed_origins
		.iter()
		.filter_map(|origin| origin.parse().ok())
		.collect();
	let methods: Vec<Method> = cors
		.allowed_methods
		.iter()
		.filter_map(|method| method.parse().ok())
		.collect();

	let mut layer = CorsLayer::new().allow_origin(origins);
	layer = if methods.is_empty() {
		layer.allow_methods([Method::GET, Method::POST, Method::PUT])
	} else {
		layer.allow_methods(methods)
	};
	if cors.allowed_headers.is_empty() {
		layer.allow_headers(Any)
	} else {
		layer.allow_headers(
			cors.allowed_headers
				.iter()
				.filter_map(|header| header.parse::<axum::http::HeaderName>().ok())
				.collect::<Vec<_>>(),
		)
	}
}

/// Builds the router for `engine`.
pub fn router(engine: Arc<MarketEngine>, api_config: &ApiConfig) -> Router {
	let state = AppState {
		engine,
		request_timeout: Duration::from_secs(api_config.timeout_seconds.max(1)),
	};

	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_create_order))
				.route("/orders/{id}", get(handle_get_order))
				.route("/orders/{id}/status", put(handle_update_status))
				.route("/health", get(handle_health)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(api_config.cors.as_ref()))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(state)
}

/// Starts the HTTP server for the API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<MarketEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Order API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Runs `request` on its own task and waits at most the configured timeout
/// for it. A request that overruns keeps running to completion in the
/// background, so a committed write still gets its notifications.
async fn with_timeout<T, F>(state: &AppState, request: F) -> Result<T, APIError>
where
	F: Future<Output = Result<T, APIError>> + Send + 'static,
	T: Send + 'static,
{
	let task = tokio::spawn(request);
	match tokio::time::timeout(state.request_timeout, task).await {
		Ok(Ok(result)) => result,
		Ok(Err(e)) => Err(APIError::InternalServerError {
			error_type: "REQUEST_FAILED".to_string(),
			message: format!("Request task failed: {}", e),
		}),
		Err(_) => Err(APIError::ServiceUnavailable {
			error_type: "REQUEST_TIMEOUT".to_string(),
			message: format!(
				"Request did not complete within {}s and may still be applied; re-read the order before retrying",
				state.request_timeout.as_secs()
			),
			retry_after: Some(1),
		}),
	}
}

fn body_error(rejection: JsonRejection) -> APIError {
	APIError::BadRequest {
		error_type: "INVALID_BODY".to_string(),
		message: rejection.body_text(),
		details: None,
	}
}

/// Handles POST /api/orders requests.
///
/// Answers 201 for a new order and 200 when the client reference matched an
/// existing one.
async fn handle_create_order(
	State(state): State<AppState>,
	body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), APIError> {
	let Json(request) = body.map_err(body_error)?;
	let engine = Arc::clone(&state.engine);
	let (is_new, response) = with_timeout(&state, async move {
		crate::apis::order::create_order(&engine, request).await
	})
	.await
	.inspect_err(|e| tracing::warn!("Order creation failed: {}", e))?;
	let status = if is_new {
		StatusCode::CREATED
	} else {
		StatusCode::OK
	};
	Ok((status, Json(response)))
}

/// Handles PUT /api/orders/{id}/status requests.
async fn handle_update_status(
	Path(id): Path<String>,
	State(state): State<AppState>,
	body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Order>, APIError> {
	let Json(request) = body.map_err(body_error)?;
	let engine = Arc::clone(&state.engine);
	with_timeout(&state, async move {
		crate::apis::order::update_status(&engine, &id, request).await
	})
	.await
		.map(Json)
		.inspect_err(|e| tracing::warn!("Status update failed: {}", e))
}

/// Handles GET /api/orders/{id} requests.
async fn handle_get_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<Order>, APIError> {
	let engine = Arc::clone(&state.engine);
	with_timeout(&state, async move { crate::apis::order::get_order(&engine, &id).await })
		.await
		.map(Json)
}

/// Handles GET /api/health requests.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(crate::apis::order::health(&state.engine))
}
