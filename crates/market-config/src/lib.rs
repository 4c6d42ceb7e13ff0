//! Configuration for the farm market order service.
//!
//! Configuration is TOML. String values may reference environment variables
//! as `${NAME}` or `${NAME:-default}`, which keeps provider credentials out of
//! the file itself.
//!
//! ## Modular Configuration Support
//!
//! A file may pull in others with `include = ["storage.toml", "catalog.toml"]`.
//! Every top-level section must be defined in exactly one file.

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

pub use loader::ConfigLoader;

use market_types::{CatalogProduct, NotificationRule};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The full error embeds the whole input; keep only the message.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub market: MarketConfig,
	pub storage: StorageConfig,
	#[serde(default)]
	pub notifications: NotificationsConfig,
	#[serde(default)]
	pub catalog: CatalogConfig,
	pub api: Option<ApiConfig>,
}

/// Identity and order-write tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
	/// Name of this service instance, used in logs.
	pub id: String,
	/// How many times an order write is retried after a revision conflict
	/// before the caller gets a concurrency error.
	#[serde(default = "default_max_write_attempts")]
	pub max_write_attempts: u32,
}

fn default_max_write_attempts() -> u32 {
	5
}

/// Storage candidates and their backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Implementation names to try, highest priority first.
	pub candidates: Vec<String>,
	/// Backend settings keyed by implementation name. Each table may carry
	/// `connect_timeout_ms` for the gateway in addition to backend options.
	pub implementations: HashMap<String, toml::Value>,
	/// How often to retry the candidates while no store is connected.
	#[serde(default = "default_reconnect_interval")]
	pub reconnect_interval_seconds: u64,
}

fn default_reconnect_interval() -> u64 {
	30
}

/// Provider selection for one notification channel.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelConfig {
	/// Implementation used for this channel. Absent means the channel is
	/// disabled and every send on it is recorded as skipped.
	pub primary: Option<String>,
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

/// Notification dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
	/// Upper bound on a single provider call.
	#[serde(default = "default_notification_timeout")]
	pub timeout_seconds: u64,
	/// How often failed records are swept for retry. Zero disables the sweep.
	#[serde(default = "default_retry_interval")]
	pub retry_interval_seconds: u64,
	/// Attempts per notification, counting the first one.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default)]
	pub sms: ChannelConfig,
	#[serde(default)]
	pub email: ChannelConfig,
	/// Rules added to (or replacing) the built-in rule table.
	#[serde(default)]
	pub rules: Vec<NotificationRule>,
	#[serde(default)]
	pub replace_default_rules: bool,
}

impl Default for NotificationsConfig {
	fn default() -> Self {
		Self {
			timeout_seconds: default_notification_timeout(),
			retry_interval_seconds: default_retry_interval(),
			max_attempts: default_max_attempts(),
			sms: ChannelConfig::default(),
			email: ChannelConfig::default(),
			rules: Vec::new(),
			replace_default_rules: false,
		}
	}
}

fn default_notification_timeout() -> u64 {
	10
}

fn default_retry_interval() -> u64 {
	60
}

fn default_max_attempts() -> u32 {
	3
}

/// Products seeded into the store at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
	#[serde(default)]
	pub products: Vec<CatalogProduct>,
}

/// HTTP API server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	pub cors: Option<CorsConfig>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	pub allowed_origins: Vec<String>,
	#[serde(default)]
	pub allowed_headers: Vec<String>,
	#[serde(default)]
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Replaces `${NAME}` and `${NAME:-default}` with environment values.
///
/// Inputs over 1MB are rejected.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					name.as_str()
				)))
			},
		};
		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.market.id.is_empty() {
			return Err(ConfigError::Validation("Market ID cannot be empty".into()));
		}
		if self.market.max_write_attempts == 0 || self.market.max_write_attempts > 50 {
			return Err(ConfigError::Validation(
				"market.max_write_attempts must be between 1 and 50".into(),
			));
		}

		self.validate_storage()?;
		self.validate_notifications()?;
		self.validate_catalog()?;

		Ok(())
	}

	fn validate_storage(&self) -> Result<(), ConfigError> {
		if self.storage.candidates.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage candidate must be listed".into(),
			));
		}
		let mut seen = HashSet::new();
		for name in &self.storage.candidates {
			if !seen.insert(name) {
				return Err(ConfigError::Validation(format!(
					"Storage candidate '{}' is listed twice",
					name
				)));
			}
			if !self.storage.implementations.contains_key(name) {
				return Err(ConfigError::Validation(format!(
					"Storage candidate '{}' not found in storage.implementations",
					name
				)));
			}
		}
		if self.storage.reconnect_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"storage.reconnect_interval_seconds must be greater than 0".into(),
			));
		}
		Ok(())
	}

	fn validate_notifications(&self) -> Result<(), ConfigError> {
		let n = &self.notifications;
		if n.timeout_seconds == 0 || n.timeout_seconds > 120 {
			return Err(ConfigError::Validation(
				"notifications.timeout_seconds must be between 1 and 120".into(),
			));
		}
		if n.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"notifications.max_attempts must be at least 1".into(),
			));
		}
		for (label, channel) in [("sms", &n.sms), ("email", &n.email)] {
			if let Some(primary) = &channel.primary {
				if !channel.implementations.contains_key(primary) {
					return Err(ConfigError::Validation(format!(
						"Primary {} provider '{}' not found in notifications.{}.implementations",
						label, primary, label
					)));
				}
			}
		}
		if n.replace_default_rules && n.rules.is_empty() {
			return Err(ConfigError::Validation(
				"replace_default_rules is set but no notifications.rules are defined".into(),
			));
		}
		Ok(())
	}

	fn validate_catalog(&self) -> Result<(), ConfigError> {
		let mut ids = HashSet::new();
		for product in &self.catalog.products {
			if product.id.is_empty() {
				return Err(ConfigError::Validation(
					"Catalog product id cannot be empty".into(),
				));
			}
			if !ids.insert(product.id.as_str()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate catalog product '{}'",
					product.id
				)));
			}
			if product.unit_price.is_sign_negative() {
				return Err(ConfigError::Validation(format!(
					"Catalog product '{}' has a negative unit_price",
					product.id
				)));
			}
		}
		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
