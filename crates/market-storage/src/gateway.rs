//! Persistence gateway: connect to the first reachable storage candidate.
//!
//! Candidates are tried strictly in priority order. Each one gets a bounded
//! time to build its backend and answer a `ping`; later candidates get less
//! time than earlier ones. When nothing answers the caller receives
//! [`ConnectOutcome::Unavailable`] rather than an error and is expected to keep
//! running in degraded mode.

use crate::{StorageError, StorageFactory, StorageService};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound for the first candidate when none is configured.
const BASE_TIMEOUT_MS: u64 = 10_000;
/// Lower bound for any default timeout.
const MIN_TIMEOUT_MS: u64 = 1_000;

/// One storage implementation to try.
#[derive(Clone)]
pub struct StorageCandidate {
	pub name: String,
	pub factory: StorageFactory,
	/// The implementation's table from `storage.implementations.<name>`.
	pub config: toml::Value,
	/// Explicit `connect_timeout_ms`, if configured.
	pub connect_timeout: Option<Duration>,
}

impl StorageCandidate {
	/// Builds a candidate, reading `connect_timeout_ms` from its table.
	pub fn new(name: impl Into<String>, factory: StorageFactory, config: toml::Value) -> Self {
		let connect_timeout = config
			.get("connect_timeout_ms")
			.and_then(|v| v.as_integer())
			.filter(|ms| *ms > 0)
			.map(|ms| Duration::from_millis(ms as u64));
		Self {
			name: name.into(),
			factory,
			config,
			connect_timeout,
		}
	}
}

impl fmt::Debug for StorageCandidate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StorageCandidate")
			.field("name", &self.name)
			.field("connect_timeout", &self.connect_timeout)
			.finish()
	}
}

/// Why a candidate was rejected. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
	NetworkUnreachable,
	AuthenticationRejected,
	Timeout,
	ConfigurationMissing,
}

impl fmt::Display for FailureClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			FailureClass::NetworkUnreachable => "network_unreachable",
			FailureClass::AuthenticationRejected => "authentication_rejected",
			FailureClass::Timeout => "timeout",
			FailureClass::ConfigurationMissing => "configuration_missing",
		})
	}
}

impl FailureClass {
	fn of(error: &StorageError) -> Self {
		match error {
			StorageError::Configuration(_) => FailureClass::ConfigurationMissing,
			StorageError::AccessDenied(_) => FailureClass::AuthenticationRejected,
			_ => FailureClass::NetworkUnreachable,
		}
	}
}

#[derive(Debug, Clone)]
pub struct CandidateFailure {
	pub candidate: String,
	pub class: FailureClass,
	pub detail: String,
}

impl fmt::Display for CandidateFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({}): {}", self.candidate, self.class, self.detail)
	}
}

/// Result of [`connect`].
pub enum ConnectOutcome {
	Connected {
		service: Arc<StorageService>,
		candidate: String,
	},
	/// Every candidate failed; one entry per candidate, in order.
	Unavailable { failures: Vec<CandidateFailure> },
}

impl fmt::Debug for ConnectOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectOutcome::Connected { candidate, .. } => {
				f.debug_struct("Connected").field("candidate", candidate).finish()
			},
			ConnectOutcome::Unavailable { failures } => {
				f.debug_struct("Unavailable").field("failures", failures).finish()
			},
		}
	}
}

/// Per-candidate timeouts, in order.
///
/// The default for position `i` is `max(1s, 10s >> i)`. An explicit timeout is
/// honored but never allowed to exceed the previous candidate's timeout.
pub fn candidate_timeouts(candidates: &[StorageCandidate]) -> Vec<Duration> {
	let mut timeouts: Vec<Duration> = Vec::with_capacity(candidates.len());
	for (index, candidate) in candidates.iter().enumerate() {
		let default = Duration::from_millis(
			BASE_TIMEOUT_MS
				.checked_shr(index as u32)
				.unwrap_or(0)
				.max(MIN_TIMEOUT_MS),
		);
		let wanted = candidate.connect_timeout.unwrap_or(default);
		let effective = match timeouts.last() {
			Some(previous) => wanted.min(*previous),
			None => wanted,
		};
		timeouts.push(effective);
	}
	timeouts
}

async fn dial(candidate: &StorageCandidate, limit: Duration) -> Result<StorageService, CandidateFailure> {
	let failure = |class: FailureClass, detail: String| CandidateFailure {
		candidate: candidate.name.clone(),
		class,
		detail,
	};

	let attempt = async {
		let backend = (candidate.factory)(&candidate.config)?;
		backend
			.config_schema()
			.validate(&candidate.config)
			.map_err(|e| StorageError::Configuration(e.to_string()))?;
		backend.ping().await?;
		Ok::<_, StorageError>(StorageService::new(backend))
	};

	match tokio::time::timeout(limit, attempt).await {
		Ok(Ok(service)) => Ok(service),
		Ok(Err(e)) => Err(failure(FailureClass::of(&e), e.to_string())),
		Err(_) => Err(failure(
			FailureClass::Timeout,
			format!("no answer within {}ms", limit.as_millis()),
		)),
	}
}

/// Tries each candidate in order and returns the first that answers.
pub async fn connect(candidates: &[StorageCandidate]) -> ConnectOutcome {
	let timeouts = candidate_timeouts(candidates);
	let mut failures = Vec::new();

	for (candidate, limit) in candidates.iter().zip(timeouts) {
		match dial(candidate, limit).await {
			Ok(service) => {
				info!(
					component = "storage",
					candidate = %candidate.name,
					skipped = failures.len(),
					"Storage candidate connected"
				);
				return ConnectOutcome::Connected {
					service: Arc::new(service),
					candidate: candidate.name.clone(),
				};
			},
			Err(failure) => {
				warn!(
					component = "storage",
					candidate = %failure.candidate,
					class = %failure.class,
					detail = %failure.detail,
					"Storage candidate failed"
				);
				failures.push(failure);
			},
		}
	}

	warn!(
		component = "storage",
		tried = failures.len(),
		"No storage candidate reachable, running degraded"
	);
	ConnectOutcome::Unavailable { failures }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory;
	use crate::{StorageInterface, Versioned};
	use async_trait::async_trait;
	use market_types::{ConfigSchema, ValidationError};

	/// Backend whose `ping` never returns in time.
	struct Hanging;

	struct Permissive;

	impl ConfigSchema for Permissive {
		fn validate(&self, _config: &toml::Value) -> Result<(), ValidationError> {
			Ok(())
		}
	}

	#[async_trait]
	impl StorageInterface for Hanging {
		async fn get_bytes(&self, _key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
			Err(StorageError::NotFound)
		}
		async fn compare_and_set(
			&self,
			_key: &str,
			_expected: Option<u64>,
			_value: Vec<u8>,
		) -> Result<u64, StorageError> {
			Err(StorageError::Unreachable("hanging".into()))
		}
		async fn set_bytes(&self, _key: &str, _value: Vec<u8>) -> Result<u64, StorageError> {
			Err(StorageError::Unreachable("hanging".into()))
		}
		async fn delete(&self, _key: &str) -> Result<(), StorageError> {
			Ok(())
		}
		async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
			Ok(false)
		}
		async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
			Ok(Vec::new())
		}
		async fn ping(&self) -> Result<(), StorageError> {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(())
		}
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(Permissive)
		}
	}

	fn hanging(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
		Ok(Box::new(Hanging))
	}

	fn unreachable(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
		Err(StorageError::Unreachable("connection refused".into()))
	}

	fn rejected(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
		Err(StorageError::AccessDenied("bad credentials".into()))
	}

	fn empty() -> toml::Value {
		toml::Value::Table(toml::Table::new())
	}

	fn with_timeout(ms: i64) -> toml::Value {
		let mut table = toml::Table::new();
		table.insert("connect_timeout_ms".into(), toml::Value::Integer(ms));
		toml::Value::Table(table)
	}

	#[test]
	fn test_default_timeouts_shrink_with_priority() {
		let candidates: Vec<_> = (0..6)
			.map(|i| StorageCandidate::new(format!("c{}", i), memory::create_storage, empty()))
			.collect();
		let ms: Vec<u128> = candidate_timeouts(&candidates)
			.iter()
			.map(|d| d.as_millis())
			.collect();
		assert_eq!(ms, vec![10_000, 5_000, 2_500, 1_250, 1_000, 1_000]);
	}

	#[test]
	fn test_explicit_timeout_clamped_to_previous() {
		let candidates = vec![
			StorageCandidate::new("primary", memory::create_storage, with_timeout(300)),
			StorageCandidate::new("secondary", memory::create_storage, with_timeout(2_000)),
			StorageCandidate::new("tertiary", memory::create_storage, empty()),
		];
		let ms: Vec<u128> = candidate_timeouts(&candidates)
			.iter()
			.map(|d| d.as_millis())
			.collect();
		assert_eq!(ms, vec![300, 300, 300]);
	}

	#[tokio::test]
	async fn test_falls_through_to_first_reachable_candidate() {
		let candidates = vec![
			StorageCandidate::new("remote", unreachable, empty()),
			StorageCandidate::new("memory", memory::create_storage, empty()),
		];
		match connect(&candidates).await {
			ConnectOutcome::Connected { candidate, service } => {
				assert_eq!(candidate, "memory");
				service.ping().await.unwrap();
			},
			other => panic!("expected a connection, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_all_failures_are_classified() {
		let candidates = vec![
			StorageCandidate::new("remote", unreachable, empty()),
			StorageCandidate::new("secured", rejected, empty()),
			StorageCandidate::new("slow", hanging, with_timeout(20)),
			StorageCandidate::new("file", crate::implementations::file::create_storage, empty()),
		];
		let ConnectOutcome::Unavailable { failures } = connect(&candidates).await else {
			panic!("expected every candidate to fail");
		};
		let classes: Vec<FailureClass> = failures.iter().map(|f| f.class).collect();
		assert_eq!(
			classes,
			vec![
				FailureClass::NetworkUnreachable,
				FailureClass::AuthenticationRejected,
				FailureClass::Timeout,
				FailureClass::ConfigurationMissing,
			]
		);
		assert_eq!(failures[2].candidate, "slow");
	}

	#[tokio::test]
	async fn test_first_candidate_wins_when_healthy() {
		let candidates = vec![
			StorageCandidate::new("memory", memory::create_storage, empty()),
			StorageCandidate::new("remote", unreachable, empty()),
		];
		let outcome = connect(&candidates).await;
		assert!(matches!(outcome, ConnectOutcome::Connected { ref candidate, .. } if candidate == "memory"));
	}
}
