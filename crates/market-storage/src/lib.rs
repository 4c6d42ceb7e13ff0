//! Persistence for the order service.
//!
//! Backends store opaque byte records under string keys. Every record carries
//! a revision number that increases on each write, and writes can be made
//! conditional on the revision the caller last saw. The order state machine
//! builds its all-or-nothing updates on that compare-and-set primitive.
//!
//! [`gateway::connect`] picks the first reachable backend out of a prioritized
//! list of candidates.

use async_trait::async_trait;
use market_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod gateway;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use gateway::{connect, CandidateFailure, ConnectOutcome, FailureClass, StorageCandidate};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	/// A conditional write found a different revision than expected.
	#[error("Revision conflict on '{key}': expected {expected:?}, found {actual:?}")]
	Conflict {
		key: String,
		expected: Option<u64>,
		actual: Option<u64>,
	},
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// The backend location could not be reached.
	#[error("Store unreachable: {0}")]
	Unreachable(String),
	/// The backend refused access.
	#[error("Access denied: {0}")]
	AccessDenied(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl StorageError {
	pub fn is_conflict(&self) -> bool {
		matches!(self, StorageError::Conflict { .. })
	}
}

/// A value together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
	pub value: T,
	pub revision: u64,
}

/// Low-level interface every storage backend implements.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Returns the stored bytes and their revision.
	async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError>;

	/// Writes `value` only if the current revision equals `expected`
	/// (`None` meaning "key must not exist"). Returns the new revision.
	async fn compare_and_set(
		&self,
		key: &str,
		expected: Option<u64>,
		value: Vec<u8>,
	) -> Result<u64, StorageError>;

	/// Unconditional write. Returns the new revision.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError>;

	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// All keys starting with `prefix`, in no particular order.
	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Cheap liveness probe used by the gateway.
	async fn ping(&self) -> Result<(), StorageError>;

	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Constructor every storage implementation provides.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Every built-in storage implementation as `(name, factory)`.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Typed JSON access on top of a backend.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn key_for(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Reads a record and the revision it was read at.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let raw = self.backend.get_bytes(&key_for(namespace, id)).await?;
		let value = serde_json::from_slice(&raw.value)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;
		Ok(Versioned {
			value,
			revision: raw.revision,
		})
	}

	/// Like [`retrieve`](Self::retrieve) but maps a missing record to `None`.
	pub async fn try_retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<Versioned<T>>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(found) => Ok(Some(found)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Creates a record; fails with `Conflict` if the id is taken.
	pub async fn insert<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<u64, StorageError> {
		self.backend
			.compare_and_set(&key_for(namespace, id), None, encode(data)?)
			.await
	}

	/// Overwrites a record only if it is still at `revision`.
	pub async fn replace<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		revision: u64,
	) -> Result<u64, StorageError> {
		self.backend
			.compare_and_set(&key_for(namespace, id), Some(revision), encode(data)?)
			.await
	}

	/// Unconditional write, used for reference data such as the catalog.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<u64, StorageError> {
		self.backend
			.set_bytes(&key_for(namespace, id), encode(data)?)
			.await
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key_for(namespace, id)).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key_for(namespace, id)).await
	}

	/// Ids stored under `namespace`, sorted.
	pub async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let mut ids: Vec<String> = self
			.backend
			.keys(&prefix)
			.await?
			.into_iter()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect();
		ids.sort();
		Ok(ids)
	}

	pub async fn ping(&self) -> Result<(), StorageError> {
		self.backend.ping().await
	}

	pub fn config_schema(&self) -> Box<dyn ConfigSchema> {
		self.backend.config_schema()
	}
}
