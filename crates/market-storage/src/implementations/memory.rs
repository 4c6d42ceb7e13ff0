//! In-memory storage backend.
//!
//! Records live in a `HashMap` for the lifetime of the process. Useful for
//! tests, demos and as the last-resort candidate behind a durable store.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry, Versioned};
use async_trait::async_trait;
use market_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Map from key to `(revision, bytes)`.
type Records = HashMap<String, (u64, Vec<u8>)>;

pub struct MemoryStorage {
	store: Arc<RwLock<Records>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
		let store = self.store.read().await;
		store
			.get(key)
			.map(|(revision, bytes)| Versioned {
				value: bytes.clone(),
				revision: *revision,
			})
			.ok_or(StorageError::NotFound)
	}

	async fn compare_and_set(
		&self,
		key: &str,
		expected: Option<u64>,
		value: Vec<u8>,
	) -> Result<u64, StorageError> {
		// Check and write under one write guard.
		let mut store = self.store.write().await;
		let actual = store.get(key).map(|(revision, _)| *revision);
		if actual != expected {
			return Err(StorageError::Conflict {
				key: key.to_string(),
				expected,
				actual,
			});
		}
		let next = actual.map_or(1, |r| r + 1);
		store.insert(key.to_string(), (next, value));
		Ok(next)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
		let mut store = self.store.write().await;
		let next = store.get(key).map_or(1, |(revision, _)| revision + 1);
		store.insert(key.to_string(), (next, value));
		Ok(next)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.store.write().await.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.store.read().await.contains_key(key))
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.keys()
			.filter(|key| key.starts_with(prefix))
			.cloned()
			.collect())
	}

	async fn ping(&self) -> Result<(), StorageError> {
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"connect_timeout_ms",
				FieldType::Integer {
					min: Some(1),
					max: Some(60_000),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Memory storage takes no settings.
pub fn create_storage(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	Ok(Box::new(MemoryStorage::new()))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
