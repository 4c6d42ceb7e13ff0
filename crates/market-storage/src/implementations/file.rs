//! File-backed storage.
//!
//! One file per key under `storage_path`. Each file starts with a fixed
//! 64-byte header that carries the record's revision, followed by the JSON
//! payload. Conditional writes take an exclusive `fs2` lock on a sidecar
//! `.lock` file, re-read the revision, and replace the record through a
//! temp file and rename, so readers never observe a torn record.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry, Versioned};
use async_trait::async_trait;
use fs2::FileExt;
use market_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size record header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "FMKT"
/// - [4-5]: Format version (u16, little-endian)
/// - [6-13]: Record revision (u64, little-endian, starts at 1)
/// - [14-63]: Reserved, zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordHeader {
	version: u16,
	revision: u64,
}

impl RecordHeader {
	const MAGIC: &'static [u8; 4] = b"FMKT";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(revision: u64) -> Self {
		Self {
			version: Self::VERSION,
			revision,
		}
	}

	fn to_bytes(self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.revision.to_le_bytes());
		bytes
	}

	fn parse(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("Record too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized record format".into()));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported record version: {}",
				version
			)));
		}
		let mut revision = [0u8; 8];
		revision.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			version,
			revision: u64::from_le_bytes(revision),
		})
	}
}

fn io_error(e: std::io::Error) -> StorageError {
	match e.kind() {
		ErrorKind::PermissionDenied => StorageError::AccessDenied(e.to_string()),
		_ => StorageError::Backend(e.to_string()),
	}
}

/// Escapes characters that are unsafe in file names. Reversible so that
/// `keys()` can recover the original key.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			':' => out.push_str("%3A"),
			'/' => out.push_str("%2F"),
			'\\' => out.push_str("%5C"),
			other => out.push(other),
		}
	}
	out
}

fn decode_key(name: &str) -> String {
	name.replace("%3A", ":")
		.replace("%2F", "/")
		.replace("%5C", "\\")
		.replace("%25", "%")
}

/// Reads a record file. `Ok(None)` if it does not exist.
fn read_record(path: &Path) -> Result<Option<(RecordHeader, Vec<u8>)>, StorageError> {
	let data = match fs::read(path) {
		Ok(data) => data,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(io_error(e)),
	};
	let header = RecordHeader::parse(&data)?;
	Ok(Some((header, data[RecordHeader::SIZE..].to_vec())))
}

fn write_record(path: &Path, revision: u64, value: &[u8]) -> Result<(), StorageError> {
	let temp_path = path.with_extension("tmp");
	let mut file = fs::File::create(&temp_path).map_err(io_error)?;
	file.write_all(&RecordHeader::new(revision).to_bytes())
		.map_err(io_error)?;
	file.write_all(value).map_err(io_error)?;
	file.sync_all().map_err(io_error)?;
	fs::rename(&temp_path, path).map_err(io_error)
}

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn record_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	fn lock_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.lock", encode_key(key)))
	}

	/// Holds the key's exclusive lock while `decide` maps the current
	/// revision to the revision to write, then writes `value`.
	async fn locked_write<F>(&self, key: &str, value: Vec<u8>, decide: F) -> Result<u64, StorageError>
	where
		F: FnOnce(Option<u64>) -> Result<u64, StorageError> + Send + 'static,
	{
		let base = self.base_path.clone();
		let record = self.record_path(key);
		let lock = self.lock_path(key);

		tokio::task::spawn_blocking(move || {
			fs::create_dir_all(&base).map_err(io_error)?;
			let lock_file = OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(&lock)
				.map_err(io_error)?;
			lock_file.lock_exclusive().map_err(io_error)?;

			let result = read_record(&record).and_then(|current| {
				let next = decide(current.map(|(header, _)| header.revision))?;
				write_record(&record, next, &value)?;
				Ok(next)
			});

			let _ = FileExt::unlock(&lock_file);
			result
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
		let path = self.record_path(key);
		let record = tokio::task::spawn_blocking(move || read_record(&path))
			.await
			.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))??;
		record
			.map(|(header, value)| Versioned {
				value,
				revision: header.revision,
			})
			.ok_or(StorageError::NotFound)
	}

	async fn compare_and_set(
		&self,
		key: &str,
		expected: Option<u64>,
		value: Vec<u8>,
	) -> Result<u64, StorageError> {
		let owned_key = key.to_string();
		self.locked_write(key, value, move |actual| {
			if actual != expected {
				return Err(StorageError::Conflict {
					key: owned_key,
					expected,
					actual,
				});
			}
			Ok(actual.map_or(1, |r| r + 1))
		})
		.await
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
		self.locked_write(key, value, |actual| Ok(actual.map_or(1, |r| r + 1)))
			.await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match tokio::fs::remove_file(self.record_path(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(io_error(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		tokio::fs::try_exists(self.record_path(key))
			.await
			.map_err(io_error)
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut entries = match tokio::fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(io_error(e)),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
			let name = entry.file_name();
			let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".bin")) else {
				continue;
			};
			let key = decode_key(stem);
			if key.starts_with(prefix) {
				keys.push(key);
			}
		}
		Ok(keys)
	}

	async fn ping(&self) -> Result<(), StorageError> {
		let base = self.base_path.clone();
		tokio::task::spawn_blocking(move || {
			fs::create_dir_all(&base).map_err(|e| match e.kind() {
				ErrorKind::PermissionDenied => StorageError::AccessDenied(e.to_string()),
				_ => StorageError::Unreachable(format!("{}: {}", base.display(), e)),
			})?;
			let probe = base.join(".ping");
			fs::write(&probe, b"ping").map_err(io_error)?;
			fs::remove_file(&probe).map_err(io_error)
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("storage_path", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(path) if !path.trim().is_empty() => Ok(()),
					_ => Err("storage_path cannot be empty".to_string()),
				}
			})],
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

/// Configuration parameters:
/// - `storage_path`: directory holding the record files (required)
/// - `connect_timeout_ms`: gateway probe timeout (optional)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StorageError::Configuration("storage_path is required".into()))?;

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
