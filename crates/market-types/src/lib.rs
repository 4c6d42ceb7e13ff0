//! Common types for the farm market order service.
//!
//! This crate defines the data model shared by every other crate in the
//! workspace: orders and their status history, notification records, catalog
//! products, HTTP API payloads, engine events and the configuration schema
//! helpers used by pluggable implementations.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Catalog product snapshots used to price new orders.
pub mod catalog;
/// Event types for communication between engine components.
pub mod events;
/// Notification channels, outcomes and audit records.
pub mod notification;
/// The order entity, its status and its history.
pub mod order;
/// Self-registration trait for pluggable implementations.
pub mod registry;
/// Redacting wrapper for provider credentials.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Small formatting and time helpers.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use api::*;
pub use catalog::*;
pub use events::*;
pub use notification::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::*;
pub use utils::{format_money, mask_recipient, truncate_id};
pub use validation::*;
