//! Name-to-factory registration for pluggable backends and providers.

/// Implemented by a marker type in every storage backend and notification
/// provider module.
///
/// `NAME` is the key used under `storage.implementations.<name>` or
/// `notifications.sms.implementations.<name>` in the configuration file, and
/// `factory()` returns the constructor that turns that table into a live
/// instance.
pub trait ImplementationRegistry {
	const NAME: &'static str;

	/// Constructor type, e.g. `StorageFactory` or `NotificationFactory`.
	type Factory;

	fn factory() -> Self::Factory;
}
