//! Handlers that run on their own tasks after an order changes.

pub mod notification;

pub use notification::{NotificationHandler, NotificationHandlerError};
