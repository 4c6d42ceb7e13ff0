//! Order persistence and lifecycle rules.
//!
//! [`OrderStateMachine`] is the only writer of order records. It reaches the
//! store through a [`StoreHandle`], which may be empty while the service runs
//! degraded.

pub mod catalog;
pub mod order;
pub mod store;

pub use order::{CreatedOrder, OrderStateError, OrderStateMachine, TransitionRequest, Transitioned};
pub use store::StoreHandle;
