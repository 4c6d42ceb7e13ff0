//! Client side of the order service.
//!
//! [`OrderApiClient`] talks to the HTTP API. [`Checkout`] wraps it so a
//! customer can still check out while the service or its store is down:
//! such orders are held in a session-owned [`LocalOrderCache`] and
//! resubmitted on request.

pub mod cache;
pub mod checkout;
pub mod client;
mod error;

pub use cache::{is_local_id, LocalOrderCache, LocalPendingOrder, PendingItem, LOCAL_ID_PREFIX};
pub use checkout::{Checkout, CheckoutOutcome, ReconcileReport, ReconciledOrder};
pub use client::{ClientConfig, OrderApiClient};
pub use error::ClientError;
