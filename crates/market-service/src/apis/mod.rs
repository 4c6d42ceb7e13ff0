//! API handlers.

pub mod order;
