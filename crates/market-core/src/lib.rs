//! Core order engine for the farm marketplace.
//!
//! Ties the pieces of the order lifecycle together: the state machine that
//! owns every status change, the rule table that decides which messages a
//! change triggers, the handler that sends them, and the sweep that retries
//! the ones that failed. [`MarketBuilder`] assembles a [`MarketEngine`] from
//! configuration.

pub mod builder;
pub mod engine;
pub mod handlers;
pub mod recovery;
pub mod rules;
pub mod state;

pub use builder::{BuilderError, MarketBuilder, MarketFactories};
pub use engine::{event_bus::EventBus, EngineError, MarketEngine};
pub use recovery::{RetrySweep, SweepReport};
pub use rules::RuleTable;
pub use state::{
	CreatedOrder, OrderStateError, OrderStateMachine, StoreHandle, TransitionRequest, Transitioned,
};
