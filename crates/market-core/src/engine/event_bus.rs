//! Broadcast bus for [`MarketEvent`]s.
//!
//! Publishing never blocks. Slow subscribers lag and lose the oldest events
//! rather than holding up order processing.

use market_types::MarketEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<MarketEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		event: MarketEvent,
	) -> Result<usize, broadcast::error::SendError<MarketEvent>> {
		self.sender.send(event)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
