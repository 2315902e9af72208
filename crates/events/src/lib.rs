//! Committed-fact publication: the `Event` contract, the envelope committed
//! facts travel in, and the pub/sub bus that fans them out.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
