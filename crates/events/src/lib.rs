//! Domain events and their distribution.
//!
//! - [`Event`]: the domain-agnostic contract every ledger event implements
//! - [`EventEnvelope`]: stream metadata wrapped around a published payload
//! - [`EventBus`]: pub/sub mechanics, with an in-memory implementation

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
