pub mod bus;

pub use bus::{Event, EventBus, Priority, SubscriptionId};
