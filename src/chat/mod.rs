pub mod broadcast;
pub mod messages;
pub mod presence;
pub mod router;

pub use presence::{PresenceCoordinator, TypingEvent};
pub use router::{DeliveryReport, MessageRouter};
