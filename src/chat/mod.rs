pub mod delivery;
pub mod notifications;
pub mod session;
pub mod store;
pub mod typing;

pub use delivery::DeliveryTracker;
pub use notifications::{NotificationRouter, Routed};
pub use session::{SessionController, SessionPhase, SyncSettings};
pub use store::{MessageStore, Upsert};
pub use typing::{TypingPresence, TypingState};
