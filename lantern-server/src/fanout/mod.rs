pub mod dispatcher;
pub mod events;
pub mod subscription;
pub mod throttle;
pub mod ws;

pub use dispatcher::{Dispatcher, ProducerInfo};
pub use events::{ClearScope, ClientCommand, RoomSnapshot, ServerEvent};
pub use subscription::SubscriptionManager;
pub use throttle::{DEFAULT_ENTRY_THROTTLE_MS, DEFAULT_WATCH_THROTTLE_MS, Throttler};
pub use ws::{AppState, SubscriberAuth, create_router};
