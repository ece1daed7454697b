pub mod config;
pub mod core;
pub mod fanout;
pub mod ingest;
pub mod metrics;

// Re-export commonly used types
pub use config::ServerConfig;
pub use core::{
    DEFAULT_ROOM, Entry, EntryFilter, EntryKind, LanternError, Level, Resolution, Room,
    RoomConfig, RoomInfo, RoomManager, StreamEntry, TraceAggregator, TraceFilter, TraceSummary,
    WatchSample,
};
pub use fanout::{
    AppState, ClientCommand, Dispatcher, ProducerInfo, ServerEvent, SubscriberAuth,
    SubscriptionManager, Throttler, create_router,
};
pub use ingest::{IngestAuth, IngestServer};
pub use metrics::{PerfCounters, PerfSnapshot, encode_metrics};
