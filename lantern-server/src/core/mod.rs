pub mod error;
pub mod flow;
pub mod ring_buffer;
pub mod room;
pub mod room_manager;
pub mod stream;
pub mod trace;
pub mod types;
pub mod watch;

pub use error::{LanternError, Result};
pub use flow::{CallFrame, MethodContextTracker};
pub use ring_buffer::{CtxKeyStats, QueryResult, RingBuffer, RingStats};
pub use room::{DEFAULT_ROOM, Room, RoomConfig, RoomInfo};
pub use room_manager::{
    MAX_RING_CAPACITY, MIN_RING_CAPACITY, ManagerStats, RoomCreatedHook, RoomManager,
};
pub use stream::{StreamEntry, StreamStore};
pub use trace::{
    Span, SpanNode, Trace, TraceAggregator, TraceFilter, TraceSort, TraceStatusFilter,
    TraceSummary,
};
pub use types::{
    CompiledFilter, Entry, EntryFilter, EntryId, EntryKind, Level, next_entry_id,
    next_stream_entry_id, now_ms,
};
pub use watch::{Bucket, HistoryPoint, Resolution, WatchSample, WatchStore};
