//! Subscriber-channel message types.
//!
//! Both directions are internally tagged JSON (`"type"` field, camelCase
//! payloads). Client commands are processed in arrival order per
//! subscriber; server events are fanned out through per-subscriber
//! channels.

use serde::{Deserialize, Serialize};

use crate::core::ring_buffer::{CtxKeyStats, RingStats};
use crate::core::room::RoomInfo;
use crate::core::stream::StreamEntry;
use crate::core::trace::{SpanNode, Trace, TraceFilter, TraceSummary};
use crate::core::types::{Entry, EntryFilter, EntryId};
use crate::core::watch::{HistoryPoint, Resolution, WatchSample};
use crate::fanout::dispatcher::ProducerInfo;

/// Commands a subscriber may send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    Subscribe {
        #[serde(default)]
        filters: EntryFilter,
    },
    Pause,
    Resume,
    #[serde(rename_all = "camelCase")]
    GetSince { since_id: EntryId },
    SwitchRoom {
        room: String,
    },
    GetRooms,
    SubscribeStream {
        channel: String,
    },
    UnsubscribeStream {
        channel: String,
    },
    PauseStream {
        channel: String,
    },
    ResumeStream {
        channel: String,
    },
    GetStreamSubscriptions,
    Query {
        #[serde(default)]
        filter: EntryFilter,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: usize,
    },
    GetHistory {
        name: String,
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
        #[serde(default)]
        resolution: Resolution,
    },
    GetTraces {
        #[serde(default)]
        filter: TraceFilter,
    },
    #[serde(rename_all = "camelCase")]
    GetTrace { trace_id: String },
    #[serde(rename_all = "camelCase")]
    GetSpanTree { trace_id: String },
    GetContextKeys,
    ClearLog,
    ClearWatches,
    ClearAll,
    DeleteRoom {
        room: String,
    },
    ResizeRoom {
        room: String,
        capacity: usize,
    },
}

/// What a room clear applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClearScope {
    Log,
    Watches,
    All,
    ProcessFlow,
}

/// Snapshot of a room, shared by init and room-switch events
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: String,
    pub stats: RingStats,
    pub watches: Vec<WatchSample>,
    pub sessions: Vec<String>,
    pub stream_channels: Vec<String>,
    pub producer_count: usize,
}

/// Events the server pushes to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Init {
        #[serde(flatten)]
        snapshot: RoomSnapshot,
        subscriber_id: u64,
        rooms: Vec<RoomInfo>,
    },
    Entries {
        entries: Vec<Entry>,
    },
    Watch {
        watch: WatchSample,
    },
    Stream {
        entry: StreamEntry,
    },
    Trace {
        trace: TraceSummary,
    },
    Clear {
        scope: ClearScope,
    },
    ClientConnect {
        producer: ProducerInfo,
    },
    #[serde(rename_all = "camelCase")]
    ClientDisconnect {
        producer_id: u64,
        app_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionEvent {
        producer_id: u64,
        app_name: String,
        event: String,
        room: String,
    },
    RoomCreated {
        room: String,
    },
    RoomSwitched {
        #[serde(flatten)]
        snapshot: RoomSnapshot,
    },
    Rooms {
        rooms: Vec<RoomInfo>,
    },
    StreamSubscribed {
        channel: String,
    },
    StreamUnsubscribed {
        channel: String,
    },
    StreamPaused {
        channel: String,
    },
    StreamResumed {
        channel: String,
    },
    StreamSubscriptions {
        channels: Vec<String>,
    },
    QueryResult {
        entries: Vec<Entry>,
        total: usize,
    },
    WatchHistory {
        name: String,
        points: Vec<HistoryPoint>,
    },
    Traces {
        traces: Vec<TraceSummary>,
        total: usize,
    },
    TraceDetail {
        trace: Trace,
    },
    #[serde(rename_all = "camelCase")]
    SpanTree {
        trace_id: String,
        spans: Vec<SpanNode>,
    },
    ContextKeys {
        keys: Vec<CtxKeyStats>,
    },
    Error {
        message: String,
    },
}
