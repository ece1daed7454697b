//! An isolated namespace owning one instance of every store.
//!
//! All per-room mutable state hangs off this type; producer packets for a
//! room funnel through it and every mutation path updates the activity
//! clock. Membership sets hold connection ids only; socket handles stay
//! with the subscription manager.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use super::flow::MethodContextTracker;
use super::ring_buffer::{CtxKeyStats, QueryResult, RingBuffer, RingStats};
use super::stream::{StreamEntry, StreamStore};
use super::trace::{
    SpanNode, Trace, TraceAggregator, TraceFilter, TraceSummary,
};
use super::types::{CompiledFilter, Entry, EntryId, now_ms};
use super::watch::{HistoryPoint, Resolution, WatchSample, WatchStore};

/// The indelible room every unbound producer and subscriber lands in
pub const DEFAULT_ROOM: &str = "default";

/// Per-room store limits, shared by every room of one server
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub max_entries: usize,
    pub max_stream_entries: usize,
    pub trace_timeout_ms: i64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_stream_entries: 1_000,
            trace_timeout_ms: super::trace::DEFAULT_TRACE_TIMEOUT_MS,
        }
    }
}

/// Room snapshot for listings and init frames
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub entry_count: usize,
    pub capacity: usize,
    pub watch_count: usize,
    pub stream_channel_count: usize,
    pub producer_count: usize,
    pub subscriber_count: usize,
    pub active_trace_count: usize,
    pub completed_trace_count: usize,
    pub created_at: i64,
    pub last_activity: i64,
}

pub struct Room {
    id: String,
    ring: RwLock<RingBuffer>,
    watches: WatchStore,
    streams: StreamStore,
    tracker: Mutex<MethodContextTracker>,
    traces: TraceAggregator,
    subscribers: RwLock<HashSet<u64>>,
    producers: RwLock<HashSet<u64>>,
    created_at: i64,
    last_activity: AtomicI64,
}

impl Room {
    pub fn new(id: String, config: &RoomConfig) -> Self {
        let now = now_ms();
        Self {
            id,
            ring: RwLock::new(RingBuffer::new(config.max_entries)),
            watches: WatchStore::new(),
            streams: StreamStore::new(config.max_stream_entries),
            tracker: Mutex::new(MethodContextTracker::new()),
            traces: TraceAggregator::new(config.trace_timeout_ms),
            subscribers: RwLock::new(HashSet::new()),
            producers: RwLock::new(HashSet::new()),
            created_at: now,
            last_activity: AtomicI64::new(now),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Bump the activity clock; called on every producer packet
    pub fn touch(&self) {
        self.last_activity.store(now_ms(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Log entries
    // ------------------------------------------------------------------

    /// Push an entry: assign its id, annotate process-flow context, store.
    ///
    /// The write lock spans id assignment, index updates, and annotation,
    /// so readers never observe a half-indexed entry.
    pub fn push_entry(&self, entry: Entry) -> Entry {
        self.touch();
        let mut ring = self.ring.write();
        let id = ring.push(entry);
        let Some(stored) = ring.get_mut_by_id(id) else {
            unreachable!("entry {id} missing immediately after push");
        };
        if stored.kind.is_process_flow() {
            self.tracker.lock().annotate(stored);
        }
        stored.clone()
    }

    pub fn query(&self, filter: &CompiledFilter, offset: usize, limit: usize) -> QueryResult {
        self.ring.read().query(filter, offset, limit)
    }

    pub fn get_since(&self, since: EntryId) -> Vec<Entry> {
        self.ring.read().get_since(since)
    }

    pub fn get_by_ids(&self, ids: &[EntryId]) -> Vec<Entry> {
        self.ring.read().get_by_ids(ids)
    }

    pub fn ring_stats(&self) -> RingStats {
        self.ring.read().stats()
    }

    pub fn sessions(&self) -> Vec<String> {
        self.ring.read().sessions()
    }

    pub fn context_keys(&self) -> Vec<CtxKeyStats> {
        self.ring.read().context_keys()
    }

    pub fn newest_entry_id(&self) -> EntryId {
        self.ring.read().stats().last_id.unwrap_or(0)
    }

    pub fn resize_ring(&self, capacity: usize) {
        self.ring.write().resize(capacity);
    }

    // ------------------------------------------------------------------
    // Watches
    // ------------------------------------------------------------------

    pub fn set_watch(&self, sample: WatchSample) {
        self.touch();
        self.watches.set(sample);
    }

    pub fn watch_values(&self) -> Vec<WatchSample> {
        self.watches.current_values()
    }

    pub fn watch_history(
        &self,
        name: &str,
        from: Option<i64>,
        to: Option<i64>,
        resolution: Resolution,
    ) -> Vec<HistoryPoint> {
        self.watches.get_history(name, from, to, resolution)
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Returns the stored sample and whether the channel is new
    pub fn add_stream(
        &self,
        channel: &str,
        data: Vec<u8>,
        timestamp: i64,
        stream_type: u8,
        group: String,
    ) -> (StreamEntry, bool) {
        self.touch();
        self.streams.add(channel, data, timestamp, stream_type, group)
    }

    pub fn stream_channels(&self) -> Vec<String> {
        self.streams.channel_names()
    }

    pub fn has_stream_channel(&self, channel: &str) -> bool {
        self.streams.has_channel(channel)
    }

    // ------------------------------------------------------------------
    // Traces
    // ------------------------------------------------------------------

    pub fn process_trace(&self, entry: &Entry) -> Option<TraceSummary> {
        self.traces.process(entry)
    }

    pub fn sweep_traces(&self, now: i64) -> Vec<TraceSummary> {
        self.traces.sweep(now)
    }

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces.get_trace(trace_id)
    }

    pub fn get_span_tree(&self, trace_id: &str) -> Option<Vec<SpanNode>> {
        self.traces.get_span_tree(trace_id)
    }

    pub fn list_traces(&self, filter: &TraceFilter) -> (Vec<TraceSummary>, usize) {
        self.traces.list_traces(filter)
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    pub fn add_subscriber(&self, id: u64) {
        self.subscribers.write().insert(id);
    }

    pub fn remove_subscriber(&self, id: u64) {
        self.subscribers.write().remove(&id);
    }

    pub fn subscriber_ids(&self) -> Vec<u64> {
        self.subscribers.read().iter().copied().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn add_producer(&self, id: u64) {
        self.producers.write().insert(id);
    }

    pub fn remove_producer(&self, id: u64) {
        self.producers.write().remove(&id);
    }

    pub fn producer_count(&self) -> usize {
        self.producers.read().len()
    }

    // ------------------------------------------------------------------
    // Clearing
    // ------------------------------------------------------------------

    pub fn clear_log(&self) {
        self.ring.write().clear();
        self.tracker.lock().clear();
    }

    pub fn clear_watches(&self) {
        self.watches.clear();
    }

    pub fn clear_process_flow(&self) {
        self.tracker.lock().clear();
    }

    /// Reset every store; identity and membership stay
    pub fn clear_all(&self) {
        self.ring.write().clear();
        self.watches.clear();
        self.streams.clear();
        self.tracker.lock().clear();
        self.traces.clear();
    }

    pub fn info(&self) -> RoomInfo {
        let stats = self.ring.read().stats();
        RoomInfo {
            id: self.id.clone(),
            entry_count: stats.entry_count,
            capacity: stats.capacity,
            watch_count: self.watches.len(),
            stream_channel_count: self.streams.channel_count(),
            producer_count: self.producer_count(),
            subscriber_count: self.subscriber_count(),
            active_trace_count: self.traces.active_count(),
            completed_trace_count: self.traces.completed_count(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}
