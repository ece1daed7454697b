//! Broadcast-rate throttling.
//!
//! Entries coalesce into per-room batches (~3 Hz), watches coalesce per
//! (room, name) keeping only the most recent sample (~10 Hz), and streams
//! pass through untouched. Coalescing bounds the broadcast rate only;
//! the stores behind it keep full history.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::Entry;
use crate::core::watch::WatchSample;
use crate::fanout::subscription::SubscriptionManager;
use crate::metrics::PerfCounters;

pub const DEFAULT_ENTRY_THROTTLE_MS: u64 = 333;
pub const DEFAULT_WATCH_THROTTLE_MS: u64 = 100;

#[derive(Debug, Default)]
struct EntryBucket {
    pending: Vec<Entry>,
    last_flush: Option<Instant>,
    timer_armed: bool,
}

#[derive(Debug, Default)]
struct WatchBucket {
    /// Only the latest pending sample survives to the flush
    pending: Option<WatchSample>,
    last_flush: Option<Instant>,
    timer_armed: bool,
}

fn stale(last_flush: Option<Instant>, interval: Duration) -> bool {
    last_flush.is_none_or(|at| at.elapsed() >= interval)
}

pub struct Throttler {
    entry_interval: Duration,
    watch_interval: Duration,
    subs: Arc<SubscriptionManager>,
    counters: Arc<PerfCounters>,
    entries: Mutex<HashMap<String, EntryBucket>>,
    watches: Mutex<HashMap<(String, String), WatchBucket>>,
}

impl Throttler {
    pub fn new(
        subs: Arc<SubscriptionManager>,
        counters: Arc<PerfCounters>,
        entry_interval: Duration,
        watch_interval: Duration,
    ) -> Self {
        Self {
            entry_interval,
            watch_interval,
            subs,
            counters,
            entries: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an entry for its room's batch.
    ///
    /// A stale bucket flushes immediately; otherwise the first arrival
    /// arms a one-shot timer for the remainder of the interval.
    pub fn enqueue_entry(self: &Arc<Self>, room_id: &str, entry: Entry) {
        let mut buckets = self.entries.lock();
        let bucket = buckets.entry(room_id.to_string()).or_default();
        bucket.pending.push(entry);
        if bucket.timer_armed {
            return;
        }
        if stale(bucket.last_flush, self.entry_interval) {
            let batch = mem::take(&mut bucket.pending);
            bucket.last_flush = Some(Instant::now());
            // Broadcasting under the bucket lock keeps per-room batches in
            // strictly increasing max-id order.
            self.deliver_entries(room_id, batch);
        } else {
            bucket.timer_armed = true;
            let this = self.clone();
            let room = room_id.to_string();
            let delay = self.entry_interval;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.flush_entries(&room);
            });
        }
    }

    fn flush_entries(&self, room_id: &str) {
        let mut buckets = self.entries.lock();
        let Some(bucket) = buckets.get_mut(room_id) else {
            return;
        };
        bucket.timer_armed = false;
        bucket.last_flush = Some(Instant::now());
        let batch = mem::take(&mut bucket.pending);
        if !batch.is_empty() {
            self.deliver_entries(room_id, batch);
        }
    }

    fn deliver_entries(&self, room_id: &str, batch: Vec<Entry>) {
        let delivered = self.subs.broadcast_entries(room_id, &batch);
        self.counters.record_entries_broadcast(delivered as u64);
    }

    /// Queue a watch sample; earlier pendings for the same name are
    /// discarded (history lives in the watch store, not here).
    pub fn enqueue_watch(self: &Arc<Self>, room_id: &str, sample: WatchSample) {
        let key = (room_id.to_string(), sample.name.clone());
        let mut buckets = self.watches.lock();
        let bucket = buckets.entry(key.clone()).or_default();
        bucket.pending = Some(sample);
        if bucket.timer_armed {
            return;
        }
        if stale(bucket.last_flush, self.watch_interval) {
            let Some(sample) = bucket.pending.take() else {
                return;
            };
            bucket.last_flush = Some(Instant::now());
            self.deliver_watch(room_id, &sample);
        } else {
            bucket.timer_armed = true;
            let this = self.clone();
            let delay = self.watch_interval;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.flush_watch(&key.0, &key.1);
            });
        }
    }

    fn flush_watch(&self, room_id: &str, name: &str) {
        let mut buckets = self.watches.lock();
        let Some(bucket) = buckets.get_mut(&(room_id.to_string(), name.to_string())) else {
            return;
        };
        bucket.timer_armed = false;
        bucket.last_flush = Some(Instant::now());
        if let Some(sample) = bucket.pending.take() {
            self.deliver_watch(room_id, &sample);
        }
    }

    fn deliver_watch(&self, room_id: &str, sample: &WatchSample) {
        let delivered = self.subs.broadcast_watch(room_id, sample);
        if delivered > 0 {
            self.counters.record_watches_broadcast(1);
        }
    }

    /// Streams are never throttled
    pub fn forward_stream(&self, room_id: &str, entry: &crate::core::stream::StreamEntry) {
        self.subs.broadcast_stream(room_id, entry);
    }
}
