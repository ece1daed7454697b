//! Bounded FIFO of log entries with secondary indexes.
//!
//! The ring is ordered by id (equal to insertion order). Secondary indexes
//! map session name, level, correlation id, and context-tag values to slot
//! positions; every occupied slot appears in every index it is eligible
//! for, and eviction removes index memberships before the slot is reused.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::types::{CompiledFilter, Entry, EntryId, Level, next_entry_id, now_ms};

/// Per-context-key index: value -> slot positions, plus rolling statistics.
#[derive(Debug, Default)]
struct CtxKeyIndex {
    values: HashMap<String, HashSet<usize>>,
    total_entries: u64,
    last_seen: i64,
}

/// Statistics for one context-tag key
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CtxKeyStats {
    pub key: String,
    pub unique_values: usize,
    pub total_entries: u64,
    pub last_seen: i64,
}

/// Ring statistics, sent to subscribers in init frames
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RingStats {
    pub entry_count: usize,
    pub capacity: usize,
    pub total_received: u64,
    pub first_id: Option<EntryId>,
    pub last_id: Option<EntryId>,
}

/// A filtered page of entries plus the unpaged match count
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub entries: Vec<Entry>,
    pub total: usize,
}

#[derive(Debug)]
pub struct RingBuffer {
    slots: Vec<Option<Entry>>,
    /// Next write position; the oldest occupant when full
    head: usize,
    size: usize,
    total_received: u64,
    id_index: HashMap<EntryId, usize>,
    session_index: HashMap<String, HashSet<usize>>,
    level_index: HashMap<Level, HashSet<usize>>,
    correlation_index: HashMap<String, HashSet<usize>>,
    ctx_index: HashMap<String, CtxKeyIndex>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            size: 0,
            total_received: 0,
            id_index: HashMap::new(),
            session_index: HashMap::new(),
            level_index: HashMap::new(),
            correlation_index: HashMap::new(),
            ctx_index: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Slot position of the l-th oldest occupant
    fn slot_of(&self, logical: usize) -> usize {
        let cap = self.slots.len();
        (self.head + cap - self.size + logical) % cap
    }

    fn entry_at(&self, logical: usize) -> Option<&Entry> {
        self.slots[self.slot_of(logical)].as_ref()
    }

    /// Assign the next global id, evict the oldest occupant if full, insert.
    ///
    /// Returns the id of the stored entry; use [`get_mut_by_id`] to attach
    /// derived annotations while still holding the write lock.
    ///
    /// [`get_mut_by_id`]: RingBuffer::get_mut_by_id
    pub fn push(&mut self, mut entry: Entry) -> EntryId {
        entry.id = next_entry_id();
        entry.received_at = now_ms();
        let id = entry.id;
        self.insert_existing(entry);
        self.total_received += 1;
        id
    }

    /// Insert an entry that already carries an id (push and resize share this)
    fn insert_existing(&mut self, entry: Entry) {
        if self.size == self.slots.len() {
            self.evict_at(self.head);
        }
        let pos = self.head;
        self.index_entry(&entry, pos);
        self.slots[pos] = Some(entry);
        self.head = (self.head + 1) % self.slots.len();
        self.size += 1;
    }

    fn index_entry(&mut self, entry: &Entry, pos: usize) {
        self.id_index.insert(entry.id, pos);
        self.session_index
            .entry(entry.session_name.clone())
            .or_default()
            .insert(pos);
        self.level_index.entry(entry.level).or_default().insert(pos);
        if let Some(correlation) = entry.correlation_id() {
            self.correlation_index
                .entry(correlation.to_string())
                .or_default()
                .insert(pos);
        }
        if let Some(ctx) = &entry.ctx {
            for (key, value) in ctx {
                // Underscore keys belong to the trace aggregator
                if key.starts_with('_') {
                    continue;
                }
                let index = self.ctx_index.entry(key.clone()).or_default();
                index.values.entry(value.clone()).or_default().insert(pos);
                index.total_entries += 1;
                index.last_seen = entry.received_at;
            }
        }
    }

    fn evict_at(&mut self, pos: usize) {
        let Some(victim) = self.slots[pos].take() else {
            return;
        };
        self.id_index.remove(&victim.id);
        if let Some(set) = self.session_index.get_mut(&victim.session_name) {
            set.remove(&pos);
            if set.is_empty() {
                self.session_index.remove(&victim.session_name);
            }
        }
        if let Some(set) = self.level_index.get_mut(&victim.level) {
            set.remove(&pos);
            if set.is_empty() {
                self.level_index.remove(&victim.level);
            }
        }
        if let Some(correlation) = victim.correlation_id() {
            if let Some(set) = self.correlation_index.get_mut(correlation) {
                set.remove(&pos);
                if set.is_empty() {
                    self.correlation_index.remove(correlation);
                }
            }
        }
        if let Some(ctx) = &victim.ctx {
            for (key, value) in ctx {
                if key.starts_with('_') {
                    continue;
                }
                let Some(index) = self.ctx_index.get_mut(key) else {
                    continue;
                };
                if let Some(set) = index.values.get_mut(value) {
                    set.remove(&pos);
                    if set.is_empty() {
                        index.values.remove(value);
                    }
                }
                index.total_entries = index.total_entries.saturating_sub(1);
                if index.values.is_empty() {
                    self.ctx_index.remove(key);
                }
            }
        }
        self.size -= 1;
    }

    /// O(1) id lookup
    pub fn get_by_id(&self, id: EntryId) -> Option<&Entry> {
        let pos = *self.id_index.get(&id)?;
        self.slots[pos].as_ref()
    }

    /// Mutable id lookup, for derived-field annotation at insertion time
    pub fn get_mut_by_id(&mut self, id: EntryId) -> Option<&mut Entry> {
        let pos = *self.id_index.get(&id)?;
        self.slots[pos].as_mut()
    }

    /// O(k) multi-id lookup, in the order given
    pub fn get_by_ids(&self, ids: &[EntryId]) -> Vec<Entry> {
        ids.iter()
            .filter_map(|id| self.get_by_id(*id).cloned())
            .collect()
    }

    /// Entries with id strictly greater than `since`, in ascending id order
    pub fn get_since(&self, since: EntryId) -> Vec<Entry> {
        // Ids ascend in logical order, so binary-search the first survivor.
        let mut lo = 0usize;
        let mut hi = self.size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.entry_at(mid) {
                Some(entry) if entry.id <= since => lo = mid + 1,
                _ => hi = mid,
            }
        }
        (lo..self.size)
            .filter_map(|logical| self.entry_at(logical).cloned())
            .collect()
    }

    /// Filtered page in insertion order, with the unpaged total
    pub fn query(&self, filter: &CompiledFilter, offset: usize, limit: usize) -> QueryResult {
        let mut entries = Vec::new();
        let mut total = 0usize;
        for logical in 0..self.size {
            let Some(entry) = self.entry_at(logical) else {
                continue;
            };
            if !filter.matches(entry) {
                continue;
            }
            if total >= offset && entries.len() < limit {
                entries.push(entry.clone());
            }
            total += 1;
        }
        QueryResult { entries, total }
    }

    /// Session names currently present in the ring
    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.session_index.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    /// Per-context-key statistics
    pub fn context_keys(&self) -> Vec<CtxKeyStats> {
        let mut keys: Vec<CtxKeyStats> = self
            .ctx_index
            .iter()
            .map(|(key, index)| CtxKeyStats {
                key: key.clone(),
                unique_values: index.values.len(),
                total_entries: index.total_entries,
                last_seen: index.last_seen,
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        keys
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            entry_count: self.size,
            capacity: self.slots.len(),
            total_received: self.total_received,
            first_id: self.entry_at(0).map(|e| e.id),
            last_id: (self.size > 0)
                .then(|| self.entry_at(self.size - 1).map(|e| e.id))
                .flatten(),
        }
    }

    /// Empty the buffer and all indexes. The global id counter keeps going.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.size = 0;
        self.id_index.clear();
        self.session_index.clear();
        self.level_index.clear();
        self.correlation_index.clear();
        self.ctx_index.clear();
    }

    /// Change capacity, keeping the newest entries and rebuilding indexes
    pub fn resize(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1);
        let keep = self.size.min(new_capacity);
        let survivors: Vec<Entry> = ((self.size - keep)..self.size)
            .filter_map(|logical| self.entry_at(logical).cloned())
            .collect();
        let total_received = self.total_received;
        *self = RingBuffer::new(new_capacity);
        self.total_received = total_received;
        for entry in survivors {
            self.insert_existing(entry);
        }
    }

    #[cfg(test)]
    fn index_size_for_session(&self, session: &str) -> usize {
        self.session_index.get(session).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CTX_CORRELATION_ID, EntryFilter, EntryKind};
    use std::collections::HashMap;

    fn entry(session: &str, level: Level, title: &str) -> Entry {
        Entry {
            id: 0,
            received_at: 0,
            app_name: "app".to_string(),
            session_name: session.to_string(),
            host_name: "host".to_string(),
            process_id: 7,
            thread_id: 1,
            timestamp: now_ms(),
            level,
            kind: EntryKind::Message,
            title: Some(title.to_string()),
            payload: None,
            color: None,
            ctx: None,
            depth: None,
            parent_id: None,
            matching_enter_id: None,
            context: None,
        }
    }

    #[test]
    fn test_ring_overflow_keeps_newest() {
        let mut ring = RingBuffer::new(4);
        let mut ids = Vec::new();
        for title in ["a", "b", "c", "d", "e"] {
            ids.push(ring.push(entry("s", Level::Message, title)));
        }

        assert_eq!(ring.len(), 4);
        let since = ring.get_since(0);
        let titles: Vec<_> = since
            .iter()
            .map(|e| e.title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, ["b", "c", "d", "e"]);
        assert_eq!(
            since.iter().map(|e| e.id).collect::<Vec<_>>(),
            ids[1..].to_vec()
        );
        // The evicted entry is gone from the indexes too
        assert_eq!(ring.index_size_for_session("s"), 4);
        assert!(ring.get_by_id(ids[0]).is_none());
    }

    #[test]
    fn test_level_query() {
        let mut ring = RingBuffer::new(16);
        let levels = [
            Level::Debug,
            Level::Message,
            Level::Warning,
            Level::Error,
            Level::Fatal,
            Level::Message,
        ];
        let ids: Vec<EntryId> = levels
            .iter()
            .map(|level| ring.push(entry("s", *level, "t")))
            .collect();

        let filter = CompiledFilter::new(EntryFilter {
            levels: Some([Level::Error, Level::Fatal].into()),
            ..Default::default()
        });
        let result = ring.query(&filter, 0, usize::MAX);
        assert_eq!(result.total, 2);
        assert_eq!(
            result.entries.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![ids[3], ids[4]]
        );
    }

    #[test]
    fn test_query_offset_limit() {
        let mut ring = RingBuffer::new(16);
        for i in 0..10 {
            ring.push(entry("s", Level::Message, &format!("t{i}")));
        }
        let filter = CompiledFilter::default();
        let page = ring.query(&filter, 4, 3);
        assert_eq!(page.total, 10);
        let titles: Vec<_> = page
            .entries
            .iter()
            .map(|e| e.title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, ["t4", "t5", "t6"]);
    }

    #[test]
    fn test_get_since_midpoint() {
        let mut ring = RingBuffer::new(8);
        let ids: Vec<EntryId> = (0..6)
            .map(|_| ring.push(entry("s", Level::Message, "t")))
            .collect();
        let tail = ring.get_since(ids[2]);
        assert_eq!(
            tail.iter().map(|e| e.id).collect::<Vec<_>>(),
            ids[3..].to_vec()
        );
        assert!(ring.get_since(ids[5]).is_empty());
    }

    #[test]
    fn test_get_by_ids_order() {
        let mut ring = RingBuffer::new(8);
        let ids: Vec<EntryId> = (0..4)
            .map(|_| ring.push(entry("s", Level::Message, "t")))
            .collect();
        let got = ring.get_by_ids(&[ids[2], ids[0], 9_999_999_999]);
        assert_eq!(got.iter().map(|e| e.id).collect::<Vec<_>>(), vec![
            ids[2], ids[0]
        ]);
    }

    #[test]
    fn test_clear_never_rewinds_ids() {
        let mut ring = RingBuffer::new(4);
        let before = ring.push(entry("s", Level::Message, "t"));
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.sessions().is_empty());
        let after = ring.push(entry("s", Level::Message, "t"));
        assert!(after > before);
    }

    #[test]
    fn test_resize_keeps_newest_and_rebuilds_indexes() {
        let mut ring = RingBuffer::new(8);
        let ids: Vec<EntryId> = (0..6)
            .map(|i| ring.push(entry(&format!("s{}", i % 2), Level::Message, "t")))
            .collect();

        ring.resize(3);
        assert_eq!(ring.capacity(), 3);
        assert_eq!(ring.len(), 3);
        assert_eq!(
            ring.get_since(0).iter().map(|e| e.id).collect::<Vec<_>>(),
            ids[3..].to_vec()
        );
        // s1 owned entries 1, 3, 5 -> two survive the cut at id[3]
        assert_eq!(ring.index_size_for_session("s1"), 2);
        assert_eq!(ring.index_size_for_session("s0"), 1);
    }

    #[test]
    fn test_correlation_and_ctx_index() {
        let mut ring = RingBuffer::new(3);
        let tagged = |corr: &str, tenant: &str| {
            let mut e = entry("s", Level::Message, "t");
            e.ctx = Some(HashMap::from([
                (CTX_CORRELATION_ID.to_string(), corr.to_string()),
                ("tenant".to_string(), tenant.to_string()),
                ("_traceId".to_string(), "tr-1".to_string()),
            ]));
            e
        };
        ring.push(tagged("req-1", "acme"));
        ring.push(tagged("req-1", "acme"));
        ring.push(tagged("req-2", "globex"));

        let keys = ring.context_keys();
        // Reserved underscore keys are not indexed as tags
        assert!(keys.iter().all(|k| k.key != "_traceId"));
        let tenant = keys.iter().find(|k| k.key == "tenant").unwrap();
        assert_eq!(tenant.unique_values, 2);
        assert_eq!(tenant.total_entries, 3);

        let filter = CompiledFilter::new(EntryFilter {
            correlation_id: Some("req-1".to_string()),
            ..Default::default()
        });
        assert_eq!(ring.query(&filter, 0, usize::MAX).total, 2);

        // Evicting the two req-1 entries drains their index memberships
        ring.push(tagged("req-3", "globex"));
        ring.push(tagged("req-3", "globex"));
        assert_eq!(ring.query(&filter, 0, usize::MAX).total, 0);
        let keys = ring.context_keys();
        let tenant = keys.iter().find(|k| k.key == "tenant").unwrap();
        assert_eq!(tenant.unique_values, 1);
        assert_eq!(tenant.total_entries, 3);
    }

    #[test]
    fn test_stats() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.stats().first_id, None);
        let a = ring.push(entry("s", Level::Message, "t"));
        let b = ring.push(entry("s", Level::Message, "t"));
        let c = ring.push(entry("s", Level::Message, "t"));
        let stats = ring.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.total_received, 3);
        assert_eq!(stats.first_id, Some(b));
        assert_eq!(stats.last_id, Some(c));
        let _ = a;
    }
}
