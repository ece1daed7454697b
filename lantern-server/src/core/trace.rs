//! Span-tree reconstruction from trace-tagged log entries.
//!
//! Entries carrying reserved underscore ctx keys are folded into traces:
//! one `Trace` per `_traceId`, one `Span` per `_spanId`, parent links via
//! `_parentSpanId` (with placeholder parents for spans that arrive before
//! their parent). Traces idle past the timeout are aged out of the active
//! map into a bounded completed ring.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::types::{Entry, EntryId, Level, now_ms};

pub const CTX_TRACE_ID: &str = "_traceId";
pub const CTX_SPAN_ID: &str = "_spanId";
pub const CTX_PARENT_SPAN_ID: &str = "_parentSpanId";
pub const CTX_SPAN_NAME: &str = "_spanName";
pub const CTX_SPAN_KIND: &str = "_spanKind";
pub const CTX_SPAN_DURATION: &str = "_spanDuration";
pub const CTX_SPAN_STATUS: &str = "_spanStatus";
pub const CTX_SPAN_STATUS_DESC: &str = "_spanStatusDesc";

pub const COMPLETED_TRACE_CAPACITY: usize = 1_000;
pub const DEFAULT_TRACE_TIMEOUT_MS: i64 = 300_000;

const STATUS_ERROR: &str = "Error";

/// One operation within a trace
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    pub entry_ids: Vec<EntryId>,
    pub child_span_ids: Vec<String>,
}

impl Span {
    fn new(span_id: String) -> Self {
        Self {
            span_id,
            parent_span_id: None,
            name: None,
            kind: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            status: None,
            status_description: None,
            entry_ids: Vec::new(),
            child_span_ids: Vec::new(),
        }
    }

    fn placeholder(span_id: String) -> Self {
        let mut span = Self::new(span_id);
        span.name = Some("unknown".to_string());
        span
    }
}

/// A set of causally related spans sharing one trace id
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_span_name: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub spans: HashMap<String, Span>,
    pub root_span_ids: Vec<String>,
    pub entry_ids: Vec<EntryId>,
    pub apps: BTreeSet<String>,
    pub sessions: BTreeSet<String>,
    pub has_error: bool,
    pub error_count: u64,
    pub last_updated: i64,
    pub completed: bool,
}

impl Trace {
    fn new(trace_id: String, timestamp: i64) -> Self {
        Self {
            trace_id,
            root_span_name: None,
            start_time: timestamp,
            end_time: timestamp,
            spans: HashMap::new(),
            root_span_ids: Vec::new(),
            entry_ids: Vec::new(),
            apps: BTreeSet::new(),
            sessions: BTreeSet::new(),
            has_error: false,
            error_count: 0,
            last_updated: now_ms(),
            completed: false,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            trace_id: self.trace_id.clone(),
            root_span_name: self.root_span_name.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms: self.duration_ms(),
            span_count: self.spans.len(),
            entry_count: self.entry_ids.len(),
            apps: self.apps.iter().cloned().collect(),
            sessions: self.sessions.iter().cloned().collect(),
            has_error: self.has_error,
            error_count: self.error_count,
            completed: self.completed,
            last_updated: self.last_updated,
        }
    }
}

/// The fan-out and listing view of a trace
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_span_name: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: i64,
    pub span_count: usize,
    pub entry_count: usize,
    pub apps: Vec<String>,
    pub sessions: Vec<String>,
    pub has_error: bool,
    pub error_count: u64,
    pub completed: bool,
    pub last_updated: i64,
}

/// One node of a span tree: the span, its depth, children by start time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: Span,
    pub depth: u32,
    pub children: Vec<SpanNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TraceStatusFilter {
    #[default]
    All,
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TraceSort {
    #[default]
    Recent,
    Duration,
    SpanCount,
}

fn default_trace_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceFilter {
    pub status: TraceStatusFilter,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    /// Substring match on root span name or trace id, case-insensitive
    pub search: Option<String>,
    pub sort: TraceSort,
    pub offset: usize,
    pub limit: usize,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            status: TraceStatusFilter::All,
            min_duration_ms: None,
            max_duration_ms: None,
            search: None,
            sort: TraceSort::Recent,
            offset: 0,
            limit: default_trace_limit(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    active: HashMap<String, Trace>,
    completed: VecDeque<Trace>,
    span_index: HashMap<String, String>,
}

#[derive(Debug)]
pub struct TraceAggregator {
    inner: Mutex<Inner>,
    timeout_ms: i64,
}

impl TraceAggregator {
    pub fn new(timeout_ms: i64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            timeout_ms: timeout_ms.max(1),
        }
    }

    /// Fold one stored entry into its trace.
    ///
    /// Entries without a `_traceId` tag are ignored. Returns the updated
    /// trace's summary so the caller can enqueue the broadcast after the
    /// aggregation is complete.
    pub fn process(&self, entry: &Entry) -> Option<TraceSummary> {
        let trace_id = entry.ctx_value(CTX_TRACE_ID).filter(|id| !id.is_empty())?;

        let mut inner = self.inner.lock();
        let trace = inner
            .active
            .entry(trace_id.to_string())
            .or_insert_with(|| Trace::new(trace_id.to_string(), entry.timestamp));

        trace.last_updated = now_ms();
        trace.entry_ids.push(entry.id);
        trace.apps.insert(entry.app_name.clone());
        trace.sessions.insert(entry.session_name.clone());
        trace.start_time = trace.start_time.min(entry.timestamp);
        trace.end_time = trace.end_time.max(entry.timestamp);

        let status = entry.ctx_value(CTX_SPAN_STATUS);
        if entry.level >= Level::Error || status == Some(STATUS_ERROR) {
            trace.has_error = true;
            trace.error_count += 1;
        }

        let mut indexed_span = None;
        if let Some(span_id) = entry.ctx_value(CTX_SPAN_ID).filter(|id| !id.is_empty()) {
            let parent_span_id = entry
                .ctx_value(CTX_PARENT_SPAN_ID)
                .filter(|id| !id.is_empty())
                .map(str::to_string);

            let span = trace
                .spans
                .entry(span_id.to_string())
                .or_insert_with(|| Span::new(span_id.to_string()));

            // Overwrite present fields; absent ones keep earlier values.
            if let Some(name) = entry.ctx_value(CTX_SPAN_NAME) {
                span.name = Some(name.to_string());
            }
            if let Some(kind) = entry.ctx_value(CTX_SPAN_KIND) {
                span.kind = Some(kind.to_string());
            }
            if let Some(status) = status {
                span.status = Some(status.to_string());
            }
            if let Some(desc) = entry.ctx_value(CTX_SPAN_STATUS_DESC) {
                span.status_description = Some(desc.to_string());
            }
            span.start_time = Some(
                span.start_time
                    .map_or(entry.timestamp, |start| start.min(entry.timestamp)),
            );
            if let Some(duration) = entry
                .ctx_value(CTX_SPAN_DURATION)
                .and_then(|d| d.parse::<f64>().ok())
            {
                span.duration_ms = Some(duration);
                span.end_time = span.start_time.map(|start| start + duration as i64);
            } else {
                span.end_time = Some(
                    span.end_time
                        .map_or(entry.timestamp, |end| end.max(entry.timestamp)),
                );
            }
            span.entry_ids.push(entry.id);
            span.parent_span_id = parent_span_id.clone().or(span.parent_span_id.take());

            match &parent_span_id {
                Some(parent_id) => {
                    let parent = trace
                        .spans
                        .entry(parent_id.clone())
                        .or_insert_with(|| Span::placeholder(parent_id.clone()));
                    if !parent.child_span_ids.iter().any(|c| c == span_id) {
                        parent.child_span_ids.push(span_id.to_string());
                    }
                }
                None => {
                    if !trace.root_span_ids.iter().any(|r| r == span_id) {
                        trace.root_span_ids.push(span_id.to_string());
                    }
                    if trace.root_span_name.is_none() {
                        if let Some(name) = entry.ctx_value(CTX_SPAN_NAME) {
                            trace.root_span_name = Some(name.to_string());
                        }
                    }
                }
            }

            indexed_span = Some(span_id.to_string());
        }

        let summary = trace.summary();
        if let Some(span_id) = indexed_span {
            inner.span_index.insert(span_id, trace_id.to_string());
        }
        Some(summary)
    }

    /// Move traces idle past the timeout into the completed ring.
    ///
    /// Returns their summaries for a final broadcast.
    pub fn sweep(&self, now: i64) -> Vec<TraceSummary> {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .active
            .iter()
            .filter(|(_, trace)| now - trace.last_updated > self.timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();

        let mut summaries = Vec::with_capacity(expired.len());
        for trace_id in expired {
            let Some(mut trace) = inner.active.remove(&trace_id) else {
                continue;
            };
            trace.completed = true;
            inner
                .span_index
                .retain(|_, owner| owner != &trace.trace_id);
            summaries.push(trace.summary());
            if inner.completed.len() == COMPLETED_TRACE_CAPACITY {
                inner.completed.pop_front();
            }
            inner.completed.push_back(trace);
        }
        summaries
    }

    /// Active first, completed (newest first) second
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        let inner = self.inner.lock();
        inner.active.get(trace_id).cloned().or_else(|| {
            inner
                .completed
                .iter()
                .rev()
                .find(|t| t.trace_id == trace_id)
                .cloned()
        })
    }

    /// The trace currently owning a span id
    pub fn trace_id_for_span(&self, span_id: &str) -> Option<String> {
        self.inner.lock().span_index.get(span_id).cloned()
    }

    /// Depth-annotated span tree, children ordered by start time.
    ///
    /// Falls back to scanning for parentless spans when `root_span_ids`
    /// is empty, so it works on completed traces regardless of how their
    /// roots were recorded.
    pub fn get_span_tree(&self, trace_id: &str) -> Option<Vec<SpanNode>> {
        let trace = self.get_trace(trace_id)?;

        let mut root_ids: Vec<String> = trace
            .root_span_ids
            .iter()
            .filter(|id| trace.spans.contains_key(*id))
            .cloned()
            .collect();
        if root_ids.is_empty() {
            root_ids = trace
                .spans
                .values()
                .filter(|span| span.parent_span_id.is_none())
                .map(|span| span.span_id.clone())
                .collect();
        }
        sort_by_start(&mut root_ids, &trace.spans);

        let mut visited = HashSet::new();
        let nodes = root_ids
            .into_iter()
            .filter_map(|id| build_node(&trace.spans, &id, 0, &mut visited))
            .collect();
        Some(nodes)
    }

    /// Union of active and completed summaries, filtered, sorted, paged
    pub fn list_traces(&self, filter: &TraceFilter) -> (Vec<TraceSummary>, usize) {
        let inner = self.inner.lock();
        let search = filter.search.as_deref().map(str::to_lowercase);

        let mut summaries: Vec<TraceSummary> = inner
            .active
            .values()
            .chain(inner.completed.iter())
            .filter(|trace| match filter.status {
                TraceStatusFilter::All => true,
                TraceStatusFilter::Ok => !trace.has_error,
                TraceStatusFilter::Error => trace.has_error,
            })
            .filter(|trace| {
                filter
                    .min_duration_ms
                    .is_none_or(|min| trace.duration_ms() >= min)
                    && filter
                        .max_duration_ms
                        .is_none_or(|max| trace.duration_ms() <= max)
            })
            .filter(|trace| {
                search.as_deref().is_none_or(|needle| {
                    trace.trace_id.to_lowercase().contains(needle)
                        || trace
                            .root_span_name
                            .as_deref()
                            .is_some_and(|name| name.to_lowercase().contains(needle))
                })
            })
            .map(Trace::summary)
            .collect();

        match filter.sort {
            TraceSort::Recent => summaries.sort_by_key(|s| std::cmp::Reverse(s.last_updated)),
            TraceSort::Duration => summaries.sort_by_key(|s| std::cmp::Reverse(s.duration_ms)),
            TraceSort::SpanCount => summaries.sort_by_key(|s| std::cmp::Reverse(s.span_count)),
        }

        let total = summaries.len();
        let page = summaries
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();
        (page, total)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed.len()
    }

    /// Drop everything, bypassing aging
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.active.clear();
        inner.completed.clear();
        inner.span_index.clear();
    }
}

impl Default for TraceAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_TIMEOUT_MS)
    }
}

fn sort_by_start(ids: &mut [String], spans: &HashMap<String, Span>) {
    ids.sort_by_key(|id| {
        spans
            .get(id)
            .and_then(|span| span.start_time)
            .unwrap_or(i64::MAX)
    });
}

fn build_node(
    spans: &HashMap<String, Span>,
    span_id: &str,
    depth: u32,
    visited: &mut HashSet<String>,
) -> Option<SpanNode> {
    if !visited.insert(span_id.to_string()) {
        return None;
    }
    let span = spans.get(span_id)?.clone();
    let mut child_ids = span.child_span_ids.clone();
    sort_by_start(&mut child_ids, spans);
    let children = child_ids
        .iter()
        .filter_map(|child| build_node(spans, child, depth + 1, visited))
        .collect();
    Some(SpanNode {
        span,
        depth,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{EntryKind, next_entry_id};
    use std::collections::HashMap as Ctx;

    fn traced_entry(pairs: &[(&str, &str)], level: Level, timestamp: i64) -> Entry {
        let ctx: Ctx<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Entry {
            id: next_entry_id(),
            received_at: now_ms(),
            app_name: "checkout".to_string(),
            session_name: "main".to_string(),
            host_name: "host".to_string(),
            process_id: 1,
            thread_id: 1,
            timestamp,
            level,
            kind: EntryKind::Message,
            title: None,
            payload: None,
            color: None,
            ctx: Some(ctx),
            depth: None,
            parent_id: None,
            matching_enter_id: None,
            context: None,
        }
    }

    #[test]
    fn test_untagged_entries_ignored() {
        let agg = TraceAggregator::default();
        let entry = traced_entry(&[("tenant", "acme")], Level::Message, 10);
        assert!(agg.process(&entry).is_none());
        assert_eq!(agg.active_count(), 0);
    }

    #[test]
    fn test_assembly_with_late_parent() {
        let agg = TraceAggregator::default();

        let child = traced_entry(
            &[
                (CTX_TRACE_ID, "T"),
                (CTX_SPAN_ID, "B"),
                (CTX_PARENT_SPAN_ID, "A"),
                (CTX_SPAN_NAME, "child"),
            ],
            Level::Message,
            100,
        );
        let summary = agg.process(&child).unwrap();
        // Placeholder parent exists already
        assert_eq!(summary.span_count, 2);
        assert_eq!(summary.root_span_name, None);

        let root = traced_entry(
            &[
                (CTX_TRACE_ID, "T"),
                (CTX_SPAN_ID, "A"),
                (CTX_SPAN_NAME, "root"),
                (CTX_SPAN_DURATION, "50"),
            ],
            Level::Message,
            90,
        );
        let summary = agg.process(&root).unwrap();
        assert_eq!(summary.span_count, 2);
        assert_eq!(summary.root_span_name.as_deref(), Some("root"));

        let trace = agg.get_trace("T").unwrap();
        assert_eq!(trace.spans.len(), 2);
        let a = &trace.spans["A"];
        assert_eq!(a.name.as_deref(), Some("root"));
        assert_eq!(a.child_span_ids, vec!["B".to_string()]);
        assert_eq!(a.duration_ms, Some(50.0));
        assert_eq!(a.end_time, Some(140));
        assert_eq!(trace.root_span_ids, vec!["A".to_string()]);

        let tree = agg.get_span_tree("T").unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].span.name.as_deref(), Some("root"));
        assert_eq!(tree[0].depth, 0);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].span.span_id, "B");
        assert_eq!(tree[0].children[0].depth, 1);
    }

    #[test]
    fn test_child_insert_idempotent() {
        let agg = TraceAggregator::default();
        for _ in 0..3 {
            let entry = traced_entry(
                &[
                    (CTX_TRACE_ID, "T"),
                    (CTX_SPAN_ID, "B"),
                    (CTX_PARENT_SPAN_ID, "A"),
                ],
                Level::Message,
                100,
            );
            agg.process(&entry);
        }
        let trace = agg.get_trace("T").unwrap();
        assert_eq!(trace.spans["A"].child_span_ids.len(), 1);
    }

    #[test]
    fn test_error_flagging() {
        let agg = TraceAggregator::default();
        agg.process(&traced_entry(
            &[(CTX_TRACE_ID, "T")],
            Level::Message,
            10,
        ));
        let trace = agg.get_trace("T").unwrap();
        assert!(!trace.has_error);

        agg.process(&traced_entry(&[(CTX_TRACE_ID, "T")], Level::Error, 20));
        agg.process(&traced_entry(
            &[
                (CTX_TRACE_ID, "T"),
                (CTX_SPAN_ID, "S"),
                (CTX_SPAN_STATUS, "Error"),
            ],
            Level::Message,
            30,
        ));
        let trace = agg.get_trace("T").unwrap();
        assert!(trace.has_error);
        assert_eq!(trace.error_count, 2);
        assert_eq!(trace.spans["S"].status.as_deref(), Some("Error"));
    }

    #[test]
    fn test_time_bounds_widen() {
        let agg = TraceAggregator::default();
        agg.process(&traced_entry(&[(CTX_TRACE_ID, "T")], Level::Message, 500));
        agg.process(&traced_entry(&[(CTX_TRACE_ID, "T")], Level::Message, 100));
        agg.process(&traced_entry(&[(CTX_TRACE_ID, "T")], Level::Message, 900));
        let trace = agg.get_trace("T").unwrap();
        assert_eq!(trace.start_time, 100);
        assert_eq!(trace.end_time, 900);
        assert_eq!(trace.duration_ms(), 800);
    }

    #[test]
    fn test_sweep_moves_idle_traces() {
        let agg = TraceAggregator::new(1_000);
        agg.process(&traced_entry(
            &[(CTX_TRACE_ID, "T"), (CTX_SPAN_ID, "S")],
            Level::Message,
            10,
        ));
        assert_eq!(agg.active_count(), 1);
        assert_eq!(agg.trace_id_for_span("S").as_deref(), Some("T"));

        // Not idle long enough
        assert!(agg.sweep(now_ms()).is_empty());
        assert_eq!(agg.active_count(), 1);

        let moved = agg.sweep(now_ms() + 5_000);
        assert_eq!(moved.len(), 1);
        assert!(moved[0].completed);
        assert_eq!(agg.active_count(), 0);
        assert_eq!(agg.completed_count(), 1);
        assert_eq!(agg.trace_id_for_span("S"), None);

        // Still queryable, and the tree works on the completed shape
        let trace = agg.get_trace("T").unwrap();
        assert!(trace.completed);
        let tree = agg.get_span_tree("T").unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_span_tree_fallback_scans_parentless() {
        let agg = TraceAggregator::default();
        // Only a child arrives; the placeholder parent is parentless but
        // was never recorded in root_span_ids.
        agg.process(&traced_entry(
            &[
                (CTX_TRACE_ID, "T"),
                (CTX_SPAN_ID, "B"),
                (CTX_PARENT_SPAN_ID, "A"),
            ],
            Level::Message,
            100,
        ));
        let tree = agg.get_span_tree("T").unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].span.span_id, "A");
        assert_eq!(tree[0].span.name.as_deref(), Some("unknown"));
        assert_eq!(tree[0].children[0].span.span_id, "B");
    }

    #[test]
    fn test_span_tree_children_sorted_by_start() {
        let agg = TraceAggregator::default();
        agg.process(&traced_entry(
            &[(CTX_TRACE_ID, "T"), (CTX_SPAN_ID, "R"), (CTX_SPAN_NAME, "root")],
            Level::Message,
            10,
        ));
        for (span, ts) in [("late", 300i64), ("early", 100)] {
            agg.process(&traced_entry(
                &[
                    (CTX_TRACE_ID, "T"),
                    (CTX_SPAN_ID, span),
                    (CTX_PARENT_SPAN_ID, "R"),
                ],
                Level::Message,
                ts,
            ));
        }
        let tree = agg.get_span_tree("T").unwrap();
        let children: Vec<&str> = tree[0]
            .children
            .iter()
            .map(|n| n.span.span_id.as_str())
            .collect();
        assert_eq!(children, vec!["early", "late"]);
    }

    #[test]
    fn test_completed_ring_bounded() {
        let agg = TraceAggregator::new(1);
        for i in 0..(COMPLETED_TRACE_CAPACITY + 5) {
            let trace_id = format!("T{i}");
            agg.process(&traced_entry(
                &[(CTX_TRACE_ID, trace_id.as_str())],
                Level::Message,
                i as i64,
            ));
            agg.sweep(now_ms() + 10_000);
        }
        assert_eq!(agg.completed_count(), COMPLETED_TRACE_CAPACITY);
        assert!(agg.get_trace("T0").is_none());
        assert!(agg.get_trace("T5").is_some());
    }

    #[test]
    fn test_list_traces_filter_and_sort() {
        let agg = TraceAggregator::default();
        agg.process(&traced_entry(
            &[(CTX_TRACE_ID, "slow"), (CTX_SPAN_ID, "a"), (CTX_SPAN_NAME, "batch")],
            Level::Message,
            0,
        ));
        agg.process(&traced_entry(&[(CTX_TRACE_ID, "slow")], Level::Message, 5_000));
        agg.process(&traced_entry(
            &[(CTX_TRACE_ID, "broken"), (CTX_SPAN_ID, "b")],
            Level::Error,
            100,
        ));

        let (all, total) = agg.list_traces(&TraceFilter::default());
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        let (errors, _) = agg.list_traces(&TraceFilter {
            status: TraceStatusFilter::Error,
            ..Default::default()
        });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].trace_id, "broken");

        let (long, _) = agg.list_traces(&TraceFilter {
            min_duration_ms: Some(1_000),
            ..Default::default()
        });
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].trace_id, "slow");

        let (named, _) = agg.list_traces(&TraceFilter {
            search: Some("BAT".to_string()),
            ..Default::default()
        });
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].trace_id, "slow");

        let (by_duration, _) = agg.list_traces(&TraceFilter {
            sort: TraceSort::Duration,
            ..Default::default()
        });
        assert_eq!(by_duration[0].trace_id, "slow");
    }
}
