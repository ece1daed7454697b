use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Entry identifier, assigned from a process-wide monotonic counter
pub type EntryId = u64;

/// Process-wide entry id source. Never rewinds, not even on room clear.
static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide stream entry id source, independent of the entry counter.
static NEXT_STREAM_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next entry id
pub fn next_entry_id() -> EntryId {
    NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Allocate the next stream entry id
pub fn next_stream_entry_id() -> u64 {
    NEXT_STREAM_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Current wall clock in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Ctx key carrying the correlation id dimension of the ring indexes
pub const CTX_CORRELATION_ID: &str = "correlationId";

/// Severity levels, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Debug,
    Verbose,
    #[default]
    Message,
    Warning,
    Error,
    Fatal,
}

impl TryFrom<u8> for Level {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(Level::Debug),
            1 => Ok(Level::Verbose),
            2 => Ok(Level::Message),
            3 => Ok(Level::Warning),
            4 => Ok(Level::Error),
            5 => Ok(Level::Fatal),
            other => Err(other),
        }
    }
}

/// What a log entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    #[default]
    Message,
    Binary,
    Object,
    Source,
    Graphic,
    Variable,
    Separator,
    EnterMethod,
    LeaveMethod,
}

impl EntryKind {
    /// Wire discriminator (process-flow kinds live in a separate range)
    pub fn discriminator(self) -> u16 {
        match self {
            EntryKind::Message => 0,
            EntryKind::Binary => 1,
            EntryKind::Object => 2,
            EntryKind::Source => 3,
            EntryKind::Graphic => 4,
            EntryKind::Variable => 5,
            EntryKind::Separator => 6,
            EntryKind::EnterMethod => 100,
            EntryKind::LeaveMethod => 101,
        }
    }

    /// True for process-flow Enter/Leave entries
    pub fn is_process_flow(self) -> bool {
        matches!(self, EntryKind::EnterMethod | EntryKind::LeaveMethod)
    }
}

impl TryFrom<u16> for EntryKind {
    type Error = u16;

    fn try_from(value: u16) -> std::result::Result<Self, u16> {
        match value {
            0 => Ok(EntryKind::Message),
            1 => Ok(EntryKind::Binary),
            2 => Ok(EntryKind::Object),
            3 => Ok(EntryKind::Source),
            4 => Ok(EntryKind::Graphic),
            5 => Ok(EntryKind::Variable),
            6 => Ok(EntryKind::Separator),
            100 => Ok(EntryKind::EnterMethod),
            101 => Ok(EntryKind::LeaveMethod),
            other => Err(other),
        }
    }
}

/// A single log record.
///
/// Identity and producer-supplied fields are immutable once pushed; the
/// derived fields (`depth`, `parent_id`, `matching_enter_id`, `context`)
/// are attached by the method-context tracker at insertion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    /// Server receive time in ms
    pub received_at: i64,
    pub app_name: String,
    pub session_name: String,
    pub host_name: String,
    pub process_id: u32,
    pub thread_id: u32,
    /// Producer timestamp in ms
    pub timestamp: i64,
    pub level: Level,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    /// Open string->string tag map; underscore keys drive the trace aggregator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_enter_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
}

impl Entry {
    /// The correlation id, if the producer tagged one
    pub fn correlation_id(&self) -> Option<&str> {
        self.ctx
            .as_ref()
            .and_then(|ctx| ctx.get(CTX_CORRELATION_ID))
            .map(String::as_str)
    }

    /// Ctx tag lookup
    pub fn ctx_value(&self, key: &str) -> Option<&str> {
        self.ctx
            .as_ref()
            .and_then(|ctx| ctx.get(key))
            .map(String::as_str)
    }
}

/// Entry filter as supplied by subscribers and queries.
///
/// Empty sets and absent fields mean "no constraint".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryFilter {
    pub sessions: Option<HashSet<String>>,
    pub levels: Option<HashSet<Level>>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub title_pattern: Option<String>,
    pub message_pattern: Option<String>,
    pub inverse_match: bool,
    pub correlation_id: Option<String>,
    pub ctx: Option<HashMap<String, String>>,
}

impl EntryFilter {
    pub fn is_empty(&self) -> bool {
        self.sessions.as_ref().is_none_or(HashSet::is_empty)
            && self.levels.as_ref().is_none_or(HashSet::is_empty)
            && self.from.is_none()
            && self.to.is_none()
            && self.title_pattern.is_none()
            && self.message_pattern.is_none()
            && self.correlation_id.is_none()
            && self.ctx.as_ref().is_none_or(HashMap::is_empty)
    }
}

/// A filter with its regex predicates compiled once.
///
/// A pattern that fails to compile is silently dropped; the query must
/// not fail on bad regex input.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    filter: EntryFilter,
    title_re: Option<Regex>,
    message_re: Option<Regex>,
}

fn compile_pattern(pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("Dropping unparseable filter pattern {:?}: {}", pattern, e);
            None
        }
    }
}

impl CompiledFilter {
    pub fn new(filter: EntryFilter) -> Self {
        let title_re = compile_pattern(filter.title_pattern.as_deref());
        let message_re = compile_pattern(filter.message_pattern.as_deref());
        Self {
            filter,
            title_re,
            message_re,
        }
    }

    pub fn filter(&self) -> &EntryFilter {
        &self.filter
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(sessions) = &self.filter.sessions {
            if !sessions.is_empty() && !sessions.contains(&entry.session_name) {
                return false;
            }
        }
        if let Some(levels) = &self.filter.levels {
            if !levels.is_empty() && !levels.contains(&entry.level) {
                return false;
            }
        }
        if let Some(from) = self.filter.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.filter.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(correlation) = &self.filter.correlation_id {
            if entry.correlation_id() != Some(correlation.as_str()) {
                return false;
            }
        }
        if let Some(wanted) = &self.filter.ctx {
            for (key, value) in wanted {
                if entry.ctx_value(key) != Some(value.as_str()) {
                    return false;
                }
            }
        }

        // The inverse flag applies to the pattern component only.
        if self.title_re.is_some() || self.message_re.is_some() {
            let title_ok = self.title_re.as_ref().is_none_or(|re| {
                entry.title.as_deref().is_some_and(|title| re.is_match(title))
            });
            let message_ok = self.message_re.as_ref().is_none_or(|re| {
                entry
                    .payload
                    .as_deref()
                    .is_some_and(|data| re.is_match(&String::from_utf8_lossy(data)))
            });
            let pattern_match = title_ok && message_ok;
            if pattern_match == self.filter.inverse_match {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_entry(session: &str, level: Level, title: &str) -> Entry {
        Entry {
            id: next_entry_id(),
            received_at: now_ms(),
            app_name: "app".to_string(),
            session_name: session.to_string(),
            host_name: "host".to_string(),
            process_id: 100,
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
    fn test_entry_ids_monotonic() {
        let a = next_entry_id();
        let b = next_entry_id();
        let c = next_entry_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_stream_ids_independent() {
        let e1 = next_entry_id();
        let s1 = next_stream_entry_id();
        let s2 = next_stream_entry_id();
        let e2 = next_entry_id();
        // Both counters advance monotonically and independently
        assert!(e2 > e1);
        assert!(s2 > s1);
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Verbose);
        assert!(Level::Verbose < Level::Message);
        assert!(Level::Message < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_level_from_u8() {
        assert_eq!(Level::try_from(0u8), Ok(Level::Debug));
        assert_eq!(Level::try_from(5u8), Ok(Level::Fatal));
        assert_eq!(Level::try_from(6u8), Err(6));
    }

    #[test]
    fn test_kind_discriminator_round_trip() {
        for kind in [
            EntryKind::Message,
            EntryKind::Binary,
            EntryKind::Separator,
            EntryKind::EnterMethod,
            EntryKind::LeaveMethod,
        ] {
            assert_eq!(EntryKind::try_from(kind.discriminator()), Ok(kind));
        }
        assert_eq!(EntryKind::try_from(999u16), Err(999));
    }

    #[test]
    fn test_filter_sessions_and_levels() {
        let filter = CompiledFilter::new(EntryFilter {
            sessions: Some(["main".to_string()].into()),
            levels: Some([Level::Error, Level::Fatal].into()),
            ..Default::default()
        });

        assert!(filter.matches(&test_entry("main", Level::Error, "boom")));
        assert!(!filter.matches(&test_entry("main", Level::Message, "ok")));
        assert!(!filter.matches(&test_entry("other", Level::Error, "boom")));
    }

    #[test]
    fn test_filter_title_pattern_case_insensitive() {
        let filter = CompiledFilter::new(EntryFilter {
            title_pattern: Some("time.?out".to_string()),
            ..Default::default()
        });

        assert!(filter.matches(&test_entry("s", Level::Message, "Request TIMEOUT")));
        assert!(!filter.matches(&test_entry("s", Level::Message, "request ok")));
    }

    #[test]
    fn test_filter_inverse_match_inverts_patterns_only() {
        let filter = CompiledFilter::new(EntryFilter {
            levels: Some([Level::Warning].into()),
            title_pattern: Some("noise".to_string()),
            inverse_match: true,
            ..Default::default()
        });

        // Level constraint still applies; pattern result is inverted.
        assert!(filter.matches(&test_entry("s", Level::Warning, "useful signal")));
        assert!(!filter.matches(&test_entry("s", Level::Warning, "noise floor")));
        assert!(!filter.matches(&test_entry("s", Level::Message, "useful signal")));
    }

    #[test]
    fn test_filter_invalid_regex_is_dropped() {
        let filter = CompiledFilter::new(EntryFilter {
            title_pattern: Some("(unclosed".to_string()),
            levels: Some([Level::Error].into()),
            ..Default::default()
        });

        // The bad pattern is gone, the rest of the filter still applies.
        assert!(filter.matches(&test_entry("s", Level::Error, "anything")));
        assert!(!filter.matches(&test_entry("s", Level::Message, "anything")));
    }

    #[test]
    fn test_filter_correlation_id() {
        let mut entry = test_entry("s", Level::Message, "t");
        entry.ctx = Some([(CTX_CORRELATION_ID.to_string(), "req-9".to_string())].into());

        let filter = CompiledFilter::new(EntryFilter {
            correlation_id: Some("req-9".to_string()),
            ..Default::default()
        });
        assert!(filter.matches(&entry));
        assert!(!filter.matches(&test_entry("s", Level::Message, "t")));
    }

    #[test]
    fn test_message_pattern_against_payload() {
        let mut entry = test_entry("s", Level::Message, "t");
        entry.payload = Some(b"connection refused by upstream".to_vec());

        let filter = CompiledFilter::new(EntryFilter {
            message_pattern: Some("refused".to_string()),
            ..Default::default()
        });
        assert!(filter.matches(&entry));

        entry.payload = Some(b"all good".to_vec());
        assert!(!filter.matches(&entry));
    }
}
