//! Watch store: current value per name plus a four-tier history.
//!
//! Raw samples are retained for a short window; 1-second, 1-minute, and
//! 1-hour aggregates are produced by cascading open buckets that flush as
//! sample timestamps cross bucket boundaries. Broadcast coalescing happens
//! elsewhere; storage here is lossless up to tier capacity.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Tier capacities: raw samples, 1s, 1m, 1h buckets
pub const RAW_CAPACITY: usize = 6_000;
pub const SECONDS_CAPACITY: usize = 3_600;
pub const MINUTES_CAPACITY: usize = 1_440;
pub const HOURS_CAPACITY: usize = 168;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

/// One observed watch value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSample {
    pub name: String,
    pub value: String,
    pub timestamp: i64,
    pub origin_app_name: String,
    pub watch_type: u8,
    pub group: String,
}

/// A closed aggregate bucket
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_start: i64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

/// One point of a history query; raw points carry count = 1
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// History tier selection; `Auto` picks by queried range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    #[default]
    Auto,
    Raw,
    Seconds,
    Minutes,
    Hours,
}

#[derive(Debug, Clone)]
struct RawPoint {
    timestamp: i64,
    value: f64,
    label: Option<String>,
}

#[derive(Debug, Clone)]
struct OpenBucket {
    key: i64,
    sum: f64,
    min: f64,
    max: f64,
    count: u64,
}

impl OpenBucket {
    fn new(key: i64, value: f64) -> Self {
        Self {
            key,
            sum: value,
            min: value,
            max: value,
            count: 1,
        }
    }

    fn from_parts(key: i64, sum: f64, min: f64, max: f64, count: u64) -> Self {
        Self {
            key,
            sum,
            min,
            max,
            count,
        }
    }

    fn accumulate(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    fn merge(&mut self, sum: f64, min: f64, max: f64, count: u64) {
        self.sum += sum;
        self.min = self.min.min(min);
        self.max = self.max.max(max);
        self.count += count;
    }

    fn close(&self, unit_ms: i64) -> Bucket {
        Bucket {
            bucket_start: self.key * unit_ms,
            avg: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            count: self.count,
        }
    }
}

#[derive(Debug, Default)]
struct WatchState {
    current: Option<WatchSample>,
    /// Occurrence counters for non-numeric values
    string_counts: HashMap<String, u64>,
    raw: VecDeque<RawPoint>,
    seconds: VecDeque<Bucket>,
    minutes: VecDeque<Bucket>,
    hours: VecDeque<Bucket>,
    open_second: Option<OpenBucket>,
    open_minute: Option<OpenBucket>,
    open_hour: Option<OpenBucket>,
}

fn push_capped(ring: &mut VecDeque<Bucket>, bucket: Bucket, capacity: usize) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(bucket);
}

impl WatchState {
    fn record(&mut self, sample: WatchSample) {
        let (value, label) = match sample.value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => (v, None),
            _ => {
                let count = self
                    .string_counts
                    .entry(sample.value.clone())
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
                (*count as f64, Some(sample.value.clone()))
            }
        };

        // Latest producer timestamp wins for the current value
        let newer = self
            .current
            .as_ref()
            .is_none_or(|current| sample.timestamp >= current.timestamp);
        let timestamp = sample.timestamp;
        if newer {
            self.current = Some(sample);
        }

        if self.raw.len() == RAW_CAPACITY {
            self.raw.pop_front();
        }
        self.raw.push_back(RawPoint {
            timestamp,
            value,
            label,
        });

        self.feed_second(timestamp, value);
    }

    fn feed_second(&mut self, timestamp: i64, value: f64) {
        let key = timestamp.div_euclid(SECOND_MS);
        match &mut self.open_second {
            Some(open) if key > open.key => {
                let closed = open.close(SECOND_MS);
                let (sec_key, sum, min, max, count) =
                    (open.key, open.sum, open.min, open.max, open.count);
                push_capped(&mut self.seconds, closed, SECONDS_CAPACITY);
                self.feed_minute(sec_key, sum, min, max, count);
                self.open_second = Some(OpenBucket::new(key, value));
            }
            // Same second, or a late sample: fold into the open bucket so
            // bucket starts stay strictly ascending.
            Some(open) => open.accumulate(value),
            None => self.open_second = Some(OpenBucket::new(key, value)),
        }
    }

    fn feed_minute(&mut self, sec_key: i64, sum: f64, min: f64, max: f64, count: u64) {
        let key = sec_key.div_euclid(60);
        match &mut self.open_minute {
            Some(open) if key > open.key => {
                let closed = open.close(MINUTE_MS);
                let (min_key, osum, omin, omax, ocount) =
                    (open.key, open.sum, open.min, open.max, open.count);
                push_capped(&mut self.minutes, closed, MINUTES_CAPACITY);
                self.feed_hour(min_key, osum, omin, omax, ocount);
                self.open_minute = Some(OpenBucket::from_parts(key, sum, min, max, count));
            }
            Some(open) => open.merge(sum, min, max, count),
            None => self.open_minute = Some(OpenBucket::from_parts(key, sum, min, max, count)),
        }
    }

    fn feed_hour(&mut self, min_key: i64, sum: f64, min: f64, max: f64, count: u64) {
        let key = min_key.div_euclid(60);
        match &mut self.open_hour {
            Some(open) if key > open.key => {
                let closed = open.close(HOUR_MS);
                push_capped(&mut self.hours, closed, HOURS_CAPACITY);
                self.open_hour = Some(OpenBucket::from_parts(key, sum, min, max, count));
            }
            Some(open) => open.merge(sum, min, max, count),
            None => self.open_hour = Some(OpenBucket::from_parts(key, sum, min, max, count)),
        }
    }

    fn earliest(&self) -> Option<i64> {
        self.hours
            .front()
            .map(|b| b.bucket_start)
            .or_else(|| self.minutes.front().map(|b| b.bucket_start))
            .or_else(|| self.seconds.front().map(|b| b.bucket_start))
            .or_else(|| self.raw.front().map(|p| p.timestamp))
    }

    fn latest(&self) -> Option<i64> {
        self.raw
            .back()
            .map(|p| p.timestamp)
            .or_else(|| self.current.as_ref().map(|c| c.timestamp))
    }

    fn tier_points(
        &self,
        closed: &VecDeque<Bucket>,
        open: &Option<OpenBucket>,
        unit_ms: i64,
    ) -> Vec<HistoryPoint> {
        closed
            .iter()
            .copied()
            .chain(open.as_ref().map(|open| open.close(unit_ms)))
            .map(|bucket| HistoryPoint {
                timestamp: bucket.bucket_start,
                value: bucket.avg,
                min: bucket.min,
                max: bucket.max,
                count: bucket.count,
                label: None,
            })
            .collect()
    }

    fn history(&self, from: Option<i64>, to: Option<i64>, resolution: Resolution) -> Vec<HistoryPoint> {
        let from = from.or_else(|| self.earliest()).unwrap_or(0);
        let to = to.or_else(|| self.latest()).unwrap_or(i64::MAX);

        let resolution = match resolution {
            Resolution::Auto => {
                let range = to.saturating_sub(from);
                if range < 30 * SECOND_MS {
                    Resolution::Raw
                } else if range < HOUR_MS {
                    Resolution::Seconds
                } else if range < DAY_MS {
                    Resolution::Minutes
                } else {
                    Resolution::Hours
                }
            }
            fixed => fixed,
        };

        let points = match resolution {
            Resolution::Raw => self
                .raw
                .iter()
                .map(|point| HistoryPoint {
                    timestamp: point.timestamp,
                    value: point.value,
                    min: point.value,
                    max: point.value,
                    count: 1,
                    label: point.label.clone(),
                })
                .collect(),
            Resolution::Seconds => self.tier_points(&self.seconds, &self.open_second, SECOND_MS),
            Resolution::Minutes => self.tier_points(&self.minutes, &self.open_minute, MINUTE_MS),
            Resolution::Hours => self.tier_points(&self.hours, &self.open_hour, HOUR_MS),
            Resolution::Auto => unreachable!(),
        };

        points
            .into_iter()
            .filter(|p| p.timestamp >= from && p.timestamp <= to)
            .collect()
    }

    fn clear_history(&mut self) {
        self.string_counts.clear();
        self.raw.clear();
        self.seconds.clear();
        self.minutes.clear();
        self.hours.clear();
        self.open_second = None;
        self.open_minute = None;
        self.open_hour = None;
    }
}

/// Current values and tiered history for all watches of one room
#[derive(Debug, Default)]
pub struct WatchStore {
    watches: RwLock<HashMap<String, WatchState>>,
}

impl WatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample: update the current value, append to raw, cascade.
    pub fn set(&self, sample: WatchSample) {
        let mut watches = self.watches.write();
        watches
            .entry(sample.name.clone())
            .or_default()
            .record(sample);
    }

    pub fn get_current(&self, name: &str) -> Option<WatchSample> {
        self.watches.read().get(name)?.current.clone()
    }

    /// All current values, sorted by name (init frame payload)
    pub fn current_values(&self) -> Vec<WatchSample> {
        let watches = self.watches.read();
        let mut values: Vec<WatchSample> = watches
            .values()
            .filter_map(|state| state.current.clone())
            .collect();
        values.sort_by(|a, b| a.name.cmp(&b.name));
        values
    }

    pub fn get_history(
        &self,
        name: &str,
        from: Option<i64>,
        to: Option<i64>,
        resolution: Resolution,
    ) -> Vec<HistoryPoint> {
        self.watches
            .read()
            .get(name)
            .map(|state| state.history(from, to, resolution))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.watches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.read().is_empty()
    }

    /// Empty tiers and reset aggregators; current values are untouched
    pub fn clear_history(&self, name: Option<&str>) {
        let mut watches = self.watches.write();
        match name {
            Some(name) => {
                if let Some(state) = watches.get_mut(name) {
                    state.clear_history();
                }
            }
            None => {
                for state in watches.values_mut() {
                    state.clear_history();
                }
            }
        }
    }

    /// Drop all watches entirely
    pub fn clear(&self) {
        self.watches.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, value: &str, timestamp: i64) -> WatchSample {
        WatchSample {
            name: name.to_string(),
            value: value.to_string(),
            timestamp,
            origin_app_name: "app".to_string(),
            watch_type: 2,
            group: String::new(),
        }
    }

    #[test]
    fn test_tier_rollup_twelve_seconds() {
        let store = WatchStore::new();
        // One sample per 100 ms for 12 seconds, value = second index + 0.5
        for tick in 0..120 {
            let ts = tick * 100;
            let value = (ts / 1000) as f64 + 0.5;
            store.set(sample("cpu", &value.to_string(), ts));
        }

        let seconds = store.get_history("cpu", None, None, Resolution::Seconds);
        assert_eq!(seconds.len(), 12);
        for (index, point) in seconds.iter().enumerate() {
            assert_eq!(point.timestamp, index as i64 * 1000);
            assert_eq!(point.count, 10);
            let expected = index as f64 + 0.5;
            assert!((point.value - expected).abs() < 1e-9);
            assert!(point.min <= point.value && point.value <= point.max);
        }

        // Second 11 is still open, so the minute aggregator has seen 110
        // samples; the boundary-crossing sample flushes the full 120.
        store.set(sample("cpu", "60.5", 60_000));
        let minutes = store.get_history("cpu", None, Some(59_999), Resolution::Minutes);
        assert_eq!(minutes.len(), 1);
        assert_eq!(minutes[0].count, 120);
        assert!((minutes[0].value - 6.0).abs() < 1e-9);
        assert!((minutes[0].min - 0.5).abs() < 1e-9);
        assert!((minutes[0].max - 11.5).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_starts_strictly_ascending() {
        let store = WatchStore::new();
        for tick in 0..50 {
            store.set(sample("mem", "1.0", tick * 500));
        }
        let points = store.get_history("mem", None, None, Resolution::Seconds);
        for pair in points.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
            assert!(pair[0].count >= 1);
        }
    }

    #[test]
    fn test_current_value_last_writer_wins() {
        let store = WatchStore::new();
        store.set(sample("conn", "10", 2_000));
        store.set(sample("conn", "5", 1_000));
        let current = store.get_current("conn").unwrap();
        assert_eq!(current.value, "10");
        assert_eq!(current.timestamp, 2_000);

        store.set(sample("conn", "7", 3_000));
        assert_eq!(store.get_current("conn").unwrap().value, "7");
    }

    #[test]
    fn test_non_numeric_counted_per_distinct_string() {
        let store = WatchStore::new();
        store.set(sample("state", "connected", 100));
        store.set(sample("state", "connected", 200));
        store.set(sample("state", "idle", 300));
        store.set(sample("state", "connected", 400));

        let raw = store.get_history("state", None, None, Resolution::Raw);
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[0].value, 1.0);
        assert_eq!(raw[1].value, 2.0);
        assert_eq!(raw[2].value, 1.0);
        assert_eq!(raw[3].value, 3.0);
        assert_eq!(raw[2].label.as_deref(), Some("idle"));

        // Current value keeps the raw string
        assert_eq!(store.get_current("state").unwrap().value, "connected");
    }

    #[test]
    fn test_auto_resolution_rule() {
        let store = WatchStore::new();
        for tick in 0..100 {
            store.set(sample("lat", "1", tick * 1000));
        }
        // 20 s window -> raw; raw points are count = 1
        let raw = store.get_history("lat", Some(0), Some(20_000), Resolution::Auto);
        assert!(raw.iter().all(|p| p.count == 1));
        assert_eq!(raw.len(), 21);

        // 90 s window -> 1 s tier
        let secs = store.get_history("lat", Some(0), Some(90_000), Resolution::Auto);
        assert_eq!(secs.len(), 91);

        // 2 h window -> 1 m tier
        let mins = store.get_history("lat", Some(0), Some(2 * 3_600_000), Resolution::Auto);
        assert_eq!(mins.len(), 2);

        // 3 d window -> 1 h tier
        let hours = store.get_history("lat", Some(0), Some(3 * 86_400_000), Resolution::Auto);
        assert_eq!(hours.len(), 1);
    }

    #[test]
    fn test_clear_history_keeps_current_values() {
        let store = WatchStore::new();
        store.set(sample("cpu", "5", 1_000));
        store.set(sample("cpu", "6", 2_000));
        store.clear_history(Some("cpu"));

        assert!(store.get_history("cpu", None, None, Resolution::Raw).is_empty());
        assert!(
            store
                .get_history("cpu", None, None, Resolution::Seconds)
                .is_empty()
        );
        assert_eq!(store.get_current("cpu").unwrap().value, "6");

        // Aggregators restart cleanly after the reset
        store.set(sample("cpu", "9", 3_000));
        let raw = store.get_history("cpu", None, None, Resolution::Raw);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].value, 9.0);
    }

    #[test]
    fn test_raw_capacity_bound() {
        let store = WatchStore::new();
        for tick in 0..(RAW_CAPACITY as i64 + 10) {
            store.set(sample("hot", "1", tick));
        }
        let raw = store.get_history("hot", None, None, Resolution::Raw);
        assert_eq!(raw.len(), RAW_CAPACITY);
        assert_eq!(raw[0].timestamp, 10);
    }

    #[test]
    fn test_rollup_conservation_minute_counts() {
        let store = WatchStore::new();
        // Two full minutes of one sample per second
        for tick in 0..121 {
            store.set(sample("rps", &format!("{}", tick % 7), tick * 1000));
        }
        let minutes = store.get_history("rps", None, None, Resolution::Minutes);
        // Minute 0 closed with 60 one-second buckets of count 1 each
        assert_eq!(minutes[0].count, 60);
        assert!(minutes[0].min <= minutes[0].value && minutes[0].value <= minutes[0].max);
    }
}
