//! Per-channel bounded retention for high-frequency samples.
//!
//! Streams carry raw data at rates where per-entry fan-out bookkeeping
//! would be wasteful; retention is strictly the N latest samples per
//! channel and there is no aggregation.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use super::types::next_stream_entry_id;

/// One stream sample. Ids come from their own monotonic counter,
/// independent of log entry ids.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub id: u64,
    pub channel: String,
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub stream_type: u8,
    pub group: String,
}

#[derive(Debug)]
pub struct StreamStore {
    channels: RwLock<HashMap<String, VecDeque<StreamEntry>>>,
    max_per_channel: usize,
}

impl StreamStore {
    pub fn new(max_per_channel: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            max_per_channel: max_per_channel.max(1),
        }
    }

    /// Append a sample, evicting the oldest when the channel is full.
    ///
    /// Returns the stored entry and whether this was the channel's first
    /// sample (the trigger for subscriber auto-subscription).
    pub fn add(
        &self,
        channel: &str,
        data: Vec<u8>,
        timestamp: i64,
        stream_type: u8,
        group: String,
    ) -> (StreamEntry, bool) {
        let entry = StreamEntry {
            id: next_stream_entry_id(),
            channel: channel.to_string(),
            data,
            timestamp,
            stream_type,
            group,
        };

        let mut channels = self.channels.write();
        let is_new = !channels.contains_key(channel);
        let queue = channels.entry(channel.to_string()).or_default();
        if queue.len() == self.max_per_channel {
            queue.pop_front();
        }
        queue.push_back(entry.clone());
        (entry, is_new)
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.read().contains_key(channel)
    }

    /// Channel names, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The latest samples of one channel, oldest first
    pub fn get(&self, channel: &str, limit: usize) -> Vec<StreamEntry> {
        let channels = self.channels.read();
        let Some(queue) = channels.get(channel) else {
            return Vec::new();
        };
        let skip = queue.len().saturating_sub(limit);
        queue.iter().skip(skip).cloned().collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn entry_count(&self) -> usize {
        self.channels.read().values().map(VecDeque::len).sum()
    }

    /// Remove all channels
    pub fn clear(&self) {
        self.channels.write().clear();
    }
}
