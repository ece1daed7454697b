//! Subscriber registry and fan-out paths.
//!
//! The manager owns per-subscriber state (filter, pause flags, stream
//! subscriptions, delivery watermark) and the outbound channel handles;
//! rooms hold subscriber ids only. A failed send removes the subscriber
//! from the registry and from all room membership, with no retry.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::room::Room;
use crate::core::room_manager::RoomManager;
use crate::core::stream::StreamEntry;
use crate::core::trace::TraceSummary;
use crate::core::types::{CompiledFilter, Entry, EntryFilter, EntryId};
use crate::core::watch::WatchSample;
use crate::fanout::events::{RoomSnapshot, ServerEvent};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound event channel of one subscriber
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct SubscriberState {
    room_id: String,
    filter: CompiledFilter,
    paused: bool,
    /// Entries withheld since the pause
    paused_count: u64,
    last_delivered_entry_id: EntryId,
    stream_channels: HashSet<String>,
    paused_streams: HashSet<String>,
    sender: EventSender,
}

impl SubscriberState {
    fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

pub struct SubscriptionManager {
    rooms: Arc<RoomManager>,
    subscribers: RwLock<HashMap<u64, SubscriberState>>,
}

fn snapshot_of(room: &Room) -> RoomSnapshot {
    RoomSnapshot {
        room: room.id().to_string(),
        stats: room.ring_stats(),
        watches: room.watch_values(),
        sessions: room.sessions(),
        stream_channels: room.stream_channels(),
        producer_count: room.producer_count(),
    }
}

impl SubscriptionManager {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self {
            rooms,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber on a room and send its init frame.
    ///
    /// The subscriber starts unfiltered, unpaused, and auto-subscribed to
    /// the room's pre-existing stream channels.
    pub fn register(&self, room_id: &str, sender: EventSender) -> u64 {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        let room = self.rooms.get_or_create(room_id);
        room.add_subscriber(id);

        let snapshot = snapshot_of(&room);
        let state = SubscriberState {
            room_id: room.id().to_string(),
            filter: CompiledFilter::default(),
            paused: false,
            paused_count: 0,
            last_delivered_entry_id: 0,
            stream_channels: snapshot.stream_channels.iter().cloned().collect(),
            paused_streams: HashSet::new(),
            sender,
        };
        let init = ServerEvent::Init {
            snapshot,
            subscriber_id: id,
            rooms: self.rooms.rooms_info(),
        };
        state.send(init);
        self.subscribers.write().insert(id, state);
        info!("Subscriber {} joined room {}", id, room_id);
        id
    }

    pub fn unregister(&self, id: u64) {
        let Some(state) = self.subscribers.write().remove(&id) else {
            return;
        };
        if let Some(room) = self.rooms.get(&state.room_id) {
            room.remove_subscriber(id);
        }
        info!("Subscriber {} left room {}", id, state.room_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn room_of(&self, id: u64) -> Option<String> {
        self.subscribers.read().get(&id).map(|s| s.room_id.clone())
    }

    /// Send one event to one subscriber
    pub fn send_to(&self, id: u64, event: ServerEvent) {
        let dead = {
            let subscribers = self.subscribers.read();
            subscribers.get(&id).is_some_and(|state| !state.send(event))
        };
        if dead {
            self.drop_subscriber(id);
        }
    }

    pub fn set_filter(&self, id: u64, filter: EntryFilter) {
        if let Some(state) = self.subscribers.write().get_mut(&id) {
            debug!("Subscriber {} filter updated", id);
            state.filter = CompiledFilter::new(filter);
        }
    }

    pub fn pause(&self, id: u64) {
        if let Some(state) = self.subscribers.write().get_mut(&id) {
            state.paused = true;
            state.paused_count = 0;
            debug!("Subscriber {} paused", id);
        }
    }

    /// Resume live delivery, first catching up from the subscriber's
    /// delivery watermark (bounded by what is still in the ring).
    pub fn resume(&self, id: u64) {
        let mut subscribers = self.subscribers.write();
        let Some(state) = subscribers.get_mut(&id) else {
            return;
        };
        state.paused = false;
        debug!(
            "Subscriber {} resumed after {} withheld entries",
            id, state.paused_count
        );
        state.paused_count = 0;

        let Some(room) = self.rooms.get(&state.room_id) else {
            return;
        };
        let tail: Vec<Entry> = room
            .get_since(state.last_delivered_entry_id)
            .into_iter()
            .filter(|entry| state.filter.matches(entry))
            .collect();
        state.last_delivered_entry_id = state
            .last_delivered_entry_id
            .max(room.newest_entry_id());
        if tail.is_empty() {
            return;
        }
        if !state.send(ServerEvent::Entries { entries: tail }) {
            drop(subscribers);
            self.drop_subscriber(id);
        }
    }

    /// Explicit catch-up request from the client
    pub fn send_since(&self, id: u64, since: EntryId) {
        let mut subscribers = self.subscribers.write();
        let Some(state) = subscribers.get_mut(&id) else {
            return;
        };
        let Some(room) = self.rooms.get(&state.room_id) else {
            return;
        };
        let tail: Vec<Entry> = room
            .get_since(since)
            .into_iter()
            .filter(|entry| state.filter.matches(entry))
            .collect();
        state.last_delivered_entry_id = state.last_delivered_entry_id.max(room.newest_entry_id());
        if !state.send(ServerEvent::Entries { entries: tail }) {
            drop(subscribers);
            self.drop_subscriber(id);
        }
    }

    /// Move a subscriber to another room and send the new room's state.
    ///
    /// The subscriber is auto-subscribed to every pre-existing stream
    /// channel of the target room.
    pub fn switch_room(&self, id: u64, new_room_id: &str) {
        let mut subscribers = self.subscribers.write();
        let Some(state) = subscribers.get_mut(&id) else {
            return;
        };
        if let Some(old_room) = self.rooms.get(&state.room_id) {
            old_room.remove_subscriber(id);
        }
        let room = self.rooms.get_or_create(new_room_id);
        room.add_subscriber(id);

        let snapshot = snapshot_of(&room);
        state.room_id = room.id().to_string();
        state.stream_channels = snapshot.stream_channels.iter().cloned().collect();
        state.paused_streams.clear();
        state.paused_count = 0;
        state.last_delivered_entry_id = room.newest_entry_id();
        info!("Subscriber {} switched to room {}", id, new_room_id);
        if !state.send(ServerEvent::RoomSwitched { snapshot }) {
            drop(subscribers);
            self.drop_subscriber(id);
        }
    }

    // ------------------------------------------------------------------
    // Stream subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe_stream(&self, id: u64, channel: &str) {
        if let Some(state) = self.subscribers.write().get_mut(&id) {
            state.stream_channels.insert(channel.to_string());
            state.send(ServerEvent::StreamSubscribed {
                channel: channel.to_string(),
            });
        }
    }

    pub fn unsubscribe_stream(&self, id: u64, channel: &str) {
        if let Some(state) = self.subscribers.write().get_mut(&id) {
            state.stream_channels.remove(channel);
            state.paused_streams.remove(channel);
            state.send(ServerEvent::StreamUnsubscribed {
                channel: channel.to_string(),
            });
        }
    }

    pub fn pause_stream(&self, id: u64, channel: &str) {
        if let Some(state) = self.subscribers.write().get_mut(&id) {
            state.paused_streams.insert(channel.to_string());
            state.send(ServerEvent::StreamPaused {
                channel: channel.to_string(),
            });
        }
    }

    pub fn resume_stream(&self, id: u64, channel: &str) {
        if let Some(state) = self.subscribers.write().get_mut(&id) {
            state.paused_streams.remove(channel);
            state.send(ServerEvent::StreamResumed {
                channel: channel.to_string(),
            });
        }
    }

    pub fn stream_subscriptions(&self, id: u64) -> Vec<String> {
        self.subscribers
            .read()
            .get(&id)
            .map(|state| {
                let mut channels: Vec<String> = state.stream_channels.iter().cloned().collect();
                channels.sort();
                channels
            })
            .unwrap_or_default()
    }

    /// A channel saw its first sample: subscribe every current member
    pub fn auto_subscribe_channel(&self, room_id: &str, channel: &str) {
        let mut dead = Vec::new();
        {
            let mut subscribers = self.subscribers.write();
            for (id, state) in subscribers.iter_mut() {
                if state.room_id != room_id {
                    continue;
                }
                if state.stream_channels.insert(channel.to_string())
                    && !state.send(ServerEvent::StreamSubscribed {
                        channel: channel.to_string(),
                    })
                {
                    dead.push(*id);
                }
            }
        }
        self.drop_subscribers(dead);
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    /// Deliver a batch to every non-paused room subscriber whose filter
    /// admits it, advancing each delivery watermark to the batch maximum.
    ///
    /// Returns the number of entry deliveries performed.
    pub fn broadcast_entries(&self, room_id: &str, entries: &[Entry]) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0usize;
        {
            let mut subscribers = self.subscribers.write();
            for (id, state) in subscribers.iter_mut() {
                if state.room_id != room_id {
                    continue;
                }
                if state.paused {
                    state.paused_count += entries.len() as u64;
                    continue;
                }
                let admitted: Vec<Entry> = entries
                    .iter()
                    .filter(|entry| state.filter.matches(entry))
                    .cloned()
                    .collect();
                let Some(max_id) = admitted.iter().map(|e| e.id).max() else {
                    continue;
                };
                if state.send(ServerEvent::Entries { entries: admitted.clone() }) {
                    state.last_delivered_entry_id = state.last_delivered_entry_id.max(max_id);
                    delivered += admitted.len();
                } else {
                    dead.push(*id);
                }
            }
        }
        self.drop_subscribers(dead);
        delivered
    }

    /// Returns the number of subscribers the sample reached
    pub fn broadcast_watch(&self, room_id: &str, sample: &WatchSample) -> usize {
        self.broadcast_room_event(
            room_id,
            ServerEvent::Watch {
                watch: sample.clone(),
            },
        )
    }

    /// Streams bypass throttling; only channel subscribers receive them
    pub fn broadcast_stream(&self, room_id: &str, entry: &StreamEntry) {
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, state) in subscribers.iter() {
                if state.room_id != room_id
                    || !state.stream_channels.contains(&entry.channel)
                    || state.paused_streams.contains(&entry.channel)
                {
                    continue;
                }
                if !state.send(ServerEvent::Stream {
                    entry: entry.clone(),
                }) {
                    dead.push(*id);
                }
            }
        }
        self.drop_subscribers(dead);
    }

    pub fn broadcast_trace(&self, room_id: &str, summary: TraceSummary) {
        self.broadcast_room_event(room_id, ServerEvent::Trace { trace: summary });
    }

    /// Deliver one event to every subscriber of a room
    pub fn broadcast_room_event(&self, room_id: &str, event: ServerEvent) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0usize;
        {
            let subscribers = self.subscribers.read();
            for (id, state) in subscribers.iter() {
                if state.room_id != room_id {
                    continue;
                }
                if state.send(event.clone()) {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }
        self.drop_subscribers(dead);
        delivered
    }

    /// Deliver one event to every subscriber on the server
    pub fn broadcast_all(&self, event: ServerEvent) {
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, state) in subscribers.iter() {
                if !state.send(event.clone()) {
                    dead.push(*id);
                }
            }
        }
        self.drop_subscribers(dead);
    }

    fn drop_subscriber(&self, id: u64) {
        warn!("Subscriber {} send failed, removing", id);
        self.unregister(id);
    }

    fn drop_subscribers(&self, ids: Vec<u64>) {
        for id in ids {
            self.drop_subscriber(id);
        }
    }
}
