//! Routing from decoded producer records to room state and fan-out.
//!
//! The dispatcher owns the producer registry; rooms hold producer ids
//! only. Every record funnels through [`Dispatcher::dispatch`], which
//! applies the store mutation first and enqueues broadcasts second, so a
//! trace summary can never overtake the aggregation it reports.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::core::room_manager::RoomManager;
use crate::core::types::{Entry, now_ms};
use crate::core::watch::WatchSample;
use crate::ingest::wire::{
    ControlCommand, IngestRecord, LogEntryRecord, ProcessFlowRecord, StreamRecord, WatchRecord,
};
use crate::fanout::events::{ClearScope, ServerEvent};
use crate::fanout::subscription::SubscriptionManager;
use crate::fanout::throttle::Throttler;
use crate::metrics::PerfCounters;

static NEXT_PRODUCER_ID: AtomicU64 = AtomicU64::new(1);

/// One connected producer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: u64,
    pub remote_addr: String,
    pub app_name: String,
    pub room_id: String,
    pub connected_at: i64,
}

pub struct Dispatcher {
    rooms: Arc<RoomManager>,
    subs: Arc<SubscriptionManager>,
    throttler: Arc<Throttler>,
    counters: Arc<PerfCounters>,
    producers: RwLock<HashMap<u64, ProducerInfo>>,
}

impl Dispatcher {
    pub fn new(
        rooms: Arc<RoomManager>,
        subs: Arc<SubscriptionManager>,
        throttler: Arc<Throttler>,
        counters: Arc<PerfCounters>,
    ) -> Self {
        Self {
            rooms,
            subs,
            throttler,
            counters,
            producers: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Producer lifecycle
    // ------------------------------------------------------------------

    /// Register a freshly accepted producer connection in the default room
    pub fn producer_connected(&self, remote_addr: String) -> u64 {
        let id = NEXT_PRODUCER_ID.fetch_add(1, Ordering::Relaxed);
        let info = ProducerInfo {
            id,
            remote_addr,
            app_name: String::new(),
            room_id: crate::core::room::DEFAULT_ROOM.to_string(),
            connected_at: now_ms(),
        };
        self.rooms.get_or_create(&info.room_id).add_producer(id);
        self.subs.broadcast_room_event(
            &info.room_id,
            ServerEvent::ClientConnect {
                producer: info.clone(),
            },
        );
        self.counters.producer_connected();
        info!("Producer {} connected from {}", id, info.remote_addr);
        self.producers.write().insert(id, info);
        id
    }

    pub fn producer_disconnected(&self, id: u64) {
        let Some(info) = self.producers.write().remove(&id) else {
            return;
        };
        if let Some(room) = self.rooms.get(&info.room_id) {
            room.remove_producer(id);
        }
        self.subs.broadcast_room_event(
            &info.room_id,
            ServerEvent::ClientDisconnect {
                producer_id: id,
                app_name: info.app_name.clone(),
            },
        );
        self.counters.producer_disconnected();
        info!("Producer {} disconnected", id);
    }

    fn set_app_name(&self, id: u64, app_name: String) {
        if let Some(info) = self.producers.write().get_mut(&id) {
            debug!("Producer {} identifies as {}", id, app_name);
            info.app_name = app_name;
        }
    }

    /// Rebind a producer to another room mid-session; both rooms' members
    /// learn about the move.
    fn move_producer(&self, id: u64, new_room_id: &str) {
        let (old_room_id, app_name) = {
            let mut producers = self.producers.write();
            let Some(info) = producers.get_mut(&id) else {
                return;
            };
            if info.room_id == new_room_id {
                return;
            }
            let old = info.room_id.clone();
            info.room_id = new_room_id.to_string();
            (old, info.app_name.clone())
        };

        if let Some(old_room) = self.rooms.get(&old_room_id) {
            old_room.remove_producer(id);
        }
        self.rooms.get_or_create(new_room_id).add_producer(id);
        info!("Producer {} moved from {} to {}", id, old_room_id, new_room_id);

        for room_id in [old_room_id.as_str(), new_room_id] {
            self.subs.broadcast_room_event(
                room_id,
                ServerEvent::ConnectionEvent {
                    producer_id: id,
                    app_name: app_name.clone(),
                    event: "producerMoved".to_string(),
                    room: new_room_id.to_string(),
                },
            );
        }
    }

    pub fn producer_info(&self, id: u64) -> Option<ProducerInfo> {
        self.producers.read().get(&id).cloned()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.read().len()
    }

    // ------------------------------------------------------------------
    // Record routing
    // ------------------------------------------------------------------

    /// Apply one decoded record from a producer
    pub fn dispatch(&self, producer_id: u64, record: IngestRecord) {
        let Some(producer) = self.producer_info(producer_id) else {
            return;
        };

        match record {
            // The session layer consumes auth records before dispatch
            IngestRecord::Auth { .. } => {}
            IngestRecord::LogHeader { app_name } => self.set_app_name(producer_id, app_name),
            IngestRecord::RoomBind { room } => self.move_producer(producer_id, &room),
            IngestRecord::LogEntry(record) => self.apply_entry(&producer, entry_from_log(record, &producer)),
            IngestRecord::ProcessFlow(record) => {
                self.apply_entry(&producer, entry_from_flow(record, &producer))
            }
            IngestRecord::Watch(record) => self.apply_watch(&producer, record),
            IngestRecord::Stream(record) => self.apply_stream(&producer, record),
            IngestRecord::Control { command } => self.apply_control(&producer, command),
        }
    }

    fn apply_entry(&self, producer: &ProducerInfo, entry: Entry) {
        let room = self.rooms.get_or_create(&producer.room_id);
        let stored = room.push_entry(entry);
        self.counters.record_entry_received();

        // Aggregate before the summary is enqueued
        if let Some(summary) = room.process_trace(&stored) {
            self.subs.broadcast_trace(&producer.room_id, summary);
        }
        self.throttler.enqueue_entry(&producer.room_id, stored);
    }

    fn apply_watch(&self, producer: &ProducerInfo, record: WatchRecord) {
        let room = self.rooms.get_or_create(&producer.room_id);
        let sample = WatchSample {
            name: record.name,
            value: record.value,
            timestamp: record.timestamp,
            origin_app_name: producer.app_name.clone(),
            watch_type: record.watch_type,
            group: record.group,
        };
        room.set_watch(sample.clone());
        self.counters.record_watch_received();
        self.throttler.enqueue_watch(&producer.room_id, sample);
    }

    fn apply_stream(&self, producer: &ProducerInfo, record: StreamRecord) {
        let room = self.rooms.get_or_create(&producer.room_id);
        let (entry, first_sample) = room.add_stream(
            &record.channel,
            record.data,
            record.timestamp,
            record.stream_type,
            record.group,
        );
        if first_sample {
            self.subs
                .auto_subscribe_channel(&producer.room_id, &record.channel);
        }
        self.throttler.forward_stream(&producer.room_id, &entry);
    }

    fn apply_control(&self, producer: &ProducerInfo, command: ControlCommand) {
        let room = self.rooms.get_or_create(&producer.room_id);
        let scope = match command {
            ControlCommand::ClearLog => {
                room.clear_log();
                ClearScope::Log
            }
            ControlCommand::ClearWatches => {
                room.clear_watches();
                ClearScope::Watches
            }
            ControlCommand::ClearAll => {
                room.clear_all();
                ClearScope::All
            }
            ControlCommand::ClearProcessFlow => {
                room.clear_process_flow();
                ClearScope::ProcessFlow
            }
        };
        info!("Producer {} cleared {:?} in room {}", producer.id, scope, producer.room_id);
        self.subs
            .broadcast_room_event(&producer.room_id, ServerEvent::Clear { scope });
    }
}

fn entry_from_log(record: LogEntryRecord, producer: &ProducerInfo) -> Entry {
    Entry {
        id: 0,
        received_at: 0,
        app_name: producer.app_name.clone(),
        session_name: record.session,
        host_name: record.host,
        process_id: record.process_id,
        thread_id: record.thread_id,
        timestamp: record.timestamp,
        level: record.level,
        kind: record.kind,
        title: record.title,
        payload: record.payload,
        color: record.color,
        ctx: record.ctx,
        depth: None,
        parent_id: None,
        matching_enter_id: None,
        context: None,
    }
}

fn entry_from_flow(record: ProcessFlowRecord, producer: &ProducerInfo) -> Entry {
    Entry {
        id: 0,
        received_at: 0,
        app_name: producer.app_name.clone(),
        session_name: record.session,
        host_name: record.host,
        process_id: record.process_id,
        thread_id: record.thread_id,
        timestamp: record.timestamp,
        level: crate::core::types::Level::Debug,
        kind: record.kind,
        title: Some(record.title),
        payload: None,
        color: None,
        ctx: None,
        depth: None,
        parent_id: None,
        matching_enter_id: None,
        context: None,
    }
}
