//! Lazy room registry.
//!
//! Rooms come into existence on first reference and stay until an operator
//! deletes them; the `default` room can be cleared but never removed.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::error::{LanternError, Result};
use super::room::{DEFAULT_ROOM, Room, RoomConfig, RoomInfo};

/// Operator-resize bounds for the per-room entry ring
pub const MIN_RING_CAPACITY: usize = 1_000;
pub const MAX_RING_CAPACITY: usize = 1_000_000;

/// Raised once per newly created room, after it is visible in the map
pub type RoomCreatedHook = Box<dyn Fn(&str) + Send + Sync>;

/// Aggregate statistics over all rooms
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub room_count: usize,
    pub total_entries: usize,
    pub total_producers: usize,
    pub total_subscribers: usize,
}

pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    config: RoomConfig,
    on_created: RwLock<Option<RoomCreatedHook>>,
}

impl RoomManager {
    /// Create the manager with the indelible default room in place
    pub fn new(config: RoomConfig) -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(
            DEFAULT_ROOM.to_string(),
            Arc::new(Room::new(DEFAULT_ROOM.to_string(), &config)),
        );
        Self {
            rooms: RwLock::new(rooms),
            config,
            on_created: RwLock::new(None),
        }
    }

    /// Install the room-created hook. Not a synchronisation point: readers
    /// may observe a room before its hook has fired.
    pub fn set_on_created(&self, hook: RoomCreatedHook) {
        *self.on_created.write() = Some(hook);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.read().get(id).cloned()
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().get(id) {
            return room.clone();
        }

        let (room, created) = {
            let mut rooms = self.rooms.write();
            match rooms.get(id) {
                Some(room) => (room.clone(), false),
                None => {
                    let room = Arc::new(Room::new(id.to_string(), &self.config));
                    rooms.insert(id.to_string(), room.clone());
                    (room, true)
                }
            }
        };

        if created {
            info!("Room created: {}", id);
            if let Some(hook) = self.on_created.read().as_ref() {
                hook(id);
            }
        }
        room
    }

    /// Clear the room and remove it; `default` refuses deletion
    pub fn delete_room(&self, id: &str) -> Result<()> {
        if id == DEFAULT_ROOM {
            return Err(LanternError::DefaultRoomUndeletable);
        }
        let removed = {
            let mut rooms = self.rooms.write();
            let room = rooms
                .get(id)
                .cloned()
                .ok_or_else(|| LanternError::RoomNotFound(id.to_string()))?;
            room.clear_all();
            rooms.remove(id)
        };
        if removed.is_some() {
            info!("Room deleted: {}", id);
        }
        Ok(())
    }

    /// Resize a room's entry ring, keeping its newest entries
    pub fn resize_room(&self, id: &str, capacity: usize) -> Result<()> {
        if !(MIN_RING_CAPACITY..=MAX_RING_CAPACITY).contains(&capacity) {
            return Err(LanternError::InvalidCapacity {
                requested: capacity,
                min: MIN_RING_CAPACITY,
                max: MAX_RING_CAPACITY,
            });
        }
        let room = self
            .get(id)
            .ok_or_else(|| LanternError::RoomNotFound(id.to_string()))?;
        room.resize_ring(capacity);
        info!("Room {} resized to {} entries", id, capacity);
        Ok(())
    }

    pub fn list_rooms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn rooms_info(&self) -> Vec<RoomInfo> {
        let rooms = self.rooms.read();
        let mut info: Vec<RoomInfo> = rooms.values().map(|room| room.info()).collect();
        info.sort_by(|a, b| a.id.cmp(&b.id));
        info
    }

    pub fn last_activity_map(&self) -> HashMap<String, i64> {
        self.rooms
            .read()
            .iter()
            .map(|(id, room)| (id.clone(), room.last_activity()))
            .collect()
    }

    pub fn stats(&self) -> ManagerStats {
        let rooms = self.rooms.read();
        let mut stats = ManagerStats {
            room_count: rooms.len(),
            total_entries: 0,
            total_producers: 0,
            total_subscribers: 0,
        };
        for room in rooms.values() {
            let info = room.info();
            stats.total_entries += info.entry_count;
            stats.total_producers += info.producer_count;
            stats.total_subscribers += info.subscriber_count;
        }
        stats
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// All rooms, for sweep-style iteration
    pub fn all_rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().values().cloned().collect()
    }
}
