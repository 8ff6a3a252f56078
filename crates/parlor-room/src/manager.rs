use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use parlor_core::ids::RoomId;
use parlor_core::provider::ChatProvider;
use parlor_store::Database;

use crate::actor::{RoomActor, RoomHandle};
use crate::error::RoomError;
use crate::log::DEFAULT_WINDOW;

/// Owns every live room. Each room gets its own database file and its own
/// actor; nothing is shared across rooms, so one busy or wedged room cannot
/// slow another down.
pub struct RoomManager {
    rooms: DashMap<RoomId, RoomEntry>,
    data_dir: Option<PathBuf>,
    provider: Arc<dyn ChatProvider>,
    window: usize,
}

#[derive(Clone)]
struct RoomEntry {
    handle: RoomHandle,
    db: Database,
}

impl RoomManager {
    /// `data_dir: None` keeps every room in memory (tests).
    pub fn new(data_dir: Option<PathBuf>, provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            rooms: DashMap::new(),
            data_dir,
            provider,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Handle for a room, starting its actor on first use.
    pub fn room(&self, room_id: &RoomId) -> Result<RoomHandle, RoomError> {
        Ok(self.entry(room_id)?.handle)
    }

    /// The room's database, for request/response surfaces that read or
    /// write outside the actor (ratings).
    pub fn database(&self, room_id: &RoomId) -> Result<Database, RoomError> {
        Ok(self.entry(room_id)?.db)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn entry(&self, room_id: &RoomId) -> Result<RoomEntry, RoomError> {
        validate_room_id(room_id)?;

        if let Some(entry) = self.rooms.get(room_id) {
            return Ok(entry.clone());
        }

        // The dashmap entry lock makes concurrent first-use race-free: the
        // loser of the race finds the occupied entry and reuses it.
        match self.rooms.entry(room_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let db = match &self.data_dir {
                    Some(dir) => Database::open(&dir.join(format!("{room_id}.db")))?,
                    None => Database::in_memory()?,
                };
                let handle = RoomActor::spawn(
                    room_id.clone(),
                    db.clone(),
                    Arc::clone(&self.provider),
                    self.window,
                )?;
                info!(room_id = %room_id, "room opened");
                let entry = RoomEntry { handle, db };
                vacant.insert(entry.clone());
                Ok(entry)
            }
        }
    }
}

/// Room ids become file names, so only a conservative charset is accepted.
fn validate_room_id(room_id: &RoomId) -> Result<(), RoomError> {
    let raw = room_id.as_str();
    if raw.is_empty() || raw.len() > 128 {
        return Err(RoomError::InvalidRoom(raw.to_string()));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RoomError::InvalidRoom(raw.to_string()));
    }
    Ok(())
}
