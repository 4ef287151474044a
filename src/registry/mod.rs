//! Connection Registry
//!
//! Fixed table of 32 connection slots. A request header names a slot by
//! index; open claims it, close releases it, every other operation
//! leases the current occupant. Slots carry a generation counter so a
//! handle from a closed connection can never reach a successor that
//! reused the index.

mod connection;

pub use connection::{Connection, EngineVersion};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{status, DbError};
use crate::protocol::MAX_CONNECTIONS;

/// Error text for an open addressed to an occupied slot.
pub const DUPLICATE_CONNECTION: &str = "Cannot create multiple connections to the database";

/// A generation-stamped slot handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Slot index this handle points at.
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot {
    generation: u32,
    conn: Option<Arc<Connection>>,
}

/// The 32-way connection table.
pub struct Registry {
    slots: Vec<Mutex<Slot>>,
}

impl Registry {
    /// A registry with every slot vacant.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_CONNECTIONS);
        for _ in 0..MAX_CONNECTIONS {
            slots.push(Mutex::new(Slot {
                generation: 0,
                conn: None,
            }));
        }
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.lock().conn.is_some()).count()
    }

    /// Install a connection into the slot named by the request header.
    /// Fails without touching the occupant when the slot is taken, and
    /// with the no-connection status when the index is out of range.
    pub fn claim(&self, index: u32, conn: Arc<Connection>) -> Result<SlotId, DbError> {
        let slot = self
            .slots
            .get(index as usize)
            .ok_or_else(|| DbError::Native(status::NO_CONNECTION))?;
        let mut slot = slot.lock();
        if slot.conn.is_some() {
            return Err(DbError::preset(status::OPEN_ERROR, DUPLICATE_CONNECTION));
        }
        slot.conn = Some(conn);
        Ok(SlotId {
            index,
            generation: slot.generation,
        })
    }

    /// The current occupant of a slot, if any.
    pub fn lease(&self, index: u32) -> Option<Arc<Connection>> {
        self.slots.get(index as usize)?.lock().conn.clone()
    }

    /// The occupant a handle was issued for. None once the slot was
    /// released, even if the index has been reused since.
    pub fn lookup(&self, id: SlotId) -> Option<Arc<Connection>> {
        let slot = self.slots.get(id.index as usize)?.lock();
        if slot.generation != id.generation {
            return None;
        }
        slot.conn.clone()
    }

    /// Vacate a slot, bumping its generation, and hand the former
    /// occupant back for teardown.
    pub fn release(&self, index: u32) -> Option<Arc<Connection>> {
        let mut slot = self.slots.get(index as usize)?.lock();
        let conn = slot.conn.take();
        if conn.is_some() {
            slot.generation = slot.generation.wrapping_add(1);
        }
        conn
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
