// ── Room handles ──

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use xcomfort_api::{Connector, RctMode};

use super::BridgeSession;
use crate::command::{CommandFuture, RoomCommand};
use crate::model::Room;

/// A room as seen at lookup time, bound to the session that reported it.
pub struct RoomHandle<C: Connector> {
    room: Arc<Room>,
    session: BridgeSession<C>,
}

impl<C: Connector> RoomHandle<C> {
    pub(super) fn new(room: Arc<Room>, session: BridgeSession<C>) -> Self {
        Self { room, session }
    }

    /// The session's current view of this room, or the snapshot if the
    /// session no longer holds it.
    pub fn latest(&self) -> Arc<Room> {
        self.session
            .rooms()
            .get(self.room.id)
            .unwrap_or_else(|| Arc::clone(&self.room))
    }

    /// Wait for the next change to this room and return it.
    ///
    /// `None` once the session has dropped the room or shut down.
    pub async fn changed(&self) -> Option<Arc<Room>> {
        let mut rooms = self.session.room_changes();
        let mut seen = rooms.borrow_and_update().get(&self.room.id).cloned();
        loop {
            rooms.changed().await.ok()?;
            let current = rooms.borrow_and_update().get(&self.room.id).cloned()?;
            match &seen {
                Some(previous) if Arc::ptr_eq(previous, &current) => {}
                _ => return Some(current),
            }
            seen = Some(current);
        }
    }

    /// Send `command` for this room.
    ///
    /// Commands that cannot be built from the room's reported state fail
    /// locally with [`CommandError::Invalid`](crate::CommandError::Invalid)
    /// and are never sent.
    pub fn send(&self, command: RoomCommand) -> CommandFuture {
        match command.resolve(&self.latest()) {
            Ok(outbound) => self.session.send_command(outbound),
            Err(e) => {
                tracing::debug!(room_id = %self.room.id, error = %e, "room command refused locally");
                CommandFuture::ready(Err(e))
            }
        }
    }

    pub fn set_target_temperature(&self, celsius: f64) -> CommandFuture {
        self.send(RoomCommand::TargetTemperature(celsius))
    }

    pub fn set_mode(&self, mode: RctMode) -> CommandFuture {
        self.send(RoomCommand::Mode(mode))
    }
}

impl<C: Connector> Deref for RoomHandle<C> {
    type Target = Room;

    fn deref(&self) -> &Room {
        &self.room
    }
}

impl<C: Connector> Clone for RoomHandle<C> {
    fn clone(&self) -> Self {
        Self {
            room: Arc::clone(&self.room),
            session: self.session.clone(),
        }
    }
}

impl<C: Connector> fmt::Debug for RoomHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.room, f)
    }
}
