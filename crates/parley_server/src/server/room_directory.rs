#![forbid(unsafe_code)]

use std::collections::HashMap;

use indexmap::IndexMap;
use parley_domain::{ClientId, RoomName};
use parley_protocol::UserEntry;

use crate::server::session::{ConnId, Session};

/// Members of one room, in join order.
///
/// Overwriting an existing id keeps its position.
#[derive(Debug, Default)]
pub struct Room {
	members: IndexMap<ClientId, Session>,
}

impl Room {
	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	pub fn get(&self, client_id: &ClientId) -> Option<&Session> {
		self.members.get(client_id)
	}

	pub fn sessions(&self) -> impl Iterator<Item = &Session> {
		self.members.values()
	}

	/// Member ids other than `excluding`.
	pub fn peer_ids(&self, excluding: &ClientId) -> Vec<ClientId> {
		self.members.keys().filter(|id| *id != excluding).cloned().collect()
	}

	/// `user-list` snapshot.
	pub fn users(&self) -> Vec<UserEntry> {
		self.members
			.values()
			.map(|s| UserEntry {
				id: s.client_id.clone(),
				name: s.display_name.clone(),
			})
			.collect()
	}
}

/// Where a connection's session lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
	pub room: RoomName,
	pub client_id: ClientId,
}

/// Room name to members, plus a reverse index from connection to its session.
///
/// A room is present only while it has members. The reverse index only ever
/// points at a session the connection still owns.
#[derive(Debug, Default)]
pub struct RoomDirectory {
	rooms: HashMap<RoomName, Room>,
	by_conn: HashMap<ConnId, Membership>,
}

impl RoomDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the room, creating an empty one if absent.
	///
	/// Callers must insert a member before releasing the directory, or the
	/// empty room will stay listed.
	pub fn ensure(&mut self, room: &RoomName) -> &mut Room {
		self.rooms.entry(room.clone()).or_default()
	}

	/// Insert or overwrite the session under its client id.
	///
	/// Returns the session that was replaced, if any. When the replaced session
	/// belonged to another connection, that connection loses its index entry and
	/// will not remove anything when it closes. A connection that already owns a
	/// different membership must leave it first.
	pub fn add(&mut self, room: &RoomName, session: Session) -> Option<Session> {
		let conn_id = session.conn_id();
		let client_id = session.client_id.clone();

		let previous = self.ensure(room).members.insert(client_id.clone(), session);

		if let Some(prev) = previous.as_ref()
			&& prev.conn_id() != conn_id
		{
			self.unindex(prev.conn_id(), room, &client_id);
		}

		self.by_conn.insert(conn_id, Membership {
			room: room.clone(),
			client_id,
		});

		previous
	}

	/// Remove a session; deletes the room when it becomes empty. No-op when
	/// either the room or the id is unknown.
	pub fn remove(&mut self, room: &RoomName, client_id: &ClientId) -> Option<Session> {
		let entry = self.rooms.get_mut(room)?;
		let removed = entry.members.shift_remove(client_id)?;

		if entry.is_empty() {
			self.rooms.remove(room);
		}

		self.unindex(removed.conn_id(), room, client_id);
		Some(removed)
	}

	/// Remove whatever session `conn_id` owns.
	pub fn remove_conn(&mut self, conn_id: ConnId) -> Option<(RoomName, Session)> {
		let Membership { room, client_id } = self.find_by_channel(conn_id)?;
		let session = self.remove(&room, &client_id)?;
		Some((room, session))
	}

	/// Ids in `room` other than `excluding`, in join order. Empty for unknown rooms.
	pub fn peers(&self, room: &RoomName, excluding: &ClientId) -> Vec<ClientId> {
		self.rooms.get(room).map(|r| r.peer_ids(excluding)).unwrap_or_default()
	}

	pub fn find_by_channel(&self, conn_id: ConnId) -> Option<Membership> {
		self.by_conn.get(&conn_id).cloned()
	}

	/// Whether `conn_id` currently owns the session `(room, client_id)`.
	pub fn owns(&self, conn_id: ConnId, room: &RoomName, client_id: &ClientId) -> bool {
		self.by_conn
			.get(&conn_id)
			.is_some_and(|m| &m.room == room && &m.client_id == client_id)
	}

	pub fn get(&self, room: &RoomName) -> Option<&Room> {
		self.rooms.get(room)
	}

	pub fn contains(&self, room: &RoomName) -> bool {
		self.rooms.contains_key(room)
	}

	pub fn room_count(&self) -> usize {
		self.rooms.len()
	}

	pub fn session_count(&self) -> usize {
		self.rooms.values().map(Room::len).sum()
	}

	fn unindex(&mut self, conn_id: ConnId, room: &RoomName, client_id: &ClientId) {
		if self
			.by_conn
			.get(&conn_id)
			.is_some_and(|m| &m.room == room && &m.client_id == client_id)
		{
			self.by_conn.remove(&conn_id);
		}
	}
}
