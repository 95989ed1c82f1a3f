#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_domain::{ClientId, RoomName};
use parley_protocol::{ClientCommand, DecodeError, JoinRoom, LeaveRoom, ServerMessage, SignalPeer, decode_command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::server::presence;
use crate::server::room_directory::{Membership, RoomDirectory};
use crate::server::session::{ConnId, ConnectionHandle, Session};

/// Settings for the signal router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
	/// Send a close frame to a connection whose session was overwritten by a
	/// join with the same client id from another connection.
	pub evict_superseded_sessions: bool,

	pub debug_logs: bool,
}

impl Default for RouterConfig {
	fn default() -> Self {
		Self {
			evict_superseded_sessions: false,
			debug_logs: false,
		}
	}
}

/// Why a frame produced no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
	Malformed,
	UnknownType,
	MissingField,
	/// The sender does not own the session named in the frame.
	NotJoined,
	/// `signal` target is not in the room (or the room is gone).
	TargetMissing,
}

impl DropReason {
	pub fn as_str(self) -> &'static str {
		match self {
			DropReason::Malformed => "malformed",
			DropReason::UnknownType => "unknown_type",
			DropReason::MissingField => "missing_field",
			DropReason::NotJoined => "not_joined",
			DropReason::TargetMissing => "target_missing",
		}
	}
}

impl From<&DecodeError> for DropReason {
	fn from(e: &DecodeError) -> Self {
		match e {
			DecodeError::NotAnObject | DecodeError::Json(_) => DropReason::Malformed,
			DecodeError::MissingType | DecodeError::UnknownType(_) => DropReason::UnknownType,
			DecodeError::MissingField(_) | DecodeError::InvalidField { .. } => DropReason::MissingField,
		}
	}
}

/// Outcome of one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
	Joined,
	Relayed,
	Left,
	Dropped(DropReason),
}

/// Directory-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
	pub rooms: usize,
	pub sessions: usize,
}

/// Dispatches client commands against the shared room directory.
///
/// Every frame is applied under one directory lock, so no other connection
/// ever observes a join, leave or relay half-applied. Nothing inside the lock
/// awaits on a connection: pushes go to unbounded writer queues.
#[derive(Debug, Clone)]
pub struct SignalRouter {
	directory: Arc<Mutex<RoomDirectory>>,
	cfg: RouterConfig,
}

impl SignalRouter {
	pub fn new(cfg: RouterConfig) -> Self {
		Self {
			directory: Arc::new(Mutex::new(RoomDirectory::new())),
			cfg,
		}
	}

	/// Decode and dispatch one text frame from `conn`.
	pub async fn handle_text(&self, conn: &ConnectionHandle, text: &str) -> Dispatch {
		metrics::counter!("parley_server_frames_in_total").increment(1);

		let cmd = match decode_command(text) {
			Ok(cmd) => cmd,
			Err(e) => {
				debug!(conn_id = conn.id(), error = %e, "dropping frame");
				return dropped(DropReason::from(&e));
			}
		};

		self.dispatch(conn, cmd).await
	}

	/// Apply an already-decoded command.
	pub async fn dispatch(&self, conn: &ConnectionHandle, cmd: ClientCommand) -> Dispatch {
		if self.cfg.debug_logs {
			debug!(
				conn_id = conn.id(),
				kind = cmd.kind(),
				room = %cmd.room(),
				client_id = %cmd.client_id(),
				"dispatching command"
			);
		}

		let mut dir = self.directory.lock().await;
		let outcome = match cmd {
			ClientCommand::Join(join) => self.join(&mut dir, conn, join),
			ClientCommand::Signal(signal) => relay(&dir, conn, signal),
			ClientCommand::Leave(leave) => depart(&mut dir, conn, leave),
		};

		metrics::gauge!("parley_server_rooms").set(dir.room_count() as f64);

		match outcome {
			Dispatch::Dropped(reason) => dropped(reason),
			other => other,
		}
	}

	/// Terminal cleanup for a closed connection. Returns whether a session was removed.
	pub async fn disconnect(&self, conn_id: ConnId) -> bool {
		let mut dir = self.directory.lock().await;
		let Some((room, session)) = dir.remove_conn(conn_id) else {
			return false;
		};

		info!(conn_id, room = %room, client_id = %session.client_id, "session closed with connection");
		announce_departure(&dir, &room, &session);
		metrics::gauge!("parley_server_rooms").set(dir.room_count() as f64);
		true
	}

	pub async fn stats(&self) -> RouterStats {
		let dir = self.directory.lock().await;
		RouterStats {
			rooms: dir.room_count(),
			sessions: dir.session_count(),
		}
	}

	/// Member ids of `room` in join order, or `None` if the room does not exist.
	pub async fn members(&self, room: &RoomName) -> Option<Vec<ClientId>> {
		let dir = self.directory.lock().await;
		dir.get(room).map(|r| r.sessions().map(|s| s.client_id.clone()).collect())
	}

	pub async fn membership(&self, conn_id: ConnId) -> Option<Membership> {
		self.directory.lock().await.find_by_channel(conn_id)
	}

	fn join(&self, dir: &mut RoomDirectory, conn: &ConnectionHandle, join: JoinRoom) -> Dispatch {
		// One session per connection: moving to another room or id is a leave first.
		if let Some(prev) = dir.find_by_channel(conn.id())
			&& (prev.room != join.room || prev.client_id != join.client_id)
			&& let Some(session) = dir.remove(&prev.room, &prev.client_id)
		{
			debug!(
				conn_id = conn.id(),
				from_room = %prev.room,
				to_room = %join.room,
				"connection switched session; leaving previous"
			);
			announce_departure(dir, &prev.room, &session);
		}

		let JoinRoom {
			room,
			client_id,
			display_name,
		} = join;

		let session = Session::new(client_id.clone(), display_name.clone(), conn.clone());
		if let Some(superseded) = dir.add(&room, session)
			&& superseded.conn_id() != conn.id()
		{
			info!(
				conn_id = conn.id(),
				superseded_conn_id = superseded.conn_id(),
				room = %room,
				client_id = %client_id,
				evict = self.cfg.evict_superseded_sessions,
				"client id rejoined from another connection"
			);
			if self.cfg.evict_superseded_sessions {
				superseded.channel.close();
			}
		}

		let Some(members) = dir.get(&room) else {
			return Dispatch::Dropped(DropReason::NotJoined);
		};

		presence::send_to(conn, &ServerMessage::ExistingPeers {
			peers: members.peer_ids(&client_id),
		});
		presence::fan_out(members, &ServerMessage::NewPeer { id: client_id.clone() }, Some(conn.id()));
		presence::broadcast_user_list(members);
		presence::notify(members, &presence::joined_text(&display_name), Some(conn.id()));

		info!(conn_id = conn.id(), room = %room, client_id = %client_id, members = members.len(), "joined room");
		Dispatch::Joined
	}
}

fn relay(dir: &RoomDirectory, conn: &ConnectionHandle, signal: SignalPeer) -> Dispatch {
	if !dir.owns(conn.id(), &signal.room, &signal.client_id) {
		return Dispatch::Dropped(DropReason::NotJoined);
	}

	let Some(target) = dir.get(&signal.room).and_then(|r| r.get(&signal.target)) else {
		return Dispatch::Dropped(DropReason::TargetMissing);
	};

	let delivered = presence::send_to(&target.channel, &ServerMessage::Signal {
		from: signal.client_id,
		payload: signal.payload,
	});
	if !delivered {
		return Dispatch::Dropped(DropReason::TargetMissing);
	}

	metrics::counter!("parley_server_signals_relayed_total").increment(1);
	Dispatch::Relayed
}

fn depart(dir: &mut RoomDirectory, conn: &ConnectionHandle, leave: LeaveRoom) -> Dispatch {
	if !dir.owns(conn.id(), &leave.room, &leave.client_id) {
		return Dispatch::Dropped(DropReason::NotJoined);
	}

	let Some(session) = dir.remove(&leave.room, &leave.client_id) else {
		return Dispatch::Dropped(DropReason::NotJoined);
	};

	info!(conn_id = conn.id(), room = %leave.room, client_id = %leave.client_id, "left room");
	announce_departure(dir, &leave.room, &session);
	Dispatch::Left
}

/// `peer-left`, then `user-list`, then the leave notice, to whoever remains.
fn announce_departure(dir: &RoomDirectory, room: &RoomName, session: &Session) {
	let Some(remaining) = dir.get(room) else {
		debug!(room = %room, "room emptied and removed");
		return;
	};

	presence::fan_out(remaining, &ServerMessage::PeerLeft {
		id: session.client_id.clone(),
	}, None);
	presence::broadcast_user_list(remaining);
	presence::notify(remaining, &presence::left_text(&session.display_name), None);
}

fn dropped(reason: DropReason) -> Dispatch {
	metrics::counter!("parley_server_frames_dropped_total", "reason" => reason.as_str()).increment(1);
	Dispatch::Dropped(reason)
}
