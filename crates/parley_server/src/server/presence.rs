#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_protocol::{ServerMessage, encode_message};
use tracing::{debug, warn};

use crate::server::room_directory::Room;
use crate::server::session::{ConnId, ConnectionHandle};

/// Encode once for a whole fan-out.
pub(crate) fn encode(msg: &ServerMessage) -> Option<Arc<str>> {
	match encode_message(msg) {
		Ok(text) => Some(Arc::from(text)),
		Err(e) => {
			warn!(kind = msg.kind(), error = %e, "failed to encode server message");
			None
		}
	}
}

/// Push one message to one connection.
pub fn send_to(channel: &ConnectionHandle, msg: &ServerMessage) -> bool {
	let Some(text) = encode(msg) else {
		return false;
	};

	let ok = channel.push_text(&text);
	if !ok {
		debug!(conn_id = channel.id(), kind = msg.kind(), "send skipped: connection gone");
	}
	ok
}

/// Push `msg` to every member except `excluding`. Returns how many pushes
/// were accepted; a failed push never stops the rest.
pub fn fan_out(room: &Room, msg: &ServerMessage, excluding: Option<ConnId>) -> usize {
	let Some(text) = encode(msg) else {
		return 0;
	};

	let mut delivered = 0;
	for session in room.sessions() {
		if Some(session.conn_id()) == excluding {
			continue;
		}

		if session.channel.push_text(&text) {
			delivered += 1;
		} else {
			debug!(
				conn_id = session.conn_id(),
				client_id = %session.client_id,
				kind = msg.kind(),
				"fan-out skipped: connection gone"
			);
		}
	}

	delivered
}

/// Push the full membership snapshot to every member.
pub fn broadcast_user_list(room: &Room) -> usize {
	fan_out(room, &ServerMessage::UserList { users: room.users() }, None)
}

/// Push a human-readable announcement to every member except `excluding`.
pub fn notify(room: &Room, message: &str, excluding: Option<ConnId>) -> usize {
	fan_out(
		room,
		&ServerMessage::Notify {
			message: message.to_string(),
		},
		excluding,
	)
}

pub fn joined_text(display_name: &str) -> String {
	format!("{display_name} joined the room")
}

pub fn left_text(display_name: &str) -> String {
	format!("{display_name} left the room")
}
