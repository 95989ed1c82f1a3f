#![forbid(unsafe_code)]

use parley_domain::ClientId;
use serde::Serialize;
use serde_json::value::RawValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
	#[error("json encode error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
	/// Sent once to a joiner: everyone already in the room.
	ExistingPeers { peers: Vec<ClientId> },

	/// Sent to existing members when someone joins.
	NewPeer { id: ClientId },

	/// Relayed negotiation payload.
	Signal { from: ClientId, payload: Box<RawValue> },

	/// Sent to remaining members when someone leaves or disconnects.
	PeerLeft { id: ClientId },

	/// Full membership snapshot.
	UserList { users: Vec<UserEntry> },

	/// Human-readable announcement.
	Notify { message: String },
}

/// One `user-list` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntry {
	pub id: ClientId,
	pub name: String,
}

impl ServerMessage {
	/// Wire name of the message.
	pub fn kind(&self) -> &'static str {
		match self {
			ServerMessage::ExistingPeers { .. } => "existing-peers",
			ServerMessage::NewPeer { .. } => "new-peer",
			ServerMessage::Signal { .. } => "signal",
			ServerMessage::PeerLeft { .. } => "peer-left",
			ServerMessage::UserList { .. } => "user-list",
			ServerMessage::Notify { .. } => "notify",
		}
	}
}

/// Encode a message into the text of one WebSocket frame.
pub fn encode_message(msg: &ServerMessage) -> Result<String, EncodeError> {
	Ok(serde_json::to_string(msg)?)
}
