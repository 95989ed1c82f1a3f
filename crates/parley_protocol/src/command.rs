#![forbid(unsafe_code)]

use parley_domain::{ClientId, ParseIdError, RoomName};
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

/// Reasons an inbound text frame is not a usable command.
///
/// None of these are ever reported back to the client; the server drops the
/// frame and keeps the connection open.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("frame is not a JSON object")]
	NotAnObject,

	#[error("invalid JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("missing \"type\" field")]
	MissingType,

	#[error("unknown command type: {0}")]
	UnknownType(String),

	#[error("missing required field \"{0}\"")]
	MissingField(&'static str),

	#[error("invalid field \"{field}\": {source}")]
	InvalidField {
		field: &'static str,
		#[source]
		source: ParseIdError,
	},
}

/// A classified client command.
#[derive(Debug, Clone)]
pub enum ClientCommand {
	Join(JoinRoom),
	Signal(SignalPeer),
	Leave(LeaveRoom),
}

impl ClientCommand {
	/// Wire name of the command.
	pub fn kind(&self) -> &'static str {
		match self {
			ClientCommand::Join(_) => "join",
			ClientCommand::Signal(_) => "signal",
			ClientCommand::Leave(_) => "leave",
		}
	}

	pub fn room(&self) -> &RoomName {
		match self {
			ClientCommand::Join(j) => &j.room,
			ClientCommand::Signal(s) => &s.room,
			ClientCommand::Leave(l) => &l.room,
		}
	}

	pub fn client_id(&self) -> &ClientId {
		match self {
			ClientCommand::Join(j) => &j.client_id,
			ClientCommand::Signal(s) => &s.client_id,
			ClientCommand::Leave(l) => &l.client_id,
		}
	}
}

/// `join {room, clientId, name?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRoom {
	pub room: RoomName,
	pub client_id: ClientId,
	/// Falls back to the client id when `name` is absent or blank.
	pub display_name: String,
}

/// `signal {room, clientId, target, payload}`.
#[derive(Debug, Clone)]
pub struct SignalPeer {
	pub room: RoomName,
	pub client_id: ClientId,
	pub target: ClientId,
	/// Opaque negotiation payload, kept as the exact JSON text the sender wrote.
	pub payload: Box<RawValue>,
}

/// `leave {room, clientId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRoom {
	pub room: RoomName,
	pub client_id: ClientId,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
	#[serde(rename = "type")]
	kind: Option<String>,
	room: Option<String>,
	#[serde(rename = "clientId")]
	client_id: Option<String>,
	name: Option<String>,
	target: Option<String>,
	payload: Option<Box<RawValue>>,
}

/// Parse and classify one inbound text frame.
pub fn decode_command(text: &str) -> Result<ClientCommand, DecodeError> {
	// serde would also accept a JSON array positionally for a struct.
	if !text.trim_start().starts_with('{') {
		return Err(DecodeError::NotAnObject);
	}

	let raw: RawFrame = serde_json::from_str(text)?;
	let kind = raw.kind.as_deref().ok_or(DecodeError::MissingType)?;

	match kind {
		"join" => {
			let room = room_name(raw.room)?;
			let client_id = client_id_field("clientId", raw.client_id)?;
			let display_name = raw
				.name
				.filter(|n| !n.trim().is_empty())
				.unwrap_or_else(|| client_id.as_str().to_string());

			Ok(ClientCommand::Join(JoinRoom {
				room,
				client_id,
				display_name,
			}))
		}
		"signal" => {
			let room = room_name(raw.room)?;
			let client_id = client_id_field("clientId", raw.client_id)?;
			let target = client_id_field("target", raw.target)?;
			let payload = raw.payload.ok_or(DecodeError::MissingField("payload"))?;

			Ok(ClientCommand::Signal(SignalPeer {
				room,
				client_id,
				target,
				payload,
			}))
		}
		"leave" => Ok(ClientCommand::Leave(LeaveRoom {
			room: room_name(raw.room)?,
			client_id: client_id_field("clientId", raw.client_id)?,
		})),
		other => Err(DecodeError::UnknownType(other.to_string())),
	}
}

fn room_name(value: Option<String>) -> Result<RoomName, DecodeError> {
	let value = value.ok_or(DecodeError::MissingField("room"))?;
	RoomName::new(value).map_err(|source| DecodeError::InvalidField { field: "room", source })
}

fn client_id_field(field: &'static str, value: Option<String>) -> Result<ClientId, DecodeError> {
	let value = value.ok_or(DecodeError::MissingField(field))?;
	ClientId::new(value).map_err(|source| DecodeError::InvalidField { field, source })
}
