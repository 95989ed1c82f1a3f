#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_domain::ClientId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Process-unique connection identifier, assigned at accept time.
pub type ConnId = u64;

/// Work items for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
	/// One encoded text frame.
	Text(Arc<str>),

	/// Liveness probe.
	Ping,

	/// Graceful close frame; the writer stops afterwards.
	Close,
}

/// Handle to push frames at exactly one connection.
///
/// Pushes never block: the queue is drained by the connection's writer task,
/// and a push to a connection that is already gone just reports `false`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	id: ConnId,
	tx: mpsc::UnboundedSender<Outbound>,
	shutdown: CancellationToken,
}

impl ConnectionHandle {
	/// Create a handle and the receiving end its writer task drains.
	pub fn new(id: ConnId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(
			Self {
				id,
				tx,
				shutdown: CancellationToken::new(),
			},
			rx,
		)
	}

	pub fn id(&self) -> ConnId {
		self.id
	}

	pub fn push(&self, item: Outbound) -> bool {
		if self.shutdown.is_cancelled() {
			return false;
		}
		self.tx.send(item).is_ok()
	}

	pub fn push_text(&self, text: &Arc<str>) -> bool {
		self.push(Outbound::Text(Arc::clone(text)))
	}

	/// Ask the writer to send a close frame.
	pub fn close(&self) -> bool {
		self.push(Outbound::Close)
	}

	/// Drop the connection without a close handshake.
	pub fn terminate(&self) {
		self.shutdown.cancel();
	}

	pub fn is_terminated(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Token cancelled on `terminate`; the read loop and writer select on it.
	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}
}

/// Server-side state for one joined client within one room.
#[derive(Debug, Clone)]
pub struct Session {
	pub client_id: ClientId,
	pub display_name: String,
	pub channel: ConnectionHandle,
}

impl Session {
	pub fn new(client_id: ClientId, display_name: impl Into<String>, channel: ConnectionHandle) -> Self {
		Self {
			client_id,
			display_name: display_name.into(),
			channel,
		}
	}

	pub fn conn_id(&self) -> ConnId {
		self.channel.id()
	}
}
