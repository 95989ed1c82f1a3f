#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use futures::{SinkExt, StreamExt};
use parley_protocol::DEFAULT_MAX_FRAME_SIZE;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info};

use crate::server::liveness::LivenessMonitor;
use crate::server::router::SignalRouter;
use crate::server::session::{ConnId, ConnectionHandle, Outbound};

/// How long to keep reading after a close frame so the reply gets flushed.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Upper bound for one inbound WebSocket message and frame.
	pub max_frame_bytes: usize,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

impl ConnectionSettings {
	fn ws_config(&self) -> WebSocketConfig {
		WebSocketConfig::default()
			.max_message_size(Some(self.max_frame_bytes))
			.max_frame_size(Some(self.max_frame_bytes))
	}
}

/// Drive one accepted TCP connection until it closes.
///
/// Whatever ends the connection (close frame, read error, liveness
/// termination), the session it owns is cleaned up before this returns.
pub async fn handle_connection(
	conn_id: ConnId,
	stream: TcpStream,
	peer: SocketAddr,
	router: SignalRouter,
	liveness: LivenessMonitor,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("parley_server_active_connections").decrement(1.0);
		}
	}

	let ws = tokio_tungstenite::accept_async_with_config(stream, Some(settings.ws_config()))
		.await
		.with_context(|| format!("websocket handshake with {peer}"))?;

	metrics::gauge!("parley_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	info!(conn_id, %peer, "accepted connection");

	let (mut sink, mut stream) = ws.split();
	let (handle, mut outbound_rx) = ConnectionHandle::new(conn_id);
	let shutdown = handle.shutdown_token();
	let probe = liveness.register(&handle);

	let writer_shutdown = shutdown.clone();
	let writer = tokio::spawn(async move {
		loop {
			let item = tokio::select! {
				_ = writer_shutdown.cancelled() => break,
				item = outbound_rx.recv() => item,
			};
			let Some(item) = item else {
				break;
			};

			let (msg, last) = match item {
				Outbound::Text(text) => (Message::Text(text.to_string().into()), false),
				Outbound::Ping => (Message::Ping(Default::default()), false),
				Outbound::Close => (Message::Close(None), true),
			};

			let sent = tokio::select! {
				_ = writer_shutdown.cancelled() => break,
				res = sink.send(msg) => res,
			};
			if let Err(e) = sent {
				debug!(conn_id, error = %e, "write failed; closing connection");
				writer_shutdown.cancel();
				break;
			}

			// After a close frame the read loop waits for the peer's reply.
			if last {
				break;
			}
		}
	});

	let mut peer_closed = false;
	loop {
		let next = tokio::select! {
			_ = shutdown.cancelled() => {
				debug!(conn_id, "connection terminated");
				break;
			}
			next = stream.next() => next,
		};

		match next {
			Some(Ok(Message::Text(text))) => {
				let outcome = router.handle_text(&handle, text.as_str()).await;
				debug!(conn_id, ?outcome, "frame handled");
			}
			Some(Ok(Message::Pong(_))) => probe.acknowledge(),
			Some(Ok(Message::Binary(data))) => {
				debug!(conn_id, len = data.len(), "ignoring binary frame");
			}
			Some(Ok(Message::Close(frame))) => {
				debug!(conn_id, ?frame, "peer closed connection");
				peer_closed = true;
				break;
			}
			Some(Ok(_)) => {}
			Some(Err(e)) => {
				debug!(conn_id, error = %e, "read failed");
				break;
			}
			None => break,
		}
	}

	liveness.unregister(conn_id);
	router.disconnect(conn_id).await;

	// tungstenite queues the close reply and only writes it on a later read.
	if peer_closed {
		let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
			while let Some(Ok(_)) = stream.next().await {}
		})
		.await;
		if drained.is_err() {
			debug!(conn_id, "close handshake did not finish in time");
		}
	}

	handle.terminate();
	let _ = writer.await;

	info!(conn_id, %peer, "connection closed");
	Ok(())
}
