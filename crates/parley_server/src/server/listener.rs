#![forbid(unsafe_code)]

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::liveness::LivenessMonitor;
use crate::server::router::SignalRouter;

/// Accept connections forever, one task per connection.
pub async fn serve(
	listener: TcpListener,
	router: SignalRouter,
	liveness: LivenessMonitor,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				// Usually fd exhaustion; back off instead of spinning.
				warn!(error = %e, "accept failed");
				tokio::time::sleep(Duration::from_millis(100)).await;
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("parley_server_connections_total").increment(1);

		if let Err(e) = stream.set_nodelay(true) {
			debug!(conn_id, error = %e, "set_nodelay failed");
		}

		let router = router.clone();
		let liveness = liveness.clone();
		let settings = settings.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, peer, router, liveness, settings).await {
				warn!(conn_id, %peer, error = %e, "connection handler exited with error");
			}
		});
	}
}
