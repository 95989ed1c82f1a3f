#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::server::session::{ConnId, ConnectionHandle, Outbound};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Acknowledgement side of a connection's liveness flag.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
	alive: Arc<AtomicBool>,
}

impl LivenessProbe {
	/// Record a probe acknowledgement (a Pong from the peer).
	pub fn acknowledge(&self) {
		self.alive.store(true, Ordering::Relaxed);
	}
}

#[derive(Debug)]
struct Tracked {
	channel: ConnectionHandle,
	alive: Arc<AtomicBool>,
}

/// Tracks every open connection's liveness flag.
///
/// Each tick a connection whose flag is still clear from the previous tick is
/// terminated; everyone else has the flag cleared and gets a Ping. One missed
/// probe is tolerated, two are not.
#[derive(Debug, Clone, Default)]
pub struct LivenessMonitor {
	inner: Arc<Mutex<HashMap<ConnId, Tracked>>>,
}

impl LivenessMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Start tracking a connection. It counts as alive until the first tick.
	pub fn register(&self, channel: &ConnectionHandle) -> LivenessProbe {
		let alive = Arc::new(AtomicBool::new(true));
		self.inner.lock().insert(channel.id(), Tracked {
			channel: channel.clone(),
			alive: Arc::clone(&alive),
		});
		LivenessProbe { alive }
	}

	pub fn unregister(&self, conn_id: ConnId) {
		self.inner.lock().remove(&conn_id);
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().is_empty()
	}

	/// Run one tick. Returns the number of connections terminated.
	pub fn sweep(&self) -> usize {
		let mut tracked = self.inner.lock();
		let mut terminated = 0;

		tracked.retain(|conn_id, t| {
			let answered = t.alive.swap(false, Ordering::Relaxed);
			if answered && t.channel.push(Outbound::Ping) {
				return true;
			}

			if answered {
				debug!(conn_id = *conn_id, "probe could not be queued; terminating");
			} else {
				info!(conn_id = *conn_id, "no probe acknowledgement; terminating connection");
			}
			t.channel.terminate();
			terminated += 1;
			false
		});

		if terminated > 0 {
			metrics::counter!("parley_server_liveness_terminations_total").increment(terminated as u64);
		}
		terminated
	}
}

/// Sweep `monitor` every `interval` until `shutdown` is cancelled.
///
/// The first sweep runs one full interval after the call.
pub fn spawn_liveness_monitor(
	monitor: LivenessMonitor,
	interval: Duration,
	shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = ticker.tick() => {
					let terminated = monitor.sweep();
					if terminated > 0 {
						debug!(terminated, remaining = monitor.len(), "liveness sweep");
					}
				}
			}
		}
	})
}
