#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use futures::{SinkExt, StreamExt};
use parley_domain::RoomName;
use parley_server::server::connection::ConnectionSettings;
use parley_server::server::listener::serve;
use parley_server::server::liveness::{LivenessMonitor, spawn_liveness_monitor};
use parley_server::server::router::{RouterConfig, RouterStats, SignalRouter};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("PARLEY_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

struct TestServer {
	addr: SocketAddr,
	router: SignalRouter,
	shutdown: CancellationToken,
	accept_task: JoinHandle<()>,
}

impl Drop for TestServer {
	fn drop(&mut self) {
		self.shutdown.cancel();
		self.accept_task.abort();
	}
}

async fn start_server(ping_interval: Duration, max_frame_bytes: usize) -> anyhow::Result<TestServer> {
	init_test_logging();

	let listener = TcpListener::bind("127.0.0.1:0").await.context("bind test listener")?;
	let addr = listener.local_addr()?;

	let router = SignalRouter::new(RouterConfig::default());
	let liveness = LivenessMonitor::new();
	let shutdown = CancellationToken::new();
	let _monitor = spawn_liveness_monitor(liveness.clone(), ping_interval, shutdown.clone());

	let settings = ConnectionSettings { max_frame_bytes };
	let accept_router = router.clone();
	let accept_task = tokio::spawn(async move {
		let _ = serve(listener, accept_router, liveness, settings).await;
	});

	Ok(TestServer {
		addr,
		router,
		shutdown,
		accept_task,
	})
}

async fn default_server() -> anyhow::Result<TestServer> {
	start_server(Duration::from_secs(30), parley_protocol::DEFAULT_MAX_FRAME_SIZE).await
}

async fn connect(server: &TestServer) -> anyhow::Result<Ws> {
	let (ws, _resp) = tokio_tungstenite::connect_async(format!("ws://{}", server.addr))
		.await
		.context("connect to test server")?;
	Ok(ws)
}

async fn send_json(ws: &mut Ws, value: Value) -> anyhow::Result<()> {
	ws.send(Message::Text(value.to_string().into())).await?;
	Ok(())
}

/// Next text frame, skipping control frames.
async fn recv_text(ws: &mut Ws) -> anyhow::Result<String> {
	loop {
		let msg = timeout(RECV_TIMEOUT, ws.next())
			.await
			.map_err(|_| anyhow!("timed out waiting for a frame"))?
			.ok_or_else(|| anyhow!("connection closed"))??;

		match msg {
			Message::Text(text) => return Ok(text.to_string()),
			Message::Close(frame) => return Err(anyhow!("connection closed: {frame:?}")),
			_ => continue,
		}
	}
}

async fn recv_json(ws: &mut Ws) -> anyhow::Result<Value> {
	let text = recv_text(ws).await?;
	serde_json::from_str(&text).with_context(|| format!("server sent invalid JSON: {text}"))
}

/// Assert nothing arrives for a short while.
async fn expect_silence(ws: &mut Ws) {
	if let Ok(Some(Ok(Message::Text(text)))) = timeout(Duration::from_millis(150), ws.next()).await {
		panic!("unexpected frame: {}", text.as_str());
	}
}

async fn join(ws: &mut Ws, room: &str, id: &str, name: &str) -> anyhow::Result<()> {
	send_json(ws, json!({"type": "join", "room": room, "clientId": id, "name": name})).await
}

async fn wait_for_stats(router: &SignalRouter, want: RouterStats) -> anyhow::Result<()> {
	let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
	loop {
		let got = router.stats().await;
		if got == want {
			return Ok(());
		}
		if tokio::time::Instant::now() >= deadline {
			return Err(anyhow!("stats never reached {want:?}; last {got:?}"));
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

#[tokio::test]
async fn join_signal_and_disconnect_round() -> anyhow::Result<()> {
	let server = default_server().await?;
	let mut a = connect(&server).await?;
	let mut b = connect(&server).await?;

	join(&mut a, "r1", "a1", "Alice").await?;
	assert_eq!(recv_json(&mut a).await?, json!({"type": "existing-peers", "peers": []}));
	assert_eq!(recv_json(&mut a).await?["type"], "user-list");

	join(&mut b, "r1", "b1", "Bob").await?;
	assert_eq!(recv_json(&mut b).await?, json!({"type": "existing-peers", "peers": ["a1"]}));
	let users = json!([{"id": "a1", "name": "Alice"}, {"id": "b1", "name": "Bob"}]);
	assert_eq!(recv_json(&mut b).await?["users"], users);

	assert_eq!(recv_json(&mut a).await?, json!({"type": "new-peer", "id": "b1"}));
	assert_eq!(recv_json(&mut a).await?["users"], users);
	assert_eq!(
		recv_json(&mut a).await?,
		json!({"type": "notify", "message": "Bob joined the room"})
	);

	// Payload text is forwarded as written, spacing included.
	let payload = r#"{"sdp": "v=0\r\n", "candidates": [1, 2]}"#;
	b.send(Message::Text(
		format!(r#"{{"type":"signal","room":"r1","clientId":"b1","target":"a1","payload":{payload}}}"#).into(),
	))
	.await?;
	assert_eq!(
		recv_text(&mut a).await?,
		format!(r#"{{"type":"signal","from":"b1","payload":{payload}}}"#)
	);
	expect_silence(&mut b).await;

	a.close(None).await?;
	drop(a);

	assert_eq!(recv_json(&mut b).await?, json!({"type": "peer-left", "id": "a1"}));
	assert_eq!(
		recv_json(&mut b).await?,
		json!({"type": "user-list", "users": [{"id": "b1", "name": "Bob"}]})
	);
	assert_eq!(
		recv_json(&mut b).await?,
		json!({"type": "notify", "message": "Alice left the room"})
	);
	assert!(server.router.members(&RoomName::new("r1")?).await.is_some());

	send_json(&mut b, json!({"type": "leave", "room": "r1", "clientId": "b1"})).await?;
	wait_for_stats(&server.router, RouterStats { rooms: 0, sessions: 0 }).await?;

	Ok(())
}

#[tokio::test]
async fn client_close_is_answered_with_close_frame() -> anyhow::Result<()> {
	let server = default_server().await?;
	let mut a = connect(&server).await?;

	join(&mut a, "r1", "a1", "Alice").await?;
	recv_json(&mut a).await?;
	recv_json(&mut a).await?;

	a.close(None).await?;

	let mut close_reply = None;
	loop {
		let next = timeout(RECV_TIMEOUT, a.next())
			.await
			.map_err(|_| anyhow!("timed out waiting for the close reply"))?;
		match next {
			Some(Ok(Message::Close(frame))) => close_reply = Some(frame),
			Some(Ok(_)) => continue,
			Some(Err(e)) => return Err(anyhow!("closing handshake failed: {e:?}")),
			None => break,
		}
	}
	assert!(close_reply.is_some(), "server never echoed the close frame");

	wait_for_stats(&server.router, RouterStats::default()).await?;

	Ok(())
}

#[tokio::test]
async fn garbage_frames_leave_connection_open() -> anyhow::Result<()> {
	let server = default_server().await?;
	let mut a = connect(&server).await?;

	a.send(Message::Text("definitely not json".into())).await?;
	send_json(&mut a, json!({"type": "teleport", "room": "r1"})).await?;
	send_json(&mut a, json!({"type": "join", "room": "r1"})).await?;
	a.send(Message::Binary(vec![1u8, 2, 3].into())).await?;
	expect_silence(&mut a).await;

	join(&mut a, "r1", "a1", "Alice").await?;
	assert_eq!(recv_json(&mut a).await?["type"], "existing-peers");

	Ok(())
}

#[tokio::test]
async fn signal_to_missing_target_is_silent() -> anyhow::Result<()> {
	let server = default_server().await?;
	let mut a = connect(&server).await?;

	join(&mut a, "r1", "a1", "Alice").await?;
	recv_json(&mut a).await?;
	recv_json(&mut a).await?;

	send_json(
		&mut a,
		json!({"type": "signal", "room": "r1", "clientId": "a1", "target": "nobody", "payload": {}}),
	)
	.await?;
	expect_silence(&mut a).await;

	Ok(())
}

#[tokio::test]
async fn silent_peer_is_terminated_by_liveness() -> anyhow::Result<()> {
	let server = start_server(Duration::from_millis(200), parley_protocol::DEFAULT_MAX_FRAME_SIZE).await?;

	// Never polled after joining, so it never answers a ping.
	let mut silent = connect(&server).await?;
	join(&mut silent, "r1", "s1", "Silent").await?;

	let mut b = connect(&server).await?;
	join(&mut b, "r1", "b1", "Bob").await?;
	assert_eq!(recv_json(&mut b).await?["peers"], json!(["s1"]));
	assert_eq!(recv_json(&mut b).await?["type"], "user-list");

	assert_eq!(recv_json(&mut b).await?, json!({"type": "peer-left", "id": "s1"}));
	assert_eq!(recv_json(&mut b).await?["users"], json!([{"id": "b1", "name": "Bob"}]));
	assert_eq!(recv_json(&mut b).await?["message"], "Silent left the room");

	// b kept answering pings and is still there.
	wait_for_stats(&server.router, RouterStats { rooms: 1, sessions: 1 }).await?;
	drop(silent);

	Ok(())
}

#[tokio::test]
async fn oversized_frame_closes_connection() -> anyhow::Result<()> {
	let server = start_server(Duration::from_secs(30), 1024).await?;
	let mut a = connect(&server).await?;

	join(&mut a, "r1", "a1", "Alice").await?;
	recv_json(&mut a).await?;
	recv_json(&mut a).await?;

	let big = json!({"type": "join", "room": "r1", "clientId": "a1", "name": "x".repeat(4096)});
	let _ = send_json(&mut a, big).await;

	assert!(recv_text(&mut a).await.is_err(), "server should drop the connection");
	wait_for_stats(&server.router, RouterStats::default()).await?;

	Ok(())
}
