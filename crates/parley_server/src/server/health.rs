#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

use crate::server::liveness::LivenessMonitor;
use crate::server::router::SignalRouter;

#[derive(Clone)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	router: SignalRouter,
	liveness: LivenessMonitor,
}

impl HealthState {
	pub fn new(router: SignalRouter, liveness: LivenessMonitor) -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			router,
			liveness,
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	Ok(route(req.method(), req.uri().path(), &state).await)
}

/// Answer one health request.
pub async fn route(method: &Method, path: &str, state: &HealthState) -> Response<Full<Bytes>> {
	if method != Method::GET {
		return respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new(), None);
	}

	match path {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok"), None),
		"/readyz" => {
			if state.is_ready() {
				respond(StatusCode::OK, Bytes::from_static(b"ready"), None)
			} else {
				respond(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready"), None)
			}
		}
		"/stats" => {
			let stats = state.router.stats().await;
			let body = serde_json::json!({
				"rooms": stats.rooms,
				"sessions": stats.sessions,
				"connections": state.liveness.len(),
			});
			respond(StatusCode::OK, Bytes::from(body.to_string()), Some("application/json"))
		}
		_ => respond(StatusCode::NOT_FOUND, Bytes::new(), None),
	}
}

fn respond(status: StatusCode, body: Bytes, content_type: Option<&'static str>) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body));
	*resp.status_mut() = status;
	if let Some(ct) = content_type {
		resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(ct));
	}
	resp
}
