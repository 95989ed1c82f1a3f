#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use parley_server::config::{default_config_path, load_server_config_from_path};
use parley_server::server::connection::ConnectionSettings;
use parley_server::server::health::{HealthState, spawn_health_server};
use parley_server::server::listener::serve;
use parley_server::server::liveness::{LivenessMonitor, spawn_liveness_monitor};
use parley_server::server::router::{RouterConfig, SignalRouter};
use parley_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: parley_server [--bind ws://host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Listen endpoint (default: ws://0.0.0.0:3000, or PORT)\n\
\t          Format: ws://host:port\n\
\t--listen   Same as --bind\n\
\t--config   Config file (default: ~/.parley/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct CliArgs {
	bind: Option<WsEndpoint>,
	config: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
	let mut args = CliArgs::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let endpoint = WsEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				args.bind = Some(endpoint);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,parley_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("parley_server");
				global::set_tracer_provider(tracer_provider);

				base.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => default_config_path()?,
	};
	let mut server_cfg = load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	if let Some(bind) = args.bind {
		info!(%bind, "listen endpoint overridden by --bind");
		server_cfg.server.host = bind.host;
		server_cfg.server.port = bind.port;
	}
	let settings = server_cfg.server;

	init_metrics(settings.metrics_bind.as_deref());

	let router = SignalRouter::new(RouterConfig {
		evict_superseded_sessions: settings.evict_superseded_sessions,
		debug_logs: settings.debug_logs,
	});
	let liveness = LivenessMonitor::new();
	let shutdown = CancellationToken::new();
	let _monitor = spawn_liveness_monitor(liveness.clone(), settings.ping_interval, shutdown.clone());

	let health_state = HealthState::new(router.clone(), liveness.clone());
	if let Some(bind) = settings.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let bind_addr = settings.bind_addr();
	let listener = TcpListener::bind(&bind_addr)
		.await
		.with_context(|| format!("bind websocket listener on {bind_addr}"))?;
	info!(
		bind = %listener.local_addr().map(|a| a.to_string()).unwrap_or(bind_addr),
		ping_interval_secs = settings.ping_interval.as_secs(),
		max_frame_bytes = settings.max_frame_bytes,
		evict_superseded = settings.evict_superseded_sessions,
		"parley_server: accepting websocket connections"
	);

	health_state.mark_ready();

	let conn_settings = ConnectionSettings {
		max_frame_bytes: settings.max_frame_bytes,
	};

	tokio::select! {
		res = serve(listener, router, liveness, conn_settings) => res?,
		res = tokio::signal::ctrl_c() => {
			res.context("listen for ctrl-c")?;
			info!("shutdown requested");
		}
	}

	shutdown.cancel();
	Ok(())
}
