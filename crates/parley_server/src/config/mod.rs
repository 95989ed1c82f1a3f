#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use parley_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::liveness::DEFAULT_PING_INTERVAL;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

/// Default config path: `~/.parley/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".parley").join("config.toml"))
}

/// Load the server config from TOML and process env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	pub host: String,
	pub port: u16,
	/// Liveness probe period.
	pub ping_interval: Duration,
	/// Largest accepted inbound WebSocket message.
	pub max_frame_bytes: usize,
	/// Close the old connection when its client id rejoins from elsewhere.
	pub evict_superseded_sessions: bool,
	/// Log every dispatched frame at debug level.
	pub debug_logs: bool,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			ping_interval: DEFAULT_PING_INTERVAL,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			evict_superseded_sessions: false,
			debug_logs: false,
			metrics_bind: None,
			health_bind: None,
		}
	}
}

impl ServerSettings {
	/// `host:port` for the WebSocket listener.
	pub fn bind_addr(&self) -> String {
		parley_util::endpoint::bind_addr(&self.host, self.port)
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	host: Option<String>,
	port: Option<u16>,
	ping_interval_secs: Option<u64>,
	max_frame_bytes: Option<usize>,
	evict_superseded_sessions: Option<bool>,
	debug_logs: Option<bool>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();
		let f = file.server;

		let ping_interval = match f.ping_interval_secs {
			Some(0) => {
				warn!("server config: ping_interval_secs = 0 is invalid; using default");
				defaults.ping_interval
			}
			Some(secs) => Duration::from_secs(secs),
			None => defaults.ping_interval,
		};

		let max_frame_bytes = match f.max_frame_bytes {
			Some(0) => {
				warn!("server config: max_frame_bytes = 0 is invalid; using default");
				defaults.max_frame_bytes
			}
			Some(n) => n,
			None => defaults.max_frame_bytes,
		};

		Self {
			server: ServerSettings {
				host: f.host.filter(|s| !s.trim().is_empty()).unwrap_or(defaults.host),
				port: f.port.unwrap_or(defaults.port),
				ping_interval,
				max_frame_bytes,
				evict_superseded_sessions: f.evict_superseded_sessions.unwrap_or(false),
				debug_logs: f.debug_logs.unwrap_or(false),
				metrics_bind: f.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: f.health_bind.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn non_blank(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
	env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Apply env overrides using `env` as the variable lookup.
fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	if let Some(v) = non_blank(&env, "PORT") {
		match v.parse::<u16>() {
			Ok(port) => {
				cfg.server.port = port;
				info!(port, "server config: port overridden by env");
			}
			Err(e) => warn!(error = %e, value = %v, "server config: ignoring invalid PORT"),
		}
	}

	if let Some(v) = non_blank(&env, "PARLEY_HOST") {
		cfg.server.host = v;
		info!("server config: host overridden by env");
	}

	if let Some(v) = non_blank(&env, "PARLEY_PING_INTERVAL_SECS") {
		match v.parse::<u64>() {
			Ok(secs) if secs > 0 => {
				cfg.server.ping_interval = Duration::from_secs(secs);
				info!(secs, "server config: ping_interval overridden by env");
			}
			_ => warn!(value = %v, "server config: ignoring invalid PARLEY_PING_INTERVAL_SECS"),
		}
	}

	if let Some(v) = non_blank(&env, "PARLEY_MAX_FRAME_BYTES") {
		match v.parse::<usize>() {
			Ok(n) if n > 0 => {
				cfg.server.max_frame_bytes = n;
				info!(bytes = n, "server config: max_frame_bytes overridden by env");
			}
			_ => warn!(value = %v, "server config: ignoring invalid PARLEY_MAX_FRAME_BYTES"),
		}
	}

	if let Some(v) = non_blank(&env, "PARLEY_EVICT_SUPERSEDED") {
		match parse_env_bool(&v) {
			Some(evict) => {
				cfg.server.evict_superseded_sessions = evict;
				info!(evict, "server config: evict_superseded_sessions overridden by env");
			}
			None => warn!(value = %v, "server config: ignoring invalid PARLEY_EVICT_SUPERSEDED"),
		}
	}

	if let Some(v) = non_blank(&env, "PARLEY_DEBUG_LOGS") {
		match parse_env_bool(&v) {
			Some(on) => {
				cfg.server.debug_logs = on;
				info!(on, "server config: debug_logs overridden by env");
			}
			None => warn!(value = %v, "server config: ignoring invalid PARLEY_DEBUG_LOGS"),
		}
	}

	if let Some(v) = non_blank(&env, "PARLEY_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_blank(&env, "PARLEY_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}
}
