#![forbid(unsafe_code)]

pub mod endpoint {
	use std::fmt;

	/// Why a `--bind` value was rejected.
	#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
	pub enum EndpointError {
		#[error("endpoint must be non-empty (expected ws://host:port)")]
		Empty,
		#[error("unsupported scheme in {0} (expected ws://host:port)")]
		Scheme(String),
		#[error("relay endpoints take no path, query or fragment: {0}")]
		Path(String),
		#[error("missing :port in {0}")]
		MissingPort(String),
		#[error("missing host in {0}")]
		MissingHost(String),
		#[error("IPv6 hosts must be bracketed like ws://[::1]:3000: {0}")]
		UnbracketedIpv6(String),
		#[error("invalid port in {0} (expected 1..=65535)")]
		Port(String),
	}

	/// Listen endpoint given as `ws://host:port`.
	///
	/// `host` is kept without IPv6 brackets so it lines up with the
	/// `host` config key; [`bind_addr`] adds them back.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub host: String,
		pub port: u16,
	}

	impl WsEndpoint {
		pub fn parse(s: &str) -> Result<Self, EndpointError> {
			let s = s.trim();
			if s.is_empty() {
				return Err(EndpointError::Empty);
			}

			let rest = s.strip_prefix("ws://").ok_or_else(|| EndpointError::Scheme(s.to_string()))?;
			// A bare trailing slash is what most people type after a host.
			let rest = rest.strip_suffix('/').unwrap_or(rest);
			if rest.contains(['/', '?', '#']) {
				return Err(EndpointError::Path(s.to_string()));
			}

			let (host, port) = rest
				.rsplit_once(':')
				.ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;

			let host = match host.strip_prefix('[') {
				Some(inner) => inner
					.strip_suffix(']')
					.ok_or_else(|| EndpointError::UnbracketedIpv6(s.to_string()))?,
				None if host.contains(':') => return Err(EndpointError::UnbracketedIpv6(s.to_string())),
				None => host,
			};
			if host.trim().is_empty() {
				return Err(EndpointError::MissingHost(s.to_string()));
			}

			let port = match port.trim().parse::<u16>() {
				Ok(0) | Err(_) => return Err(EndpointError::Port(s.to_string())),
				Ok(port) => port,
			};

			Ok(Self {
				host: host.to_string(),
				port,
			})
		}

		/// Address string to hand to `TcpListener::bind`.
		pub fn bind_addr(&self) -> String {
			bind_addr(&self.host, self.port)
		}
	}

	impl fmt::Display for WsEndpoint {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			write!(f, "ws://{}", self.bind_addr())
		}
	}

	/// Join a host and port, bracketing bare IPv6 literals.
	pub fn bind_addr(host: &str, port: u16) -> String {
		if host.contains(':') && !host.starts_with('[') {
			format!("[{host}]:{port}")
		} else {
			format!("{host}:{port}")
		}
	}

}
