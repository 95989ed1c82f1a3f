#![forbid(unsafe_code)]
//! WebSocket signaling relay: peers join named rooms, discover each other and
//! exchange opaque negotiation payloads through the server.

pub mod config;
pub mod server;
