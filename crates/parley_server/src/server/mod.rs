#![forbid(unsafe_code)]

pub mod connection;
pub mod health;
pub mod listener;
pub mod liveness;
pub mod presence;
pub mod room_directory;
pub mod router;
pub mod session;


#[cfg(test)]
mod room_directory_tests;
