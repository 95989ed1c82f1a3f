#![forbid(unsafe_code)]

use parley_domain::{ClientId, RoomName};

use crate::server::room_directory::{Membership, RoomDirectory};
use crate::server::session::{ConnId, ConnectionHandle, Session};

fn room(name: &str) -> RoomName {
	RoomName::new(name).expect("valid RoomName")
}

fn id(s: &str) -> ClientId {
	ClientId::new(s).expect("valid ClientId")
}

fn session(conn_id: ConnId, client_id: &str, name: &str) -> Session {
	let (handle, _rx) = ConnectionHandle::new(conn_id);
	Session::new(id(client_id), name, handle)
}

fn member_ids(dir: &RoomDirectory, name: &str) -> Vec<String> {
	dir.get(&room(name))
		.map(|r| r.sessions().map(|s| s.client_id.to_string()).collect())
		.unwrap_or_default()
}

#[test]
fn add_keeps_join_order_and_indexes_connection() {
	let mut dir = RoomDirectory::new();
	assert!(dir.add(&room("r1"), session(1, "a1", "Alice")).is_none());
	assert!(dir.add(&room("r1"), session(2, "b1", "Bob")).is_none());
	assert!(dir.add(&room("r1"), session(3, "c1", "Cleo")).is_none());

	assert_eq!(member_ids(&dir, "r1"), ["a1", "b1", "c1"]);
	assert_eq!(dir.peers(&room("r1"), &id("b1")), vec![id("a1"), id("c1")]);
	assert_eq!(
		dir.find_by_channel(2),
		Some(Membership {
			room: room("r1"),
			client_id: id("b1"),
		})
	);
	assert!(dir.owns(2, &room("r1"), &id("b1")));
	assert!(!dir.owns(2, &room("r1"), &id("a1")));
	assert_eq!(dir.session_count(), 3);
}

#[test]
fn overwrite_keeps_size_and_position() {
	let mut dir = RoomDirectory::new();
	dir.add(&room("r1"), session(1, "a1", "Alice"));
	dir.add(&room("r1"), session(2, "b1", "Bob"));

	let replaced = dir.add(&room("r1"), session(9, "a1", "Alice again")).expect("overwrote a1");
	assert_eq!(replaced.conn_id(), 1);

	assert_eq!(member_ids(&dir, "r1"), ["a1", "b1"]);
	let users = dir.get(&room("r1")).expect("room").users();
	assert_eq!(users[0].name, "Alice again");

	// The superseded connection no longer owns anything.
	assert_eq!(dir.find_by_channel(1), None);
	assert!(dir.remove_conn(1).is_none());
	assert_eq!(member_ids(&dir, "r1"), ["a1", "b1"]);
	assert!(dir.owns(9, &room("r1"), &id("a1")));
}

#[test]
fn removing_last_member_deletes_room() {
	let mut dir = RoomDirectory::new();
	dir.add(&room("r1"), session(1, "a1", "Alice"));
	dir.add(&room("r1"), session(2, "b1", "Bob"));

	assert!(dir.remove(&room("r1"), &id("a1")).is_some());
	assert!(dir.contains(&room("r1")));

	let (r, s) = dir.remove_conn(2).expect("conn 2 owned b1");
	assert_eq!(r, room("r1"));
	assert_eq!(s.client_id, id("b1"));

	assert!(!dir.contains(&room("r1")));
	assert_eq!(dir.room_count(), 0);
	assert!(dir.get(&room("r1")).is_none());
}

#[test]
fn removing_unknown_room_or_id_is_a_no_op() {
	let mut dir = RoomDirectory::new();
	assert!(dir.remove(&room("ghost"), &id("a1")).is_none());

	dir.add(&room("r1"), session(1, "a1", "Alice"));
	assert!(dir.remove(&room("r1"), &id("zz")).is_none());
	assert!(dir.remove(&room("r2"), &id("a1")).is_none());

	assert_eq!(member_ids(&dir, "r1"), ["a1"]);
	assert_eq!(dir.room_count(), 1);
	assert!(dir.peers(&room("ghost"), &id("a1")).is_empty());
}

#[test]
fn rooms_are_isolated() {
	let mut dir = RoomDirectory::new();
	dir.add(&room("r1"), session(1, "a1", "Alice"));
	dir.add(&room("r2"), session(2, "a1", "Alice elsewhere"));

	assert_eq!(dir.room_count(), 2);
	dir.remove(&room("r1"), &id("a1"));
	assert_eq!(member_ids(&dir, "r2"), ["a1"]);
	assert!(dir.owns(2, &room("r2"), &id("a1")));
}
