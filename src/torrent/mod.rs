//! A single torrent's state: its immutable descriptor, the controller that
//! owns the have/want/pending sets and storage handle, the coordinator that
//! drives peer sessions, and the acceptor that brings in inbound
//! connections.

pub mod acceptor;
pub mod controller;
pub mod descriptor;
pub mod swarm;
