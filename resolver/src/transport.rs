//! The external-collaborator contracts for the wire codec and socket layer.
//! The engine depends only on these traits — concrete sockets and wire
//! encoding/decoding live in the `net` crate, wired up in this crate's
//! integration tests (`resolver/tests/`) so the library itself never
//! depends on `net`.

use std::net::IpAddr;

use crate::model::{LwResult, Question};

/// Options for building an outgoing query, including EDNS probing.
#[derive(Clone, Copy, Default)]
pub struct QueryOpts {
	pub rd: bool,
	pub edns: bool,
	pub edns_ping: Option<[u8; 8]>,
}

/// Builds an outgoing query and parses an incoming wire-format response.
pub trait WireCodec {
	fn build_query(&self, id: u16, question: &Question, opts: QueryOpts) -> Vec<u8>;
	fn parse_response(&self, bytes: &[u8]) -> Option<LwResult>;
}

/// Send and receive, collapsed into a polling interface the engine's I/O
/// step drives. TCP framing is left to
/// the concrete implementation; the core only ever sees `(peer, bytes)`
/// pairs either way.
pub trait Transport {
	fn send(&mut self, peer: IpAddr, port: u16, bytes: &[u8]);

	/// Drains whatever responses are currently available without blocking.
	fn poll_recv(&mut self) -> Vec<(IpAddr, Vec<u8>)>;
}
