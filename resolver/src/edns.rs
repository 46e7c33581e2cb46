//! Per-peer memory of EDNS/EDNS-PING capability, ported from PowerDNS's
//! `EDNSStatus`/`ednsstatus_t`.

use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdnsMode {
	ConfirmedPinger,
	Unknown,
	EdnsNoPing,
	EdnsPingOk,
	EdnsIgnorant,
	NoEdns,
}

pub struct EdnsStatus {
	pub mode: EdnsMode,
	pub mode_set_at: u32,
	pub ping_hit_count: u32,
}

impl Default for EdnsStatus {
	fn default() -> Self {
		Self { mode: EdnsMode::Unknown, mode_set_at: 0, ping_hit_count: 0 }
	}
}

/// How long a degraded mode is trusted before re-probing: never upgrade
/// without re-probing after `mode_set_at + this interval`.
pub const REPROBE_INTERVAL: u32 = 7200;

#[derive(Default)]
pub struct EdnsStatusTable {
	table: HashMap<IpAddr, EdnsStatus>,
}

impl EdnsStatusTable {
	pub fn new() -> Self {
		Self { table: HashMap::new() }
	}

	pub fn mode(&self, peer: IpAddr) -> EdnsMode {
		self.table.get(&peer).map(|s| s.mode).unwrap_or(EdnsMode::Unknown)
	}

	/// Whether a fresh peer (mode `Unknown`) or one whose degraded mode has
	/// aged past the reprobe interval should be sent an EDNS PING probe.
	pub fn should_probe(&self, peer: IpAddr, now: u32) -> bool {
		match self.table.get(&peer) {
			None => true,
			Some(s) => match s.mode {
				EdnsMode::Unknown => true,
				EdnsMode::EdnsPingOk | EdnsMode::ConfirmedPinger => false,
				_ => now >= s.mode_set_at + REPROBE_INTERVAL,
			},
		}
	}

	/// A valid EDNS PING cookie was echoed back: promote toward confirmed.
	pub fn ping_ok(&mut self, peer: IpAddr, now: u32) {
		let entry = self.table.entry(peer).or_default();
		entry.ping_hit_count += 1;
		entry.mode = if entry.ping_hit_count > 1 { EdnsMode::ConfirmedPinger } else { EdnsMode::EdnsPingOk };
		entry.mode_set_at = now;
	}

	/// The peer truncated/malformed an EDNS query: demote.
	pub fn demote(&mut self, peer: IpAddr, now: u32) {
		let entry = self.table.entry(peer).or_default();
		entry.mode = match entry.mode {
			EdnsMode::Unknown | EdnsMode::EdnsPingOk | EdnsMode::ConfirmedPinger => EdnsMode::EdnsNoPing,
			EdnsMode::EdnsNoPing => EdnsMode::NoEdns,
			other => other,
		};
		entry.mode_set_at = now;
	}

	/// The peer plainly doesn't speak EDNS at all.
	pub fn ignorant(&mut self, peer: IpAddr, now: u32) {
		let entry = self.table.entry(peer).or_default();
		entry.mode = EdnsMode::EdnsIgnorant;
		entry.mode_set_at = now;
	}

	pub fn size(&self) -> usize {
		self.table.len()
	}
}
