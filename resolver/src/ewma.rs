//! Per-nameserver latency estimator, ported from PowerDNS's
//! `DecayingEwma`/`DecayingEwmaCollection`. The decay-on-read design is
//! preserved deliberately: decay is applied lazily at read time rather than
//! on a timer, matching the original's behavior.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::clock::Clock;

/// An exponentially weighted moving average that decays over time, with the
/// decay applied lazily on read rather than by a background sweeper.
pub struct DecayingEwma {
	value: f64,
	last_submit: f64,
	last_get: f64,
	needs_init: bool,
}

impl DecayingEwma {
	pub fn new() -> Self {
		Self { value: 0.0, last_submit: 0.0, last_get: 0.0, needs_init: true }
	}

	/// Blends `usecs` into the running value. `now` is monotonic seconds.
	///
	/// `factor = exp(Δt)/2` where `Δt = last_submit - now` is non-positive:
	/// right after a previous submit (`Δt≈0`) this halves the weight of the
	/// old value; after a long silence (`Δt` very negative) `factor→0` and
	/// the new sample dominates outright.
	pub fn submit(&mut self, usecs: f64, now: f64) {
		if self.needs_init {
			self.last_submit = now;
			self.needs_init = false;
		}

		let diff = self.last_submit - now;
		self.last_submit = now;

		let factor = (diff.exp()) / 2.0;
		self.value = (1.0 - factor) * usecs + factor * self.value;
	}

	/// Returns the decayed value, and mutates decay state as a side effect.
	/// `factor = exp(Δt/60)` against `last_get`, a gentler one-minute time
	/// constant so idle peers drift toward zero and get reselected.
	pub fn get(&mut self, now: f64) -> f64 {
		let diff = self.last_get - now;
		self.last_get = now;

		let factor = (diff / 60.0).exp();
		self.value *= factor;
		self.value
	}

	pub fn stale(&self, limit: f64) -> bool {
		self.last_get < limit
	}
}

impl Default for DecayingEwma {
	fn default() -> Self {
		Self::new()
	}
}

/// An ordered collection of (peer-address, DecayingEwma) pairs for one
/// nameserver name, with a "best peer" side-channel.
#[derive(Default)]
pub struct DecayingEwmaCollection {
	peers: Vec<(IpAddr, DecayingEwma)>,
	best: Option<IpAddr>,
}

impl DecayingEwmaCollection {
	pub fn new() -> Self {
		Self { peers: Vec::new(), best: None }
	}

	pub fn submit(&mut self, peer: IpAddr, usecs: f64, now: f64) {
		match self.peers.iter_mut().find(|(p, _)| *p == peer) {
			Some((_, ewma)) => ewma.submit(usecs, now),
			None => {
				let mut ewma = DecayingEwma::new();
				ewma.submit(usecs, now);
				self.peers.push((peer, ewma));
			}
		}
	}

	/// Decays every entry against `now` and returns the minimum, remembering
	/// which peer currently wins. Ties keep the earlier (insertion-order)
	/// entry, since `<` (not `<=`) only replaces on strict improvement.
	pub fn get(&mut self, now: f64) -> Option<f64> {
		let mut best_value = None;
		let mut best_peer = None;

		for (peer, ewma) in self.peers.iter_mut() {
			let value = ewma.get(now);

			let improves = match best_value {
				Some(b) => value < b,
				None => true,
			};

			if improves {
				best_value = Some(value);
				best_peer = Some(*peer);
			}
		}

		self.best = best_peer;
		best_value
	}

	pub fn best_peer(&self) -> Option<IpAddr> {
		self.best
	}

	pub fn stale(&self, limit: f64) -> bool {
		self.peers.iter().all(|(_, e)| e.stale(limit))
	}

	pub fn speed_of(&mut self, peer: IpAddr, now: f64) -> f64 {
		match self.peers.iter_mut().find(|(p, _)| *p == peer) {
			Some((_, ewma)) => ewma.get(now),
			None => 0.0,
		}
	}
}

/// Maps a nameserver name (case-insensitive) to its speed collection.
#[derive(Default)]
pub struct NsSpeedTable {
	table: HashMap<String, DecayingEwmaCollection>,
}

impl NsSpeedTable {
	pub fn new() -> Self {
		Self { table: HashMap::new() }
	}

	pub fn submit(&mut self, nsname: &str, peer: IpAddr, usecs: f64, now: f64) {
		self.table.entry(nsname.to_ascii_lowercase()).or_default().submit(peer, usecs, now);
	}

	pub fn speed_of(&mut self, nsname: &str, peer: IpAddr, now: f64) -> f64 {
		self.table.entry(nsname.to_ascii_lowercase()).or_default().speed_of(peer, now)
	}

	/// Drops nameserver entries whose every peer has gone untouched since
	/// `limit`, bounding memory growth.
	pub fn prune(&mut self, limit: f64) {
		self.table.retain(|_, coll| !coll.stale(limit));
	}

	pub fn size(&self) -> usize {
		self.table.len()
	}
}
