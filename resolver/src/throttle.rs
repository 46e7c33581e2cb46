//! Short-term suppression of misbehaving endpoints, ported from PowerDNS's
//! `Throttle<Thing>` template. Generic over the key type so the engine can
//! throttle on `(peer, qname, qtype)`.

use std::collections::HashMap;
use std::hash::Hash;

const DEFAULT_LIMIT: i32 = 3;
const DEFAULT_TTL: u32 = 60;
const SWEEP_INTERVAL: u32 = 300;

struct Entry {
	ttd: u32,
	tries: i32,
}

pub struct Throttle<T> {
	entries: HashMap<T, Entry>,
	last_clean: u32,
}

impl<T: Eq + Hash> Throttle<T> {
	pub fn new(now: u32) -> Self {
		Self { entries: HashMap::new(), last_clean: now }
	}

	/// Lazily sweeps expired entries, then reports whether `key` is still
	/// blocked, consuming one try in the process: returns true at most
	/// `tries+1` times and never after `now > ttd`.
	pub fn should_throttle(&mut self, now: u32, key: &T) -> bool
	where
		T: Clone,
	{
		if now > self.last_clean + SWEEP_INTERVAL {
			self.last_clean = now;
			self.entries.retain(|_, e| e.ttd >= now);
		}

		let blocked = match self.entries.get_mut(key) {
			Some(e) if now > e.ttd || e.tries < 0 => false,
			Some(e) => {
				e.tries -= 1;
				true
			}
			None => return false,
		};

		if !blocked {
			self.entries.remove(key);
		}

		blocked
	}

	/// Inserts or tightens an existing entry, keeping whichever of (new,
	/// existing) is stricter.
	pub fn throttle(&mut self, now: u32, key: T, ttl: Option<u32>, tries: Option<i32>)
	where
		T: Clone,
	{
		let ttd = now + ttl.unwrap_or(DEFAULT_TTL);
		let tries = tries.unwrap_or(DEFAULT_LIMIT);

		self.entries
			.entry(key)
			.and_modify(|e| {
				if ttd > e.ttd || tries < e.tries {
					e.ttd = ttd;
					e.tries = tries;
				}
			})
			.or_insert(Entry { ttd, tries });
	}

	pub fn size(&self) -> usize {
		self.entries.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn throttle_bound_respects_tries_and_ttl() {
		let mut t: Throttle<&str> = Throttle::new(0);
		t.throttle(0, "a", Some(10), Some(1));

		assert!(t.should_throttle(1, &"a"));
		assert!(t.should_throttle(2, &"a"));
		// tries exhausted (started at 1, decremented on each use above)
		assert!(!t.should_throttle(3, &"a"));
	}

	#[test]
	fn throttle_expires_past_ttd() {
		let mut t: Throttle<&str> = Throttle::new(0);
		t.throttle(0, "a", Some(5), Some(3));

		assert!(!t.should_throttle(10, &"a"));
	}

	#[test]
	fn tighten_keeps_stricter_bound() {
		let mut t: Throttle<&str> = Throttle::new(0);
		t.throttle(0, "a", Some(100), Some(5));
		t.throttle(0, "a", Some(10), Some(1));

		assert!(t.should_throttle(50, &"a"));
		assert!(!t.should_throttle(51, &"a"));
	}
}
