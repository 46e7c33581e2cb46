//! The positive record cache. Treated as an external collaborator — the
//! engine only depends on the [`PositiveCache`] trait, and a default
//! in-memory implementation is provided for tests and as the out-of-the-box
//! worker cache.

use std::collections::HashMap;

use crate::model::{Name, ResourceRecord};

pub trait PositiveCache {
	/// Live records for (qname, qtype), TTLs already trimmed to their
	/// remaining lifetime as of `now`. Empty if nothing cached or everything
	/// expired.
	fn get(&mut self, qname: &Name, qtype: u16, now: u32) -> Vec<ResourceRecord>;

	/// Replaces the cached set for (qname, qtype). Authoritative answers
	/// replace non-authoritative ones; TTLs are clamped to `max_ttl`.
	fn replace(&mut self, qname: &Name, qtype: u16, records: Vec<ResourceRecord>, now: u32, max_ttl: u32);

	fn size(&self) -> usize;
	fn hits(&self) -> u64;
	fn misses(&self) -> u64;
}

struct Slot {
	records: Vec<ResourceRecord>,
	/// Absolute expiry of the slot as a whole (the minimum ttd among its
	/// records at insertion time).
	ttd: u32,
	authoritative: bool,
}

#[derive(Default)]
pub struct MemCache {
	table: HashMap<(String, u16), Slot>,
	hits: u64,
	misses: u64,
}

impl MemCache {
	pub fn new() -> Self {
		Self { table: HashMap::new(), hits: 0, misses: 0 }
	}
}

impl PositiveCache for MemCache {
	fn get(&mut self, qname: &Name, qtype: u16, now: u32) -> Vec<ResourceRecord> {
		let key = (qname.fold(), qtype);

		let live = match self.table.get(&key) {
			Some(slot) if slot.ttd > now => Some(slot),
			_ => None,
		};

		match live {
			Some(slot) => {
				self.hits += 1;
				slot.records
					.iter()
					.cloned()
					.map(|mut rr| {
						rr.ttl = slot.ttd.saturating_sub(now);
						rr
					})
					.collect()
			}
			None => {
				self.misses += 1;
				Vec::new()
			}
		}
	}

	fn replace(&mut self, qname: &Name, qtype: u16, records: Vec<ResourceRecord>, now: u32, max_ttl: u32) {
		let key = (qname.fold(), qtype);

		let authoritative = records.iter().any(|rr| rr.authoritative);

		if let Some(existing) = self.table.get(&key) {
			if existing.authoritative && !authoritative {
				// an authoritative entry is never downgraded by a
				// non-authoritative (glue) replacement
				return;
			}
		}

		let ttd = records.iter().map(|rr| now + rr.ttl.min(max_ttl)).min().unwrap_or(now);

		self.table.insert(key, Slot { records, ttd, authoritative });
	}

	fn size(&self) -> usize {
		self.table.len()
	}

	fn hits(&self) -> u64 {
		self.hits
	}

	fn misses(&self) -> u64 {
		self.misses
	}
}
