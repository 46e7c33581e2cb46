//! The auth/forward domain map, consulted first by the engine to
//! short-circuit resolution for locally authoritative or forwarded zones.
//! Grounded on PowerDNS's `AuthDomain` struct and `domainmap_t`.
//!
//! The map is replaced wholesale and atomically: `reload_auth_and_forwards`
//! swaps a pointer; in-flight readers keep their old snapshot. `Arc` gives
//! that for free — a reader clones the `Arc` once per resolution and the old
//! map stays alive until the last clone drops.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use crate::model::{Name, ResourceRecord};
use crate::name::{longest_suffix_match, more_specific_than};

pub struct AuthDomain {
	pub name: Name,
	/// Non-empty iff this zone is forwarded rather than locally authoritative.
	pub forward_servers: Vec<IpAddr>,
	pub rd_forward: bool,
	/// Ordered-non-unique by (qname, qtype).
	pub records: Vec<ResourceRecord>,
}

impl AuthDomain {
	pub fn is_forward(&self) -> bool {
		!self.forward_servers.is_empty()
	}

	pub fn lookup(&self, qname: &Name, qtype: u16) -> Vec<ResourceRecord> {
		self.records.iter().filter(|rr| rr.ty == qtype && rr.name.eq_ignore_case(qname)).cloned().collect()
	}
}

#[derive(Default)]
pub struct DomainMap {
	zones: Vec<AuthDomain>,
}

impl DomainMap {
	pub fn new() -> Self {
		Self { zones: Vec::new() }
	}

	pub fn insert(&mut self, domain: AuthDomain) {
		self.zones.push(domain);
	}

	/// The longest ancestor zone of `qname` present in the map, if any.
	pub fn lookup(&self, qname: &Name) -> Option<&AuthDomain> {
		let names: Vec<&Name> = self.zones.iter().map(|z| &z.name).collect();
		let best = longest_suffix_match(qname, names.into_iter())?;
		self.zones.iter().find(|z| z.name.fold() == best.fold())
	}

	pub fn contains_ancestor_of(&self, qname: &Name) -> bool {
		self.zones.iter().any(|z| more_specific_than(qname, &z.name))
	}

	pub fn len(&self) -> usize {
		self.zones.len()
	}

	pub fn is_empty(&self) -> bool {
		self.zones.is_empty()
	}
}

/// An atomically-swappable handle to the current domain map: reloads swap
/// the pointer inside each worker via broadcast.
#[derive(Clone)]
pub struct DomainMapHandle(Arc<RwLock<Arc<DomainMap>>>);

impl DomainMapHandle {
	pub fn new(map: DomainMap) -> Self {
		Self(Arc::new(RwLock::new(Arc::new(map))))
	}

	/// A stable snapshot for the duration of one resolution.
	pub fn snapshot(&self) -> Arc<DomainMap> {
		self.0.read().expect("domain map lock poisoned").clone()
	}

	/// Publishes a freshly built map, replacing the snapshot future readers
	/// observe; in-flight readers keep finishing with the map they already
	/// snapshotted.
	pub fn reload(&self, map: DomainMap) {
		*self.0.write().expect("domain map lock poisoned") = Arc::new(map);
	}
}

impl Default for DomainMapHandle {
	fn default() -> Self {
		Self::new(DomainMap::new())
	}
}
