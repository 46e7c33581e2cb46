//! The resolution engine, grounded on PowerDNS's `SyncRes`: the iterative
//! recursive lookup state machine. Cache probes, best-delegation selection, ordered
//! server attempts, referral following, CNAME chasing and negative caching
//! all live here, wired up against the trait contracts in
//! [`crate::transport`] rather than any concrete socket/codec.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

use log::{debug, trace, warn};
use rand::seq::SliceRandom;

use crate::clock::Clock;
use crate::config::Settings;
use crate::edns::EdnsMode;
use crate::model::{Answer, LwResult, Name, Question, RData, Rcode, ResourceRecord, CLASS_IN, TYPE_A, TYPE_AAAA, TYPE_CNAME, TYPE_NS};
use crate::name::ancestors;
use crate::negcache::NegCacheEntry;
use crate::packet_id::PacketId;
use crate::scheduler::EventStatus;
use crate::transport::{QueryOpts, Transport, WireCodec};
use crate::worker::Shared;

/// The `been_there` cycle-detection key: `(qname, canonicalized NS set)`,
/// ported from PowerDNS's `GetBestNSAnswer`.
#[derive(Clone, PartialEq, Eq)]
struct BeenThereKey {
	qname: String,
	nsset: Vec<String>,
}

fn canonical_nsset(names: &[String]) -> Vec<String> {
	let mut v: Vec<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
	v.sort();
	v.dedup();
	v
}

#[derive(Clone)]
pub struct SyncRes {
	pub storage: Shared,
	pub clock: Rc<dyn Clock>,
	pub transport: Rc<RefCell<dyn Transport>>,
	pub codec: Rc<dyn WireCodec>,
	pub settings: Rc<Settings>,
}

impl SyncRes {
	pub fn new(storage: Shared, clock: Rc<dyn Clock>, transport: Rc<RefCell<dyn Transport>>, codec: Rc<dyn WireCodec>, settings: Rc<Settings>) -> Self {
		Self { storage, clock, transport, codec, settings }
	}

	/// Resolves `(qname, qtype, qclass)` to an [`Answer`] carrying rcode,
	/// records, authority and additional sections.
	pub async fn begin_resolve(&self, qname: Name, qtype: u16, qclass: u16) -> Answer {
		let start = self.clock.monotonic();
		let mut been_there = Vec::new();

		let answer = self.resolve(qname, qtype, qclass, 0, &mut been_there).await;

		let elapsed_ms = (self.clock.monotonic() - start) * 1000.0;
		let mut storage = self.storage.borrow_mut();
		storage.stats.qcounter += 1;
		storage.stats.record_latency(elapsed_ms);
		match answer.rcode {
			Rcode::ServFail => storage.stats.serv_fails += 1,
			Rcode::NxDomain => storage.stats.nx_domains += 1,
			Rcode::NoError => storage.stats.no_errors += 1,
			_ => {}
		}

		answer
	}

	fn resolve<'a>(
		&'a self,
		qname: Name,
		qtype: u16,
		qclass: u16,
		depth: u32,
		been_there: &'a mut Vec<BeenThereKey>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Answer> + 'a>> {
		Box::pin(async move {
			if depth > self.settings.max_depth {
				self.storage.borrow_mut().stats.resource_limits += 1;
				return Answer::servfail();
			}

			// 1. OOB / auth-zone check
			let snapshot = self.storage.borrow().domainmap.snapshot();
			if let Some(domain) = snapshot.lookup(&qname) {
				if domain.is_forward() {
					// a forwarded zone: ask the configured forwarder directly,
					// one-shot, no further iteration.
					if let Some(server) = domain.forward_servers.first().copied() {
						let now = self.clock.unix();
						match self.async_resolve(server, &qname, qtype, qclass, domain.rd_forward, now).await {
							Ok(lw) => return self.classify(&qname, qtype, lw, depth, been_there).await,
							Err(_) => return Answer::servfail(),
						}
					}
					return Answer::servfail();
				}

				let records = domain.lookup(&qname, qtype);
				return if records.is_empty() { Answer::nxdomain() } else { Answer { rcode: Rcode::NoError, records, authority: vec![], additional: vec![] } };
			}
			drop(snapshot);

			let now = self.clock.unix();

			// 2. Negative cache probe
			{
				let storage = self.storage.borrow();
				if let Some(entry) = storage.negcache.lookup(&qname, qtype, now) {
					return if entry.exists { Answer::nodata() } else { Answer::nxdomain() };
				}
			}

			// 3. Positive cache probe
			let cached = self.storage.borrow_mut().poscache.get(&qname, qtype, now);
			if !cached.is_empty() {
				return Answer { rcode: Rcode::NoError, records: cached, authority: vec![], additional: vec![] };
			}

			// 4. CNAME chase
			if qtype != TYPE_CNAME {
				let cname_records = self.storage.borrow_mut().poscache.get(&qname, TYPE_CNAME, now);
				if let Some(cname_rr) = cname_records.first() {
					if let RData::Cname(target) = &cname_rr.rdata {
						if depth < self.settings.max_depth {
							let mut inner = self.resolve(target.clone(), qtype, qclass, depth + 1, been_there).await;
							if inner.rcode == Rcode::NoError {
								let mut records = vec![cname_rr.clone()];
								records.append(&mut inner.records);
								inner.records = records;
							}
							return inner;
						}
					}
				}
			}

			// 5. Iterative resolution
			self.iterate(&qname, qtype, qclass, depth, been_there).await
		})
	}

	/// Finds the longest cached delegation for `qname`, resolves its
	/// nameservers to addresses, and works through them in speed order.
	fn iterate<'a>(
		&'a self,
		qname: &'a Name,
		qtype: u16,
		qclass: u16,
		depth: u32,
		been_there: &'a mut Vec<BeenThereKey>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Answer> + 'a>> {
		Box::pin(async move {
			let now = self.clock.unix();

			let mut nsnames: Vec<String> = Vec::new();
			for ancestor in ancestors(qname) {
				let ns_records = self.storage.borrow_mut().poscache.get(&ancestor, TYPE_NS, now);
				if !ns_records.is_empty() {
					for rr in &ns_records {
						if let RData::Ns(name) = &rr.rdata {
							nsnames.push(name.0.clone());
						}
					}
					break;
				}
			}

			if nsnames.is_empty() {
				self.storage.borrow_mut().stats.no_delegated += 1;
				return Answer::servfail();
			}

			let key = BeenThereKey { qname: qname.fold(), nsset: canonical_nsset(&nsnames) };
			if been_there.contains(&key) {
				return Answer::servfail();
			}
			been_there.push(key);

			let addrs = self.get_addrs(&nsnames, depth, been_there).await;
			if addrs.is_empty() {
				self.storage.borrow_mut().stats.no_delegated += 1;
				return Answer::servfail();
			}

			let ordered = self.shuffle_in_speed_order(addrs);

			let mut all_throttled = true;

			for (peer, nsname) in ordered {
				let throttled = {
					let mut storage = self.storage.borrow_mut();
					storage.throttle.should_throttle(now, &(peer, qname.fold(), qtype))
				};

				if throttled {
					continue;
				}
				all_throttled = false;

				let rd = false; // iterative queries never set the RD bit
				let start = self.clock.monotonic();

				match self.async_resolve(peer, qname, qtype, qclass, rd, now).await {
					Ok(lw) => {
						let elapsed_usecs = (self.clock.monotonic() - start) * 1_000_000.0;
						debug!("response for {qname} from {peer} in {elapsed_usecs:.0}us, rcode={:?}", lw.rcode);
						self.storage.borrow_mut().nsspeeds.submit(&nsname, peer, elapsed_usecs, self.clock.monotonic());
						if matches!(lw.rcode, Rcode::FormErr) {
							// a malformed-query complaint from a peer queried with EDNS:
							// most likely it chokes on the OPT record, so back off probing.
							warn!("{peer} returned FORMERR to an EDNS query, demoting its EDNS mode");
							self.storage.borrow_mut().edns.demote(peer, now);
						}
						return self.classify(qname, qtype, lw, depth, been_there).await;
					}
					Err(Outcome::Timeout) => {
						warn!("query for {qname} to {peer} timed out, throttling and trying the next address");
						self.storage.borrow_mut().stats.outgoing_timeouts += 1;
						self.storage.borrow_mut().throttle.throttle(now, (peer, qname.fold(), qtype), None, None);
					}
					Err(Outcome::Cancelled) => {
						warn!("query for {qname} to {peer} was cancelled");
						self.storage.borrow_mut().stats.unreachables += 1;
					}
				}
			}

			if all_throttled {
				self.storage.borrow_mut().stats.throttled_queries += 1;
			}

			Answer::servfail()
		})
	}

	/// Resolves each nameserver name in `nsnames` to an address, recursing
	/// through the positive cache (and, on miss, into `resolve` itself) with
	/// cycle protection via `been_there`.
	fn get_addrs<'a>(&'a self, nsnames: &'a [String], depth: u32, been_there: &'a mut Vec<BeenThereKey>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<(IpAddr, String)>> + 'a>> {
		Box::pin(async move {
			let mut out = Vec::new();
			let now = self.clock.unix();

			for nsname in nsnames {
				let name = Name::from(nsname.as_str());

				let mut cached = self.storage.borrow_mut().poscache.get(&name, TYPE_A, now);
				if self.settings.do_ipv6 {
					cached.extend(self.storage.borrow_mut().poscache.get(&name, TYPE_AAAA, now));
				}

				if !cached.is_empty() {
					for rr in cached {
						match rr.rdata {
							RData::A(addr) => out.push((IpAddr::V4(addr), nsname.clone())),
							RData::Aaaa(addr) => out.push((IpAddr::V6(addr), nsname.clone())),
							_ => {}
						}
					}
					continue;
				}

				if depth + 1 > self.settings.max_depth {
					continue;
				}

				let answer = self.resolve(name, TYPE_A, CLASS_IN, depth + 1, been_there).await;
				for rr in answer.records {
					if let RData::A(addr) = rr.rdata {
						out.push((IpAddr::V4(addr), nsname.clone()));
					}
				}
			}

			out
		})
	}

	/// Groups addresses by their current NS-speed estimate, shuffles within
	/// each equal-speed bucket, and orders buckets ascending, the way
	/// PowerDNS's `shuffleInSpeedOrder` does.
	fn shuffle_in_speed_order(&self, addrs: Vec<(IpAddr, String)>) -> Vec<(IpAddr, String)> {
		let mut storage = self.storage.borrow_mut();
		let monotonic = self.clock.monotonic();

		let mut scored: Vec<(f64, IpAddr, String)> =
			addrs.into_iter().map(|(addr, nsname)| (storage.nsspeeds.speed_of(&nsname, addr, monotonic), addr, nsname)).collect();

		drop(storage);

		scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

		let mut rng = rand::thread_rng();
		let mut out = Vec::with_capacity(scored.len());
		let mut i = 0;
		while i < scored.len() {
			let mut j = i + 1;
			while j < scored.len() && (scored[j].0 - scored[i].0).abs() < 1e-6 {
				j += 1;
			}
			let mut bucket: Vec<(f64, IpAddr, String)> = scored[i..j].to_vec();
			bucket.shuffle(&mut rng);
			out.extend(bucket.into_iter().map(|(_, addr, ns)| (addr, ns)));
			i = j;
		}

		out
	}

	/// Classifies a response into an authoritative answer, a referral, or a
	/// negative result.
	fn classify<'a>(
		&'a self,
		qname: &'a Name,
		qtype: u16,
		lw: LwResult,
		depth: u32,
		been_there: &'a mut Vec<BeenThereKey>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Answer> + 'a>> {
		Box::pin(async move {
			let now = self.clock.unix();

			if !lw.question.qname.eq_ignore_case(qname) {
				self.storage.borrow_mut().stats.case_mismatch_count += 1;
				return Answer::servfail();
			}

			match lw.rcode {
				Rcode::NxDomain => {
					let soa = lw.authority.iter().find_map(|rr| match &rr.rdata {
						RData::Soa { minimum, .. } => Some((rr.name.clone(), *minimum)),
						_ => None,
					});
					let (soa_name, minttl) = soa.unwrap_or((qname.clone(), self.settings.maxnegttl));
					let ttd = now + minttl.min(self.settings.maxnegttl);
					self.storage.borrow_mut().negcache.insert(NegCacheEntry { name: qname.clone(), qtype, soa_name, ttd, exists: false });
					return Answer::nxdomain();
				}
				Rcode::ServFail | Rcode::FormErr | Rcode::NotImp | Rcode::Refused => {
					return Answer::servfail();
				}
				Rcode::NoError => {}
			}

			if !lw.answers.is_empty() {
				let authoritative = lw.aa;
				let mut records: Vec<ResourceRecord> = lw.answers.iter().cloned().map(|mut rr| {
					rr.authoritative = authoritative;
					rr
				}).collect();

				self.storage.borrow_mut().poscache.replace(qname, qtype, records.clone(), now, self.settings.maxcachettl);

				for rr in lw.additional.iter().filter(|rr| rr.ty == TYPE_A || rr.ty == TYPE_AAAA) {
					let mut glue = rr.clone();
					glue.authoritative = false;
					self.storage.borrow_mut().poscache.replace(&rr.name, rr.ty, vec![glue], now, self.settings.maxcachettl);
				}

				records.retain(|rr| rr.ty == qtype);
				return Answer { rcode: Rcode::NoError, records, authority: lw.authority, additional: lw.additional };
			}

			// referral: authority section carries NS records for a more
			// specific (or equal) zone than what we already knew
			let referral_ns: Vec<ResourceRecord> = lw.authority.iter().filter(|rr| rr.ty == TYPE_NS).cloned().collect();
			if !referral_ns.is_empty() {
				// every NS record for a given delegation shares the same owner
				// name (the zone cut), so they must be cached as one record set
				// rather than one `replace` per record, which would overwrite
				// all but the last.
				let mut by_owner: Vec<(Name, Vec<ResourceRecord>)> = Vec::new();
				for rr in &referral_ns {
					let mut glue = rr.clone();
					glue.authoritative = false;
					match by_owner.iter_mut().find(|(name, _)| name.eq_ignore_case(&rr.name)) {
						Some((_, set)) => set.push(glue),
						None => by_owner.push((rr.name.clone(), vec![glue])),
					}
				}
				for (owner, set) in by_owner {
					self.storage.borrow_mut().poscache.replace(&owner, TYPE_NS, set, now, self.settings.maxcachettl);
				}

				for rr in lw.additional.iter().filter(|rr| rr.ty == TYPE_A || rr.ty == TYPE_AAAA) {
					let mut glue = rr.clone();
					glue.authoritative = false;
					self.storage.borrow_mut().poscache.replace(&rr.name, rr.ty, vec![glue], now, self.settings.maxcachettl);
				}

				self.storage.borrow_mut().stats.ns_set_invalidations += 1;
				return self.iterate(qname, qtype, CLASS_IN, depth + 1, been_there).await;
			}

			// NODATA: name exists, nothing of this qtype
			let soa = lw.authority.iter().find_map(|rr| match &rr.rdata {
				RData::Soa { minimum, .. } => Some((rr.name.clone(), *minimum)),
				_ => None,
			});
			let (soa_name, minttl) = soa.unwrap_or((qname.clone(), self.settings.maxnegttl));
			let ttd = now + minttl.min(self.settings.maxnegttl);
			self.storage.borrow_mut().negcache.insert(NegCacheEntry { name: qname.clone(), qtype, soa_name, ttd, exists: true });
			Answer::nodata()
		})
	}

	/// The async send/receive wrapper, PowerDNS's `asyncresolve`.
	async fn async_resolve(&self, peer: IpAddr, qname: &Name, qtype: u16, qclass: u16, rd: bool, now_unix: u32) -> Result<LwResult, Outcome> {
		let id: u16 = rand::random();
		let key = PacketId { id, peer, qname: qname.clone(), qtype, socket: 0, fd: 0 };

		let deadline = self.clock.monotonic() + self.settings.query_timeout_secs;
		let (handle, chained) = {
			let storage = self.storage.borrow();
			let handle = storage.scheduler.handle();
			let chained = handle.register_or_chain(&key, deadline);
			(handle, chained)
		};

		let ping: Option<[u8; 8]> = if !chained {
			let mode = self.storage.borrow().edns.mode(peer);
			let probe_due = self.storage.borrow().edns.should_probe(peer, now_unix);
			// NoEdns normally suppresses EDNS outright, but a due probe still
			// gets one, so a peer that recovers from a transient FORMERR spell
			// can climb back out of NoEdns instead of being stuck there forever.
			let send_edns = !self.settings.no_edns && (!matches!(mode, EdnsMode::NoEdns) || probe_due);
			let ping = if send_edns && probe_due && !self.settings.no_edns_ping { Some(rand::random::<[u8; 8]>()) } else { None };

			let opts = QueryOpts { rd, edns: send_edns, edns_ping: ping };
			let packet = self.codec.build_query(id, &Question { qname: qname.clone(), qtype, qclass }, opts);
			trace!("sending query for {qname} type={qtype} to {peer}, id={id}, edns={send_edns}");
			self.transport.borrow_mut().send(peer, 53, &packet);
			ping
		} else {
			trace!("chaining onto an in-flight query for {qname} type={qtype} to {peer}");
			self.storage.borrow_mut().stats.chain_resends += 1;
			// a chained wait never sent its own query, so it has no cookie of
			// its own to verify an echo against.
			None
		};

		match handle.wait_event(&key).await {
			EventStatus::Delivered(lw) => {
				if let Some(echoed) = lw.edns_ping {
					let mut storage = self.storage.borrow_mut();
					if Some(echoed) == ping {
						storage.stats.edns_ping_matches += 1;
						storage.edns.ping_ok(peer, now_unix);
					} else if ping.is_some() {
						storage.stats.edns_ping_mismatches += 1;
					}
				}
				Ok(lw)
			}
			EventStatus::Timeout => Err(Outcome::Timeout),
			EventStatus::Cancelled => Err(Outcome::Cancelled),
		}
	}

	/// Drains the transport and delivers any matching responses to waiting
	/// fibers; this is the counterpart half of [`Self::async_resolve`] that
	/// the host's I/O loop drives.
	pub fn pump_transport(&self) {
		let packets = self.transport.borrow_mut().poll_recv();

		for (peer, bytes) in packets {
			let Some(lw) = self.codec.parse_response(&bytes) else {
				continue;
			};

			let birthday_key = PacketId { id: lw.id, peer, qname: lw.question.qname.clone(), qtype: lw.question.qtype, socket: 0, fd: 0 };
			let birthday = birthday_key.birthday();

			let handle = self.storage.borrow().scheduler.handle();
			let delivered = handle.send_event(&birthday, lw.id, lw.clone());

			if delivered == 0 {
				self.storage.borrow_mut().stats.unexpected_count += 1;
			}

			if lw.aa && lw.edns_ping.is_none() {
				// answered fine, just silently dropped the PING option rather
				// than choking on EDNS outright — distinct from a FormErr demotion.
				let mode = self.storage.borrow().edns.mode(peer);
				if matches!(mode, EdnsMode::Unknown) {
					self.storage.borrow_mut().edns.ignorant(peer, self.clock.unix());
				}
			}
		}
	}

	/// Advances the scheduler and pumps the transport one step; what the
	/// worker's I/O loop calls every tick.
	pub fn tick(&self) -> bool {
		self.pump_transport();
		let now = self.clock.monotonic();
		self.storage.borrow_mut().scheduler.schedule(now)
	}
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
	Timeout,
	Cancelled,
}
