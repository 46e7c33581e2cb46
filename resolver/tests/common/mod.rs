//! Shared scaffolding for the end-to-end scenario tests: a fake clock, a
//! scripted transport that answers queries synchronously, a manual DNS
//! response encoder (the codec's `build_query` has no response-side
//! counterpart), and the `net`-backed `WireCodec` the engine is wired
//! against.
//!
//! This lives under `tests/common/` rather than `tests/common.rs` so cargo
//! doesn't treat it as its own test binary.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use resolver::clock::Clock;
use resolver::domain::DomainMapHandle;
use resolver::model::{Answer, LwResult, Name, Question, RData, Rcode, ResourceRecord};
use resolver::transport::{QueryOpts, Transport, WireCodec};
use resolver::worker::StaticStorage;
use resolver::{Settings, SyncRes};

/// A clock that only moves when told to (the crate's own `clock::mock` is
/// `#[cfg(test)]`-gated to unit tests and invisible from here).
pub struct MockClock {
	monotonic: Cell<f64>,
	unix: Cell<u32>,
}

impl MockClock {
	pub fn new(unix: u32) -> Self {
		Self { monotonic: Cell::new(0.0), unix: Cell::new(unix) }
	}

	pub fn advance(&self, secs: f64) {
		self.monotonic.set(self.monotonic.get() + secs);
		self.unix.set(self.unix.get() + secs as u32);
	}
}

impl Clock for MockClock {
	fn monotonic(&self) -> f64 {
		self.monotonic.get()
	}

	fn unix(&self) -> u32 {
		self.unix.get()
	}
}

/// A canned RDATA shape for the hand-rolled response encoder below.
pub enum RrSpec {
	A(Ipv4Addr),
	Ns(String),
	Cname(String),
	Soa { mname: String, rname: String, serial: u32, refresh: u32, retry: u32, expire: u32, minimum: u32 },
}

pub struct RrEntry {
	pub name: String,
	pub ty: u16,
	pub ttl: u32,
	pub rdata: RrSpec,
}

pub fn rr_a(name: &str, ttl: u32, addr: Ipv4Addr) -> RrEntry {
	RrEntry { name: name.to_string(), ty: resolver::model::TYPE_A, ttl, rdata: RrSpec::A(addr) }
}

pub fn rr_ns(name: &str, ttl: u32, target: &str) -> RrEntry {
	RrEntry { name: name.to_string(), ty: resolver::model::TYPE_NS, ttl, rdata: RrSpec::Ns(target.to_string()) }
}

pub fn rr_soa(name: &str, ttl: u32, mname: &str, rname: &str, minimum: u32) -> RrEntry {
	RrEntry {
		name: name.to_string(),
		ty: resolver::model::TYPE_SOA,
		ttl,
		rdata: RrSpec::Soa { mname: mname.to_string(), rname: rname.to_string(), serial: 1, refresh: 3600, retry: 600, expire: 604800, minimum },
	}
}

fn encode_name(buf: &mut Vec<u8>, name: &str) {
	let trimmed = name.trim_end_matches('.');
	if !trimmed.is_empty() {
		for label in trimmed.split('.') {
			let bytes = label.as_bytes();
			buf.push(bytes.len() as u8);
			buf.extend_from_slice(bytes);
		}
	}
	buf.push(0);
}

fn encode_flags(qr: bool, aa: bool, rcode: u8) -> [u8; 2] {
	let mut v: u16 = 0;
	v |= (rcode as u16) & 0xF;
	v |= (aa as u16) << 10;
	v |= (qr as u16) << 15;
	v.to_be_bytes()
}

fn encode_rr(buf: &mut Vec<u8>, entry: &RrEntry) {
	encode_name(buf, &entry.name);
	let mut rdbuf = Vec::new();
	let ty = entry.ty;
	match &entry.rdata {
		RrSpec::A(addr) => rdbuf.extend_from_slice(&addr.octets()),
		RrSpec::Ns(target) => encode_name(&mut rdbuf, target),
		RrSpec::Cname(target) => encode_name(&mut rdbuf, target),
		RrSpec::Soa { mname, rname, serial, refresh, retry, expire, minimum } => {
			encode_name(&mut rdbuf, mname);
			encode_name(&mut rdbuf, rname);
			rdbuf.extend_from_slice(&serial.to_be_bytes());
			rdbuf.extend_from_slice(&refresh.to_be_bytes());
			rdbuf.extend_from_slice(&retry.to_be_bytes());
			rdbuf.extend_from_slice(&expire.to_be_bytes());
			rdbuf.extend_from_slice(&minimum.to_be_bytes());
		}
	}
	buf.extend_from_slice(&ty.to_be_bytes());
	buf.extend_from_slice(&resolver::model::CLASS_IN.to_be_bytes());
	buf.extend_from_slice(&entry.ttl.to_be_bytes());
	buf.extend_from_slice(&(rdbuf.len() as u16).to_be_bytes());
	buf.extend_from_slice(&rdbuf);
}

/// Builds a complete response packet, echoing the id/question a real server
/// would, for the `ScriptedTransport` below to hand back.
pub fn encode_response(id: u16, qname: &str, qtype: u16, rcode: u8, aa: bool, answers: &[RrEntry], authority: &[RrEntry], additional: &[RrEntry]) -> Vec<u8> {
	let mut buf = Vec::new();
	buf.extend_from_slice(&id.to_be_bytes());
	buf.extend_from_slice(&encode_flags(true, aa, rcode));
	buf.extend_from_slice(&1u16.to_be_bytes());
	buf.extend_from_slice(&(answers.len() as u16).to_be_bytes());
	buf.extend_from_slice(&(authority.len() as u16).to_be_bytes());
	buf.extend_from_slice(&(additional.len() as u16).to_be_bytes());
	encode_name(&mut buf, qname);
	buf.extend_from_slice(&qtype.to_be_bytes());
	buf.extend_from_slice(&resolver::model::CLASS_IN.to_be_bytes());
	for entry in answers.iter().chain(authority).chain(additional) {
		encode_rr(&mut buf, entry);
	}
	buf
}

type ReplyFn = Box<dyn FnOnce(u16, String, u16) -> Vec<u8>>;

/// A fake network: `send` hands the outgoing bytes to whatever script is
/// queued for that peer (if any) and queues the canned reply for the next
/// `poll_recv`. A peer with no queued script is a blackhole — queries to it
/// never get a response, which is how the timeout scenarios are driven.
#[derive(Default)]
pub struct ScriptedTransport {
	pub sent: Vec<(IpAddr, Vec<u8>)>,
	scripts: HashMap<IpAddr, VecDeque<ReplyFn>>,
	pending: VecDeque<(IpAddr, Vec<u8>)>,
}

impl ScriptedTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push_script(&mut self, peer: IpAddr, reply: impl FnOnce(u16, String, u16) -> Vec<u8> + 'static) {
		self.scripts.entry(peer).or_default().push_back(Box::new(reply));
	}

	pub fn sent_count_to(&self, peer: IpAddr) -> usize {
		self.sent.iter().filter(|(p, _)| *p == peer).count()
	}
}

impl Transport for ScriptedTransport {
	fn send(&mut self, peer: IpAddr, _port: u16, bytes: &[u8]) {
		self.sent.push((peer, bytes.to_vec()));

		let parsed = net::dns::parse_response(bytes).expect("harness always sends well-formed queries");
		if let Some(queue) = self.scripts.get_mut(&peer) {
			if let Some(reply) = queue.pop_front() {
				let bytes = reply(parsed.id, parsed.question.qname.0, parsed.question.qtype);
				self.pending.push_back((peer, bytes));
			}
		}
	}

	fn poll_recv(&mut self) -> Vec<(IpAddr, Vec<u8>)> {
		self.pending.drain(..).collect()
	}
}

fn convert_rdata(rdata: &net::dns::RData) -> RData {
	match rdata {
		net::dns::RData::A(addr) => RData::A(*addr),
		net::dns::RData::Aaaa(addr) => RData::Aaaa(*addr),
		net::dns::RData::Ns(name) => RData::Ns(Name(name.0.clone())),
		net::dns::RData::Cname(name) => RData::Cname(Name(name.0.clone())),
		net::dns::RData::Soa { mname, rname, serial, refresh, retry, expire, minimum } => {
			RData::Soa { mname: Name(mname.0.clone()), rname: Name(rname.0.clone()), serial: *serial, refresh: *refresh, retry: *retry, expire: *expire, minimum: *minimum }
		}
		net::dns::RData::Opt { .. } => RData::Other(Vec::new()),
		net::dns::RData::Other(bytes) => RData::Other(bytes.clone()),
	}
}

fn convert_rr(rr: &net::dns::ResourceRecord) -> ResourceRecord {
	ResourceRecord { name: Name(rr.name.0.clone()), ty: rr.ty, class: rr.class, ttl: rr.ttl, rdata: convert_rdata(&rr.rdata), authoritative: false }
}

/// The `net`-backed wire codec, wiring the engine's transport contract to
/// the real DNS parser/encoder rather than anything invented for the test.
pub struct NetCodec;

impl WireCodec for NetCodec {
	fn build_query(&self, id: u16, question: &Question, opts: QueryOpts) -> Vec<u8> {
		let edns = if opts.edns { Some(net::dns::EdnsOpts { udp_payload_size: 4096, ping: opts.edns_ping }) } else { None };
		let wire_opts = net::dns::QueryOpts { rd: opts.rd, edns };
		net::dns::build_query(id, &question.qname.0, question.qtype, question.qclass, wire_opts)
	}

	fn parse_response(&self, bytes: &[u8]) -> Option<LwResult> {
		let lw = net::dns::parse_response(bytes).ok()?;
		let ping = lw.edns_ping();
		Some(LwResult {
			id: lw.id,
			rcode: Rcode::from_wire(lw.rcode),
			aa: lw.aa,
			tc: lw.tc,
			question: Question { qname: Name(lw.question.qname.0), qtype: lw.question.qtype, qclass: lw.question.qclass },
			answers: lw.answers.iter().map(convert_rr).collect(),
			authority: lw.authority.iter().map(convert_rr).collect(),
			additional: lw.additional.iter().map(convert_rr).collect(),
			edns_ping: ping,
		})
	}
}

pub struct Harness {
	pub engine: SyncRes,
	pub clock: Rc<MockClock>,
	pub transport: Rc<RefCell<ScriptedTransport>>,
}

impl Harness {
	pub fn new(unix_start: u32) -> Self {
		Self::with_settings(unix_start, Settings::default())
	}

	pub fn with_settings(unix_start: u32, settings: Settings) -> Self {
		let storage = Rc::new(RefCell::new(StaticStorage::new(DomainMapHandle::default(), 4)));
		let clock = Rc::new(MockClock::new(unix_start));
		let transport = Rc::new(RefCell::new(ScriptedTransport::new()));
		let codec = Rc::new(NetCodec);

		let engine = SyncRes::new(storage, clock.clone(), transport.clone(), codec, Rc::new(settings));
		Self { engine, clock, transport }
	}

	/// Seeds the positive cache directly, the way a resolver is primed from a
	/// root-hints file before it ever sends a packet.
	pub fn seed_ns(&self, zone: &str, ttl: u32, ns_names: &[&str]) {
		let now = self.clock.unix();
		let records: Vec<ResourceRecord> = ns_names
			.iter()
			.map(|ns| ResourceRecord { name: Name::from(zone), ty: resolver::model::TYPE_NS, class: resolver::model::CLASS_IN, ttl, rdata: RData::Ns(Name::from(*ns)), authoritative: false })
			.collect();
		self.engine.storage.borrow_mut().poscache.replace(&Name::from(zone), resolver::model::TYPE_NS, records, now, ttl);
	}

	pub fn seed_glue(&self, hostname: &str, ttl: u32, addr: Ipv4Addr) {
		let now = self.clock.unix();
		let rr = ResourceRecord { name: Name::from(hostname), ty: resolver::model::TYPE_A, class: resolver::model::CLASS_IN, ttl, rdata: RData::A(addr), authoritative: false };
		self.engine.storage.borrow_mut().poscache.replace(&Name::from(hostname), resolver::model::TYPE_A, vec![rr], now, ttl);
	}
}

fn noop_raw_waker() -> RawWaker {
	fn no_op(_: *const ()) {}
	fn clone(_: *const ()) -> RawWaker {
		noop_raw_waker()
	}

	static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
	RawWaker::new(std::ptr::null(), &VTABLE)
}

pub fn noop_waker() -> Waker {
	unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// Drives `future` to completion, advancing the harness's clock and pumping
/// its transport between polls so timeouts and scripted replies both surface.
/// `max_ticks` bounds the loop so a genuinely-stuck future fails the test
/// instead of hanging it.
pub fn drive_to_completion<'a>(harness: &'a Harness, mut future: Pin<Box<dyn Future<Output = Answer> + 'a>>, tick_secs: f64, max_ticks: u32) -> Answer {
	let waker = noop_waker();
	let mut cx = Context::from_waker(&waker);

	for _ in 0..max_ticks {
		if let Poll::Ready(answer) = future.as_mut().poll(&mut cx) {
			return answer;
		}

		harness.clock.advance(tick_secs);
		harness.engine.tick();
	}

	panic!("future did not resolve within {max_ticks} ticks");
}
