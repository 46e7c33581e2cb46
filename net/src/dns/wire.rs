//! The DNS wire codec: `parse_response` / `build_query`, the "Wire codec"
//! contract the resolution core depends on. Everything here is pure — no
//! sockets, no scheduler — so the resolution core can treat it as an
//! external collaborator it merely calls into.
//!
//! The fixed-size header is expressed with `bilge` bitfields, the same way
//! a single-purpose A-record client would; the variable-length sections
//! (names, RDATA) are walked with a small cursor since DNS name compression
//! needs backward jumps that a monotonic byte-splitter can't express.

use core::net::{Ipv4Addr, Ipv6Addr};

use bilge::prelude::*;
use collections::bytes::Cursor;
use utils::bytes::Cast;
use utils::endian::{u16be, u32be, BigEndian};

pub const CLASS_IN: u16 = 1;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_OPT: u16 = 41;

/// The EDNS0 PING option code used for spoof-resistance probing. Not a
/// registered IANA option; this mirrors the private
/// option PowerDNS historically used for the same purpose.
pub const OPT_PING: u16 = 65280;

#[bitsize(4)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
	Query = 0,
	IQuery = 1,
	Status = 2,
	#[fallback]
	Reserved,
}

#[bitsize(4)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rcode {
	Ok = 0,
	FormatErr = 1,
	ServerFailure = 2,
	NameErr = 3,
	NotImplemented = 4,
	Refused = 5,
	#[fallback]
	Reserved,
}

#[bitsize(16)]
#[derive(FromBits, Clone, Copy)]
pub struct Flags {
	pub rcode: Rcode,
	pub z: u3,
	pub ra: bool,
	pub rd: bool,
	pub tc: bool,
	pub aa: bool,
	pub opcode: Opcode,
	pub qr: bool,
}

#[derive(Cast)]
#[repr(C, packed)]
pub struct Header {
	pub id: u16,
	pub flags: BigEndian<Flags>,
	pub qdcount: u16be,
	pub ancount: u16be,
	pub nscount: u16be,
	pub arcount: u16be,
}

/// A fully-qualified, case-preserving domain name as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name(pub String);

impl Name {
	pub fn root() -> Self {
		Self(String::new())
	}

	/// ASCII case-folded comparison per DNS rules.
	pub fn eq_ignore_case(&self, other: &Name) -> bool {
		self.0.eq_ignore_ascii_case(&other.0)
	}
}

fn push_name<'a>(mut cur: Cursor<'a>, name: &'a str) -> Cursor<'a> {
	let name = name.trim_end_matches('.');

	if !name.is_empty() {
		for label in name.split('.') {
			let bytes = label.as_bytes();
			assert!(bytes.len() <= 63, "DNS labels must be 63 octets or fewer");

			let len: u8 = bytes.len() as _;
			cur = cur.push(&len);
			cur = cur.push(bytes);
		}
	}

	cur.push(&0u8)
}

/// A minimal, owned record type covering the RDATA shapes the resolution
/// core needs to reason about (referral-following, glue, CNAME chasing,
/// SOA-driven negative caching, EDNS option parsing).
#[derive(Clone, Debug)]
pub enum RData {
	A(Ipv4Addr),
	Aaaa(Ipv6Addr),
	Ns(Name),
	Cname(Name),
	Soa { mname: Name, rname: Name, serial: u32, refresh: u32, retry: u32, expire: u32, minimum: u32 },
	Opt { udp_payload_size: u16, ping: Option<[u8; 8]> },
	Other(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct ResourceRecord {
	pub name: Name,
	pub ty: u16,
	pub class: u16,
	pub ttl: u32,
	pub rdata: RData,
}

#[derive(Clone, Debug)]
pub struct Question {
	pub qname: Name,
	pub qtype: u16,
	pub qclass: u16,
}

/// A parsed DNS response, matching the `LWResult` the core's `async_resolve`
/// wrapper expects from the wire codec.
#[derive(Clone, Debug)]
pub struct LwResult {
	pub id: u16,
	pub rcode: u8,
	pub aa: bool,
	pub tc: bool,
	pub question: Question,
	pub answers: Vec<ResourceRecord>,
	pub authority: Vec<ResourceRecord>,
	pub additional: Vec<ResourceRecord>,
}

impl LwResult {
	pub fn edns_ping(&self) -> Option<[u8; 8]> {
		self.additional.iter().find_map(|rr| match &rr.rdata {
			RData::Opt { ping: Some(p), .. } => Some(*p),
			_ => None,
		})
	}
}

#[derive(Debug)]
pub struct ParseError;

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	fn u8(&mut self) -> Result<u8, ParseError> {
		let b = *self.buf.get(self.pos).ok_or(ParseError)?;
		self.pos += 1;
		Ok(b)
	}

	fn u16(&mut self) -> Result<u16, ParseError> {
		Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
	}

	fn u32(&mut self) -> Result<u32, ParseError> {
		Ok(u32::from_be_bytes([self.u8()?, self.u8()?, self.u8()?, self.u8()?]))
	}

	fn bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
		let end = self.pos.checked_add(n).ok_or(ParseError)?;
		let slice = self.buf.get(self.pos..end).ok_or(ParseError)?;
		self.pos = end;
		Ok(slice)
	}

	/// Reads a name, following compression pointers. Bounded to a handful
	/// of jumps so a malicious or corrupt packet can't loop forever.
	fn name(&mut self) -> Result<Name, ParseError> {
		let mut labels = Vec::new();
		let mut pos = self.pos;
		let mut jumped = false;
		let mut jumps = 0;

		loop {
			let len = *self.buf.get(pos).ok_or(ParseError)?;

			match len >> 6 {
				0b00 => {
					if len == 0 {
						if !jumped {
							self.pos = pos + 1;
						}
						break;
					}

					let start = pos + 1;
					let end = start.checked_add(len as usize).ok_or(ParseError)?;
					let label = self.buf.get(start..end).ok_or(ParseError)?;
					labels.push(String::from_utf8_lossy(label).into_owned());
					pos = end;
				}
				0b11 => {
					let lo = *self.buf.get(pos + 1).ok_or(ParseError)?;
					let target = (((len & 0x3f) as usize) << 8) | lo as usize;

					if !jumped {
						self.pos = pos + 2;
					}

					jumps += 1;
					if jumps > 32 {
						return Err(ParseError);
					}

					jumped = true;
					pos = target;
				}
				_ => return Err(ParseError),
			}
		}

		Ok(Name(labels.join(".")))
	}

	fn question(&mut self) -> Result<Question, ParseError> {
		let qname = self.name()?;
		let qtype = self.u16()?;
		let qclass = self.u16()?;
		Ok(Question { qname, qtype, qclass })
	}

	fn rr(&mut self) -> Result<ResourceRecord, ParseError> {
		let name = self.name()?;
		let ty = self.u16()?;
		let class = self.u16()?;
		let ttl = self.u32()?;
		let rdlength = self.u16()? as usize;
		let rdata_start = self.pos;

		let rdata = match ty {
			TYPE_A => {
				let b = self.bytes(4)?;
				RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
			}
			TYPE_AAAA => {
				let b = self.bytes(16)?;
				let mut oct = [0u8; 16];
				oct.copy_from_slice(b);
				RData::Aaaa(Ipv6Addr::from(oct))
			}
			TYPE_NS => RData::Ns(self.name()?),
			TYPE_CNAME => RData::Cname(self.name()?),
			TYPE_SOA => {
				let mname = self.name()?;
				let rname = self.name()?;
				let serial = self.u32()?;
				let refresh = self.u32()?;
				let retry = self.u32()?;
				let expire = self.u32()?;
				let minimum = self.u32()?;
				RData::Soa { mname, rname, serial, refresh, retry, expire, minimum }
			}
			TYPE_OPT => {
				let udp_payload_size = class as u16;
				let end = rdata_start + rdlength;
				let mut ping = None;

				while self.pos + 4 <= end {
					let code = self.u16()?;
					let len = self.u16()? as usize;
					let data = self.bytes(len)?;

					if code == OPT_PING && data.len() == 8 {
						let mut buf = [0u8; 8];
						buf.copy_from_slice(data);
						ping = Some(buf);
					}
				}

				RData::Opt { udp_payload_size, ping }
			}
			_ => RData::Other(self.bytes(rdlength)?.to_vec()),
		};

		// For fixed-format records we may have consumed a different number
		// of bytes than `rdlength` states (e.g. a name mid-RDATA uses
		// compression); resync to the RDATA boundary the header promised.
		self.pos = rdata_start + rdlength;

		Ok(ResourceRecord { name, ty, class, ttl, rdata })
	}
}

fn rcode_to_u8(r: Rcode) -> u8 {
	match r {
		Rcode::Ok => 0,
		Rcode::FormatErr => 1,
		Rcode::ServerFailure => 2,
		Rcode::NameErr => 3,
		Rcode::NotImplemented => 4,
		Rcode::Refused => 5,
		Rcode::Reserved => 6,
	}
}

/// Parses a complete DNS message (query or response) from `buf`.
pub fn parse_response(buf: &[u8]) -> Result<LwResult, ParseError> {
	let header: &Header = utils::bytes::cast(buf.get(..12).ok_or(ParseError)?);

	let id = header.id;
	let flags = header.flags.get();
	let qdcount = header.qdcount.get();
	let ancount = header.ancount.get();
	let nscount = header.nscount.get();
	let arcount = header.arcount.get();

	let mut r = Reader::new(buf);
	r.pos = 12;

	if qdcount != 1 {
		return Err(ParseError);
	}

	let question = r.question()?;

	let mut answers = Vec::with_capacity(ancount as usize);
	for _ in 0..ancount {
		answers.push(r.rr()?);
	}

	let mut authority = Vec::with_capacity(nscount as usize);
	for _ in 0..nscount {
		authority.push(r.rr()?);
	}

	let mut additional = Vec::with_capacity(arcount as usize);
	for _ in 0..arcount {
		additional.push(r.rr()?);
	}

	Ok(LwResult {
		id,
		rcode: rcode_to_u8(flags.rcode()),
		aa: flags.aa(),
		tc: flags.tc(),
		question,
		answers,
		authority,
		additional,
	})
}

/// Options controlling how a query is framed on the wire.
#[derive(Clone, Copy, Default)]
pub struct QueryOpts {
	pub rd: bool,
	pub edns: Option<EdnsOpts>,
}

#[derive(Clone, Copy, Default)]
pub struct EdnsOpts {
	pub udp_payload_size: u16,
	pub ping: Option<[u8; 8]>,
}

/// Builds a query packet for `qname`/`qtype`/`qclass` with the given `id`.
pub fn build_query(id: u16, qname: &str, qtype: u16, qclass: u16, opts: QueryOpts) -> Vec<u8> {
	let mut vec = vec![0u8; 1500];

	Cursor::vec(&mut vec, |cur| {
		let (header, mut buf): (&mut Header, _) = cur.split();

		header.id = id;
		header.flags = Flags::new(Rcode::Ok, u3::new(0), false, opts.rd, false, false, Opcode::Query, false).into();
		header.qdcount = 1.into();
		header.ancount = 0.into();
		header.nscount = 0.into();
		header.arcount = (if opts.edns.is_some() { 1u16 } else { 0 }).into();

		buf = push_name(buf, qname);
		buf = buf.push(&BigEndian::from(qtype));
		buf = buf.push(&BigEndian::from(qclass));

		if let Some(edns) = opts.edns {
			// root name, TYPE=OPT, CLASS=udp payload size, TTL=0 (extended rcode/version), RDLENGTH, RDATA
			buf = buf.push(&0u8);
			buf = buf.push(&BigEndian::from(TYPE_OPT));
			buf = buf.push(&BigEndian::from(edns.udp_payload_size));
			buf = buf.push(&BigEndian::from(0u32));

			if let Some(ping) = edns.ping {
				buf = buf.push(&BigEndian::from(4u16 + 8));
				buf = buf.push(&BigEndian::from(OPT_PING));
				buf = buf.push(&BigEndian::from(8u16));
				buf.push(&ping);
			} else {
				buf.push(&BigEndian::from(0u16));
			}
		}
	});

	vec
}
