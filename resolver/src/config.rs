//! Every resolver knob, plus the constants named by the throttle and EDNS
//! probing algorithms. Plain data with a `Default`; loading it from a file
//! or CLI is explicitly out of scope here, so there is deliberately no
//! parser attached.

#[derive(Clone, Debug)]
pub struct Settings {
	/// Upper bound on negative cache TTL, seconds.
	pub maxnegttl: u32,
	/// Upper bound on positive cache TTL, seconds.
	pub maxcachettl: u32,
	pub packetcachettl: u32,
	pub packetcacheservfailttl: u32,
	pub nopacketcache: bool,
	pub no_edns: bool,
	pub no_edns_ping: bool,
	/// Consider AAAA glue during delegation resolution.
	pub do_ipv6: bool,
	/// NSID response identifier.
	pub server_id: String,
	/// Size of the worker fleet.
	pub num_threads: usize,
	/// Maximum recursion depth before SERVFAIL.
	pub max_depth: u32,
	/// Per-query timeout before a fiber's `wait_event` reports TIMEOUT.
	pub query_timeout_secs: f64,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			maxnegttl: 3600,
			maxcachettl: 86400,
			packetcachettl: 3600,
			packetcacheservfailttl: 60,
			nopacketcache: false,
			no_edns: false,
			no_edns_ping: false,
			do_ipv6: false,
			server_id: String::new(),
			num_threads: 1,
			max_depth: 40,
			query_timeout_secs: 10.0,
		}
	}
}
