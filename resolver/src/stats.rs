//! Monotonic counters, incremented only by the owning worker on its local
//! copy. Carries the fuller field set from PowerDNS's `RecursorStats`, since
//! the set of counters worth tracking is open-ended rather than an
//! exhaustive list.

#[derive(Default, Debug, Clone, Copy)]
pub struct Counters {
	pub serv_fails: u64,
	pub nx_domains: u64,
	pub no_errors: u64,

	// Latency histogram buckets, in answer-time milliseconds.
	pub answers_0_1ms: u64,
	pub answers_1_10ms: u64,
	pub answers_10_100ms: u64,
	pub answers_100ms_1s: u64,
	pub answers_slow: u64,

	pub outgoing_timeouts: u64,
	pub unreachables: u64,
	pub unexpected_count: u64,
	pub case_mismatch_count: u64,
	pub spoof_count: u64,
	pub resource_limits: u64,
	pub no_delegated: u64,
	pub throttled_queries: u64,
	pub chain_resends: u64,
	pub ns_set_invalidations: u64,
	pub edns_ping_matches: u64,
	pub edns_ping_mismatches: u64,
	pub qcounter: u64,
}

impl Counters {
	pub fn new() -> Self {
		Self::default()
	}

	/// Buckets a completed resolution's wall-clock latency into the
	/// histogram.
	pub fn record_latency(&mut self, millis: f64) {
		if millis < 1.0 {
			self.answers_0_1ms += 1;
		} else if millis < 10.0 {
			self.answers_1_10ms += 1;
		} else if millis < 100.0 {
			self.answers_10_100ms += 1;
		} else if millis < 1000.0 {
			self.answers_100ms_1s += 1;
		} else {
			self.answers_slow += 1;
		}
	}

	/// Folds another worker's counters into `self`; used by `broadcast_acc`
	/// to sum per-worker counters for external reporting.
	pub fn merge(&mut self, other: &Counters) {
		self.serv_fails += other.serv_fails;
		self.nx_domains += other.nx_domains;
		self.no_errors += other.no_errors;
		self.answers_0_1ms += other.answers_0_1ms;
		self.answers_1_10ms += other.answers_1_10ms;
		self.answers_10_100ms += other.answers_10_100ms;
		self.answers_100ms_1s += other.answers_100ms_1s;
		self.answers_slow += other.answers_slow;
		self.outgoing_timeouts += other.outgoing_timeouts;
		self.unreachables += other.unreachables;
		self.unexpected_count += other.unexpected_count;
		self.case_mismatch_count += other.case_mismatch_count;
		self.spoof_count += other.spoof_count;
		self.resource_limits += other.resource_limits;
		self.no_delegated += other.no_delegated;
		self.throttled_queries += other.throttled_queries;
		self.chain_resends += other.chain_resends;
		self.ns_set_invalidations += other.ns_set_invalidations;
		self.edns_ping_matches += other.edns_ping_matches;
		self.edns_ping_mismatches += other.edns_ping_mismatches;
		self.qcounter += other.qcounter;
	}
}
