use std::time::{Instant, SystemTime};

/// A monotonic clock paired with the wall-clock time it started at.
///
/// Caches and EWMAs need both: a monotonic instant for measuring elapsed
/// time (which can't jump backwards), and a wall-clock time for computing
/// absolute expiries (`ttd`) that make sense to log and compare across
/// restarts. Rather than calling `SystemTime::now()` on every lookup (which
/// can jump if NTP steps the clock), the wall-clock value is derived from
/// the monotonic delta since startup, the way `stakker::Core`'s time
/// helpers did.
#[derive(Clone, Copy)]
pub struct Clock {
	start_instant: Instant,
	start_system: SystemTime,
}

impl Clock {
	pub fn new() -> Self {
		Self { start_instant: Instant::now(), start_system: SystemTime::now() }
	}

	/// The current monotonic instant.
	pub fn now(&self) -> Instant {
		Instant::now()
	}

	/// Seconds elapsed since this clock was created, as a monotonic `f64`.
	///
	/// Useful to callers (EWMA decay, throttle sweeps) that want a plain
	/// number to subtract rather than threading `Instant`s around.
	pub fn elapsed_secs(&self) -> f64 {
		Instant::now().saturating_duration_since(self.start_instant).as_secs_f64()
	}

	/// The current wall-clock time, derived from the monotonic delta since startup.
	pub fn system(&self) -> SystemTime {
		let dur = Instant::now().saturating_duration_since(self.start_instant);
		self.start_system + dur
	}

	/// The current UNIX time in seconds, saturating rather than panicking on overflow.
	pub fn unix(&self) -> u32 {
		let unix = self.system().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();

		unix.as_secs().try_into().unwrap_or(u32::MAX)
	}
}

impl Default for Clock {
	fn default() -> Self {
		Self::new()
	}
}
