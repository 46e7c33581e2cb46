use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::trace;
use utils::error::Result;

use crate::io;

static EXIT: AtomicBool = AtomicBool::new(false);

/// Request that the next call to [`run`] exit its loop once its exit hook runs.
pub fn request_exit() {
	EXIT.store(true, Ordering::Relaxed);
}

fn exit_requested() -> bool {
	EXIT.load(Ordering::Relaxed)
}

/// Installs a Ctrl+C handler that calls [`request_exit`].
pub fn install_ctrlc() -> Result {
	ctrlc::set_handler(|| EXIT.store(true, Ordering::Relaxed)).map_err(|err| log::error!("Error occurred while setting Ctrl+C handler: {err}"))
}

/// Opaque handle to a scheduled timer, usable to cancel it before it fires.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerKey(u64);

/// A single-worker timer wheel. Every wait-with-deadline in the resolver
/// (the scheduler's `wait_event` timeout, the EDNS re-probe cooldown) goes
/// through here rather than spawning an OS timer per wait.
#[derive(Default)]
pub struct Timers {
	heap: BinaryHeap<Reverse<(Instant, u64)>>,
	callbacks: HashMap<u64, Box<dyn FnOnce()>>,
	next_id: u64,
}

impl Timers {
	pub fn new() -> Self {
		Self::default()
	}

	/// Schedule `callback` to run at `at`. Returns a key that can cancel it.
	pub fn after(&mut self, at: Instant, callback: impl FnOnce() + 'static) -> TimerKey {
		let id = self.next_id;
		self.next_id += 1;

		self.heap.push(Reverse((at, id)));
		self.callbacks.insert(id, Box::new(callback));

		TimerKey(id)
	}

	/// Cancel a previously scheduled timer. A no-op if it already fired.
	pub fn cancel(&mut self, key: TimerKey) {
		self.callbacks.remove(&key.0);
	}

	/// How long until the next timer is due, or `None` if none are scheduled.
	pub fn next_wait(&self, now: Instant) -> Option<Duration> {
		let Reverse((at, _)) = self.heap.peek()?;
		Some(at.saturating_duration_since(now))
	}

	/// Run every timer whose deadline has passed.
	pub fn fire_due(&mut self, now: Instant) {
		while let Some(&Reverse((at, id))) = self.heap.peek() {
			if at > now {
				break;
			}

			self.heap.pop();

			if let Some(cb) = self.callbacks.remove(&id) {
				cb();
			}
		}
	}
}

/// Drive the worker loop: poll registered sockets, fire due timers, and give
/// `tick` a chance to run scheduler work between I/O events. `tick` returns
/// whether it has more runnable work pending, which keeps the poll
/// non-blocking while there's still CPU-bound work to get through.
pub fn run(timers: &mut Timers, mut tick: impl FnMut(Instant) -> bool, exit_fn: impl FnOnce()) -> Result {
	let mut t = Instant::now();
	let mut idle_pending = tick(t);

	loop {
		if exit_requested() {
			exit_fn();
			tick(Instant::now());
			break;
		}

		let timeout = if idle_pending { Some(Duration::from_secs(0)) } else { timers.next_wait(t) };

		if timeout.is_none() && !io::is_io() {
			break;
		}

		trace!("idle_pending: {idle_pending}, timeout: {timeout:?}");

		let Ok(is_io) = io::poll(timeout) else {
			request_exit();
			continue;
		};

		t = Instant::now();
		timers.fire_due(t);
		idle_pending = tick(t) && !is_io;
	}

	Ok(())
}
