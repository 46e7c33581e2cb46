//! The cooperative fiber multiplexer, grounded on PowerDNS's `MTasker`. The
//! original is a stackful ucontext-based fiber runtime; a stackless
//! continuation works just as well, which is exactly what Rust's native
//! `async`/`await` desugars to. Rather than pull in an async runtime, this
//! is a tiny hand-rolled single-threaded executor: `schedule()` is the
//! "drive one step" the I/O loop calls, played against a no-op `Waker`
//! since there is never a second executor to wake from.
//!
//! Fibers suspend only inside [`WaitEvent`], which mirrors `wait_event`.
//! Chaining (merging a duplicate in-flight question) is `register_or_chain`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::packet_id::{Birthday, PacketId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventStatus<V> {
	Delivered(V),
	Timeout,
	Cancelled,
}

struct SlotState<V> {
	/// The id of the primary (first) waiter on this birthday — the only
	/// other id allowed to satisfy the wait is one in `chain`.
	primary_id: u16,
	chain: Vec<u16>,
	deadline: f64,
	outcome: Option<EventStatus<V>>,
	/// How many chained waiters still need to consume `outcome` before the
	/// slot can be dropped. Set once `outcome` is first assigned.
	remaining: usize,
	near_misses: u32,
}

struct SchedulerState<V> {
	waiters: HashMap<Birthday, SlotState<V>>,
}

impl<V: Clone> SchedulerState<V> {
	fn sweep_timeouts(&mut self, now: f64) {
		for slot in self.waiters.values_mut() {
			if slot.outcome.is_none() && now > slot.deadline {
				slot.remaining = 1 + slot.chain.len();
				slot.outcome = Some(EventStatus::Timeout);
			}
		}
	}
}

/// A cloneable, `Rc`-backed reference to the scheduler's waiter table —
/// what `async_resolve` actually holds onto, since it needs to register a
/// wait and later await it from inside a spawned future.
#[derive(Clone)]
pub struct SchedulerHandle<V> {
	state: Rc<RefCell<SchedulerState<V>>>,
}

impl<V: Clone> SchedulerHandle<V> {
	/// Attempts to merge `key` onto an already-waiting fiber with the same
	/// (peer, qname, qtype). Returns `true` if merged
	/// — the caller must not send a new packet — or `false` if this is a
	/// fresh primary wait the caller must now dispatch a query for.
	pub fn register_or_chain(&self, key: &PacketId, deadline: f64) -> bool {
		let mut state = self.state.borrow_mut();
		let birthday = key.birthday();

		match state.waiters.get_mut(&birthday) {
			Some(slot) => {
				slot.chain.push(key.id);
				true
			}
			None => {
				state.waiters.insert(birthday, SlotState { primary_id: key.id, chain: Vec::new(), deadline, outcome: None, remaining: 0, near_misses: 0 });
				false
			}
		}
	}

	/// Suspends until a matching event is delivered, the deadline passes, or
	/// the key is cancelled.
	pub fn wait_event(&self, key: &PacketId) -> WaitEvent<V> {
		WaitEvent { state: self.state.clone(), birthday: key.birthday(), consumed: false }
	}

	/// Delivers `payload` to the fiber(s) chained on `birthday`, but only if
	/// `id` matches the primary waiter's id or one of the chained ids —
	/// otherwise this is a spoof or a stray reply and the slot is left
	/// waiting with `near_misses` bumped. Returns the number of fibers woken
	/// (0 if there was no slot, it was already resolved, or `id` didn't
	/// match).
	pub fn send_event(&self, birthday: &Birthday, id: u16, payload: V) -> usize {
		let mut state = self.state.borrow_mut();

		match state.waiters.get_mut(birthday) {
			Some(slot) if slot.outcome.is_none() => {
				if id == slot.primary_id || slot.chain.contains(&id) {
					let count = 1 + slot.chain.len();
					slot.remaining = count;
					slot.outcome = Some(EventStatus::Delivered(payload));
					count
				} else {
					slot.near_misses += 1;
					0
				}
			}
			_ => 0,
		}
	}

	/// Explicit cancellation, e.g. when the I/O loop closes the socket a
	/// waiter's fd referred to.
	pub fn cancel(&self, birthday: &Birthday) {
		if let Some(slot) = self.state.borrow_mut().waiters.get_mut(birthday) {
			if slot.outcome.is_none() {
				slot.remaining = 1 + slot.chain.len();
				slot.outcome = Some(EventStatus::Cancelled);
			}
		}
	}

	pub fn near_misses(&self, birthday: &Birthday) -> u32 {
		self.state.borrow().waiters.get(birthday).map(|s| s.near_misses).unwrap_or(0)
	}

	pub fn waiting(&self) -> usize {
		self.state.borrow().waiters.len()
	}
}

/// The future a fiber awaits at its single suspension point.
pub struct WaitEvent<V> {
	state: Rc<RefCell<SchedulerState<V>>>,
	birthday: Birthday,
	consumed: bool,
}

impl<V: Clone> Future for WaitEvent<V> {
	type Output = EventStatus<V>;

	fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		assert!(!this.consumed, "WaitEvent polled again after completion");

		let mut state = this.state.borrow_mut();

		let Some(slot) = state.waiters.get_mut(&this.birthday) else {
			return Poll::Pending;
		};

		let Some(outcome) = slot.outcome.clone() else {
			return Poll::Pending;
		};

		slot.remaining -= 1;
		if slot.remaining == 0 {
			state.waiters.remove(&this.birthday);
		}

		this.consumed = true;
		Poll::Ready(outcome)
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

fn noop_waker() -> Waker {
	unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// The single-threaded task list driving spawned fibers.
pub struct Scheduler<V> {
	state: Rc<RefCell<SchedulerState<V>>>,
	tasks: Vec<Pin<Box<dyn Future<Output = ()>>>>,
}

impl<V: Clone + 'static> Scheduler<V> {
	pub fn new() -> Self {
		Self { state: Rc::new(RefCell::new(SchedulerState { waiters: HashMap::new() })), tasks: Vec::new() }
	}

	pub fn handle(&self) -> SchedulerHandle<V> {
		SchedulerHandle { state: self.state.clone() }
	}

	/// Queues a new fiber. Fails only by panicking on allocation failure,
	/// matching PowerDNS's "fails only on stack-allocation exhaustion, fatal
	/// to the worker" behavior.
	pub fn make_thread(&mut self, entry_point: impl Future<Output = ()> + 'static) {
		self.tasks.push(Box::pin(entry_point));
	}

	/// Drives every runnable fiber one step. Returns whether any fiber is
	/// still runnable/waiting.
	pub fn schedule(&mut self, now: f64) -> bool {
		self.state.borrow_mut().sweep_timeouts(now);

		let waker = noop_waker();
		let mut cx = Context::from_waker(&waker);

		self.tasks.retain_mut(|task| task.as_mut().poll(&mut cx).is_pending());

		!self.tasks.is_empty()
	}

	pub fn pending_fibers(&self) -> usize {
		self.tasks.len()
	}
}

impl<V: Clone + 'static> Default for Scheduler<V> {
	fn default() -> Self {
		Self::new()
	}
}
