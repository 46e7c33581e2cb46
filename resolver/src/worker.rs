//! Per-worker thread-local state and fleet coordination. `StaticStorage`
//! bundles everything a worker owns exclusively; the `Fleet` is the pipe
//! fabric other workers use to run a closure on a worker's own thread
//! instead of touching its state directly — no shared mutable state crosses
//! workers.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use crate::domain::DomainMapHandle;
use crate::edns::EdnsStatusTable;
use crate::ewma::NsSpeedTable;
use crate::model::LwResult;
use crate::negcache::NegCache;
use crate::poscache::{MemCache, PositiveCache};
use crate::scheduler::Scheduler;
use crate::stats::Counters;
use crate::throttle::Throttle;

/// A small ring buffer of recently-used upstream addresses, kept for
/// diagnostics, ported from PowerDNS's `RemoteKeeper`. `add_remote` preserves
/// the original's documented quirk: it silently does nothing if the ring has
/// zero capacity, rather than growing it.
pub struct RemoteKeeper {
	remotes: Vec<IpAddr>,
	pos: usize,
}

impl RemoteKeeper {
	pub fn new(capacity: usize) -> Self {
		Self { remotes: vec![IpAddr::from([0, 0, 0, 0]); capacity], pos: 0 }
	}

	/// Silently a no-op when the ring is empty — this is the preserved quirk,
	/// not a bug fix candidate.
	pub fn add_remote(&mut self, remote: IpAddr) {
		if self.remotes.is_empty() {
			return;
		}

		let idx = self.pos % self.remotes.len();
		self.remotes[idx] = remote;
		self.pos += 1;
	}

	pub fn recent(&self) -> &[IpAddr] {
		&self.remotes
	}
}

/// Everything one worker owns exclusively.
pub struct StaticStorage {
	pub negcache: NegCache,
	pub nsspeeds: NsSpeedTable,
	pub edns: EdnsStatusTable,
	pub throttle: Throttle<(IpAddr, String, u16)>,
	pub domainmap: DomainMapHandle,
	pub poscache: Box<dyn PositiveCache + Send>,
	pub scheduler: Scheduler<LwResult>,
	pub stats: Counters,
	pub remotes: RemoteKeeper,
}

impl StaticStorage {
	pub fn new(domainmap: DomainMapHandle, remote_ring: usize) -> Self {
		Self {
			negcache: NegCache::new(),
			nsspeeds: NsSpeedTable::new(),
			edns: EdnsStatusTable::new(),
			throttle: Throttle::new(0),
			domainmap,
			poscache: Box::new(MemCache::new()),
			scheduler: Scheduler::new(),
			stats: Counters::new(),
			remotes: RemoteKeeper::new(remote_ring),
		}
	}
}

type Job = Box<dyn FnOnce(&mut StaticStorage) + Send>;

/// The thread-local, shared-access handle a worker's fibers borrow through.
/// Never sent across a thread boundary; only built by [`WorkerHandle::spawn`]
/// on the worker's own thread.
pub type Shared = Rc<RefCell<StaticStorage>>;

/// One worker's end of the pipe fabric: a thread driving its own
/// `StaticStorage`, reachable from other workers only by sending it a job.
pub struct WorkerHandle {
	tx: Sender<Job>,
	join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
	/// Spawns a worker thread that builds its own `StaticStorage` via `build`
	/// and then runs `drive` against it until the handle (and its sender) are
	/// dropped. `StaticStorage` itself holds `Rc`-based single-threaded state
	/// (the scheduler's waiter table) and must never cross a thread boundary
	/// once built — only the `Send` factory closure does. `drive` receives a
	/// shared, `Rc<RefCell<_>>`-wrapped handle so it can hand clones to the
	/// fibers it spawns on `storage.scheduler`, which need their own access
	/// to the same caches between `wait_event` suspensions.
	pub fn spawn(
		build: impl FnOnce() -> StaticStorage + Send + 'static,
		mut drive: impl FnMut(&Shared, &Receiver<Job>) + Send + 'static,
	) -> Self {
		let (tx, rx) = mpsc::channel::<Job>();

		let join = std::thread::spawn(move || {
			let storage = Rc::new(RefCell::new(build()));
			drive(&storage, &rx)
		});

		Self { tx, join: Some(join) }
	}

	fn run(&self, job: Job) {
		// the receiving worker may have exited; a send error just means the
		// job is dropped, which is fine for best-effort fleet coordination
		let _ = self.tx.send(job);
	}
}

impl Drop for WorkerHandle {
	fn drop(&mut self) {
		if let Some(join) = self.join.take() {
			let _ = join.join();
		}
	}
}

/// Broadcast/distribute/broadcast_acc over a set of workers.
pub struct Fleet {
	workers: Vec<WorkerHandle>,
	next: usize,
}

impl Fleet {
	pub fn new(workers: Vec<WorkerHandle>) -> Self {
		Self { workers, next: 0 }
	}

	/// Runs `f` on every worker's thread, skipping the caller's own worker if
	/// `skip` names it.
	pub fn broadcast(&self, skip: Option<usize>, f: impl Fn(&mut StaticStorage) + Send + Sync + 'static) {
		let f = std::sync::Arc::new(f);

		for (i, worker) in self.workers.iter().enumerate() {
			if Some(i) == skip {
				continue;
			}

			let f = f.clone();
			worker.run(Box::new(move |storage| f(storage)));
		}
	}

	/// Picks one worker round-robin and runs `f` there.
	pub fn distribute(&mut self, f: impl FnOnce(&mut StaticStorage) + Send + 'static) {
		if self.workers.is_empty() {
			return;
		}

		let idx = self.next % self.workers.len();
		self.next += 1;
		self.workers[idx].run(Box::new(f));
	}

	/// Runs `f` on every worker and reduces the per-worker outputs into one
	/// total via `reduce`; used for `NsSpeedsSize`, `CacheSize`,
	/// `ConcurrentQueries`-style global counters.
	pub fn broadcast_acc<T: Send + 'static>(
		&self,
		f: impl Fn(&mut StaticStorage) -> T + Send + Sync + 'static,
		reduce: impl Fn(T, T) -> T,
		zero: T,
	) -> T {
		let f = std::sync::Arc::new(f);
		let (tx, rx) = mpsc::channel::<T>();

		for worker in &self.workers {
			let f = f.clone();
			let tx = tx.clone();
			worker.run(Box::new(move |storage| {
				let _ = tx.send(f(storage));
			}));
		}

		drop(tx);

		let mut total = zero;
		for _ in 0..self.workers.len() {
			if let Ok(value) = rx.recv() {
				total = reduce(total, value);
			}
		}

		total
	}

	pub fn len(&self) -> usize {
		self.workers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.workers.is_empty()
	}
}
