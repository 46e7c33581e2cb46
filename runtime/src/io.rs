//! Non-blocking, multi-socket poll reactor.
//!
//! This is the socket layer the resolution engine treats as an external
//! collaborator (it consumes a "send a query, receive a response"
//! primitive): a single `poll()` call services every registered socket and
//! hands received datagrams to a per-socket callback.

extern crate alloc;

use alloc::collections::VecDeque;
use core::cell::RefCell;
use core::time::Duration;
use std::io::{self, ErrorKind};

use collections::bytes::{Cursor, Slice};
use log::error;
use utils::error::*;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{c_void as BufType, poll, pollfd as Poll, recv, send, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use u8 as BufType;
	pub use windows_sys::Win32::Networking::WinSock::{
		recv, send, WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

pub use sys::AsRawFd;
use sys::*;

/// A callback invoked with each datagram read off a registered socket.
///
/// A cheap, clonable "deliver this value" handle, in the spirit of
/// `stakker::Fwd<Slice>`. Kept as a plain boxed closure here since the
/// resolver core drives its own scheduler rather than an actor mailbox.
pub struct Notify<T>(std::rc::Rc<dyn Fn(T)>);

impl<T> Clone for Notify<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}

impl<T> Notify<T> {
	pub fn new(f: impl Fn(T) + 'static) -> Self {
		Self(std::rc::Rc::new(f))
	}

	pub fn notify(&self, t: T) {
		(self.0)(t)
	}
}

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

fn ret_to_err(val: isize) -> Result<Option<usize>> {
	match TryInto::<usize>::try_into(val) {
		Ok(n) => Ok(Some(n)),
		Err(_) => {
			let err = io::Error::last_os_error();

			if matches!(err.kind(), ErrorKind::WouldBlock) {
				return Ok(None);
			}

			error!("I/O operation failed: {err}");
			Err(())
		}
	}
}

fn send(fd: RawFd, buf: &[u8]) -> Result<bool> {
	let r = unsafe { sys::send(fd, buf.as_ptr() as *mut BufType, buf.len() as _, 0) };

	if let Some(n) = ret_to_err(r as _)? {
		if n != buf.len() {
			error!("Only sent {}/{} bytes to socket", n, buf.len());
			return Err(());
		}

		Ok(true)
	} else {
		Ok(false)
	}
}

fn recv(fd: RawFd, buf: &mut Slice) -> Result<bool> {
	let r = unsafe { sys::recv(fd, buf.as_mut_ptr() as *mut BufType, buf.len() as _, 0) };

	if let Some(n) = ret_to_err(r as _)? {
		buf.truncate(n);
		Ok(true)
	} else {
		Ok(false)
	}
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new()
		})
	};
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Entry>,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	fn idx_of<T: AsRawFd>(&mut self, socket: &T) -> usize {
		let raw = as_raw(socket);
		self.fds.iter().position(|f| f.fd == raw).expect("Socket is present")
	}

	/// Returns whether any more I/O is waiting.
	pub fn is_io() -> bool {
		Self::with(|s| !s.fds.is_empty())
	}

	/// Poll the fds. Returns whether any file descriptors were ready for I/O.
	pub fn poll(timeout: Option<Duration>) -> Result<bool> {
		Self::with(|s| {
			let ret = unsafe {
				sys::poll(
					s.fds.as_mut_ptr(),
					s.fds.len().try_into().expect("Fewer than u32::MAX fds"),
					as_timeout(timeout),
				)
			};

			let mut pending: u32 = ret.try_into().map_err(|_| error!("poll() failed: {}", io::Error::last_os_error()))?;

			if pending == 0 {
				return Ok(false);
			}

			for idx in 0..s.fds.len() {
				let Poll { fd, events, revents } = &mut s.fds[idx];
				let entry = &mut s.entries[idx];

				if *revents == 0 {
					continue;
				}

				if *revents & POLLERR != 0 {
					error!("Socket error while polling");
					return Err(());
				}

				if *revents & POLLHUP != 0 {
					error!("Socket hangup");
					return Err(());
				}

				if *revents & POLLNVAL != 0 {
					error!("Socket invalid");
					return Err(());
				}

				if *revents & POLLIN != 0 {
					entry.flush_read(*fd)?;
				}

				if *revents & POLLOUT != 0 {
					entry.flush_write(*fd)?;
				};

				*events = POLLIN;

				if !entry.queue.is_empty() {
					*events |= POLLOUT;
				}

				*revents = 0;

				pending -= 1;

				if pending == 0 {
					break;
				}
			}

			Ok(true)
		})
	}
}

struct Entry {
	notify: Notify<Slice>,
	queue: VecDeque<Box<[u8]>>,
}

impl Entry {
	fn flush_read(&mut self, fd: RawFd) -> Result {
		let mut buf = Slice::new(1500);

		while recv(fd, &mut buf)? {
			self.notify.notify(buf);
			buf = Slice::new(1500);
		}

		Ok(())
	}

	fn flush_write(&mut self, fd: RawFd) -> Result {
		assert!(!self.queue.is_empty());

		loop {
			let Some(buf) = self.queue.back_mut() else { return Ok(()) };

			if !send(fd, buf)? {
				return Ok(());
			}

			self.queue.pop_back();
		}
	}
}

/// A registered, non-blocking socket. Dropping it deregisters the fd.
pub struct Io<T: AsRawFd> {
	inner: T,
}

impl<T: AsRawFd> Io<T> {
	pub fn new(inner: T, notify: Notify<Slice>) -> Self {
		State::with(|i| {
			i.fds.push(Poll { fd: as_raw(&inner), events: POLLIN, revents: 0 });
			i.entries.push(Entry { notify, queue: VecDeque::new() });
		});

		Self { inner }
	}

	pub fn write<X>(&self, f: impl FnOnce(Cursor) -> X) -> Result<X> {
		let mut vec = vec![0; 1500];
		let res = Cursor::vec(&mut vec, f);

		if !send(as_raw(&self.inner), &mut vec)? {
			State::with(|i| {
				let idx = i.idx_of(&self.inner);
				i.entries[idx].queue.push_front(vec.into_boxed_slice());
				i.fds[idx].events |= POLLOUT;
			});
		}

		Ok(res)
	}

	pub fn inner(&self) -> &T {
		&self.inner
	}
}

impl<T: AsRawFd> Drop for Io<T> {
	fn drop(&mut self) {
		State::with(|i| {
			let idx = i.idx_of(&self.inner);
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		})
	}
}

/// Poll every registered socket once, with the given timeout. Returns whether any were ready.
pub fn poll(timeout: Option<Duration>) -> Result<bool> {
	State::poll(timeout)
}

/// Whether any sockets are currently registered.
pub fn is_io() -> bool {
	State::is_io()
}
