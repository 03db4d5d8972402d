//! # Cadentis Poll
//!
//! **cadentis-poll** is the `poll(2)` event backend of the Cadentis fiber
//! runtime. Fibers issue ordinary blocking calls; the runtime's hook layer
//! turns a call that would block into a read or write interest on a
//! [`FileEvent`], parks the fiber, and lets the scheduler loop wait on the
//! backend until the descriptor is ready.
//!
//! The backend offers:
//!
//! - A **uniform contract**, [`Event`], shared with the other event backends
//! - **Dense slot storage** sized once from the open-descriptor limit, with
//!   O(1) removal by swapping the last slot into the freed one
//! - **Hook-safe waits**: the genuine system `poll` is resolved once per
//!   process past any `poll` the process intercepts itself
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadentis_poll::{Event, FileEvent, PollEvent};
//! use std::time::Duration;
//!
//! let mut ev = PollEvent::create(0)?;
//!
//! let fe = FileEvent::new(fd);
//! fe.borrow_mut().set_read_proc(|ev, fe| {
//!     // Resume the parked fiber, then drop the interest.
//!     ev.del_read(fe).unwrap();
//! });
//! ev.add_read(&fe)?;
//!
//! loop {
//!     ev.wait(Some(Duration::from_millis(100)))?;
//! }
//! ```
//!
//! ## Errors
//!
//! Every [`Error`] is unrecoverable: the multiplexer is unusable or a
//! registry invariant was broken. Interrupted waits are absorbed and reported
//! as zero ready descriptors.

mod error;
mod event;
mod sys;

pub use error::{Error, Result};
pub use event::{Event, FileEvent, FileEventRef, Handler, PollBuilder, PollEvent, create_poll};
pub use sys::{
    DEFAULT_OPEN_LIMIT, Events, Interest, MAX_OPEN_LIMIT, POLLERR, POLLHUP, POLLIN, POLLNVAL,
    POLLOUT, PollFd, RawFd, RawPoll, SysPoll,
};
