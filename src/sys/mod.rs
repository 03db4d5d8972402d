//! Platform-specific access to the readiness-wait primitive.
//!
//! This module exposes a unified view over the platform's `poll`:
//! - the raw entry type and its event bits,
//! - the genuine primitive, resolved once per process,
//! - the open-descriptor limit used to size backends.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;

pub use common::{Interest, RawPoll};
pub use platform::{
    DEFAULT_OPEN_LIMIT, Events, MAX_OPEN_LIMIT, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT,
    PollFd, RawFd, SysPoll,
};

pub(crate) use platform::{empty_pollfd, open_limit};

/// Returned bits that wake a reader.
pub(crate) const READ_READY: Events = POLLIN | POLLERR | POLLHUP | POLLNVAL;

/// Returned bits that wake a writer.
pub(crate) const WRITE_READY: Events = POLLOUT | POLLERR | POLLHUP | POLLNVAL;
