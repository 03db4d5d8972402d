//! Windows platform layer.
//!
//! Winsock exports `WSAPoll` without any interposition mechanism, so the
//! genuine primitive is bound directly at compile time.

use std::io;
use std::mem;
use std::sync::OnceLock;
use tracing::error;

use windows_sys::Win32::Networking::WinSock::{
    self, INVALID_SOCKET, SOCKET, SOCKET_ERROR, WSADATA, WSAPOLLFD, WSAPoll, WSAStartup,
};

use super::common::RawPoll;
use crate::error::{Error, Result};

pub type RawFd = SOCKET;

/// One raw readiness-query entry.
pub type PollFd = WSAPOLLFD;

/// Requested/returned event bits of a [`PollFd`].
pub type Events = i16;

pub const POLLIN: Events = WinSock::POLLIN as Events;
pub const POLLOUT: Events = WinSock::POLLOUT as Events;
pub const POLLERR: Events = WinSock::POLLERR as Events;
pub const POLLHUP: Events = WinSock::POLLHUP as Events;
pub const POLLNVAL: Events = WinSock::POLLNVAL as Events;

/// Descriptor stored in vacant entries; `WSAPoll` ignores it.
pub(crate) const INVALID_FD: RawFd = INVALID_SOCKET;

/// Capacity used when no descriptor limit applies.
pub const DEFAULT_OPEN_LIMIT: usize = 1024;

/// Capacity of every backend on Windows, which has no per-process socket limit.
pub const MAX_OPEN_LIMIT: usize = 1 << 16;

/// Returns a vacant entry.
pub(crate) fn empty_pollfd() -> PollFd {
    WSAPOLLFD {
        fd: INVALID_FD,
        events: 0,
        revents: 0,
    }
}

/// Creates a MAKEWORD value for Winsock version.
#[inline]
const fn makeword(low: u8, high: u8) -> u16 {
    ((high as u16) << 8) | (low as u16)
}

/// Winsock start-up result, shared by every backend in the process.
static WINSOCK: OnceLock<bool> = OnceLock::new();

fn ensure_winsock() -> bool {
    *WINSOCK.get_or_init(|| unsafe {
        let mut data: WSADATA = mem::zeroed();
        let rc = WSAStartup(makeword(2, 2), &mut data as *mut _);
        if rc != 0 {
            error!(rc, "WSAStartup failed");
        }
        rc == 0
    })
}

/// The genuine `WSAPoll`.
#[derive(Debug, Clone, Copy)]
pub struct SysPoll {
    _private: (),
}

impl SysPoll {
    /// Initializes Winsock on first use.
    ///
    /// # Errors
    ///
    /// [`Error::HookUnresolved`] if Winsock cannot be started.
    pub fn resolve() -> Result<Self> {
        if ensure_winsock() {
            Ok(Self { _private: () })
        } else {
            Err(Error::HookUnresolved)
        }
    }
}

impl RawPoll for SysPoll {
    fn poll(&mut self, fds: &mut [PollFd], timeout_ms: i32) -> io::Result<usize> {
        let rc = unsafe { WSAPoll(fds.as_mut_ptr(), fds.len() as u32, timeout_ms) };
        if rc == SOCKET_ERROR {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }
}

pub(crate) fn open_limit() -> usize {
    MAX_OPEN_LIMIT
}
