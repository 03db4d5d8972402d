//! Unix platform layer: `pollfd` entries, the open-descriptor limit and the
//! one-time resolution of the genuine `poll(2)`.

use libc::{RLIM_INFINITY, RLIMIT_NOFILE, c_int, nfds_t, pollfd, rlimit};
use std::io;
use std::sync::OnceLock;
use tracing::{debug, error, warn};

use super::common::RawPoll;
use crate::error::{Error, Result};

pub type RawFd = std::os::fd::RawFd;

/// One raw readiness-query entry.
pub type PollFd = pollfd;

/// Requested/returned event bits of a [`PollFd`].
pub type Events = libc::c_short;

pub const POLLIN: Events = libc::POLLIN;
pub const POLLOUT: Events = libc::POLLOUT;
pub const POLLERR: Events = libc::POLLERR;
pub const POLLHUP: Events = libc::POLLHUP;
pub const POLLNVAL: Events = libc::POLLNVAL;

/// Descriptor stored in vacant entries; `poll` ignores negative descriptors.
pub(crate) const INVALID_FD: RawFd = -1;

/// Capacity used when the descriptor limit is unbounded or unreadable.
pub const DEFAULT_OPEN_LIMIT: usize = 1024;

/// Upper bound on the capacity derived from the descriptor limit.
pub const MAX_OPEN_LIMIT: usize = 1 << 20;

/// Returns a vacant entry.
pub(crate) fn empty_pollfd() -> PollFd {
    pollfd {
        fd: INVALID_FD,
        events: 0,
        revents: 0,
    }
}

type PollFn = unsafe extern "C" fn(*mut pollfd, nfds_t, c_int) -> c_int;

/// The resolved system `poll`, shared by every backend in the process.
static SYS_POLL: OnceLock<Option<PollFn>> = OnceLock::new();

/// Locates `poll` in the objects loaded after this one, skipping any `poll`
/// the process defines itself to intercept blocking calls.
#[cfg(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
))]
fn lookup_poll() -> Option<PollFn> {
    let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, c"poll".as_ptr()) };
    if sym.is_null() {
        return None;
    }

    Some(unsafe { std::mem::transmute::<*mut libc::c_void, PollFn>(sym) })
}

/// Direct binding on targets without `RTLD_NEXT`.
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
fn lookup_poll() -> Option<PollFn> {
    Some(libc::poll as PollFn)
}

fn resolve_poll() -> Option<PollFn> {
    *SYS_POLL.get_or_init(|| {
        let resolved = lookup_poll();
        if resolved.is_some() {
            debug!("resolved system poll");
        }
        resolved
    })
}

/// The genuine system `poll`.
#[derive(Debug, Clone, Copy)]
pub struct SysPoll {
    poll: PollFn,
}

impl SysPoll {
    /// Resolves the system `poll` on first use; later calls reuse the result.
    ///
    /// # Errors
    ///
    /// [`Error::HookUnresolved`] if the symbol cannot be found. The backend
    /// cannot work without it.
    pub fn resolve() -> Result<Self> {
        match resolve_poll() {
            Some(poll) => Ok(Self { poll }),
            None => {
                error!("system poll could not be resolved");
                Err(Error::HookUnresolved)
            }
        }
    }
}

impl RawPoll for SysPoll {
    fn poll(&mut self, fds: &mut [PollFd], timeout_ms: i32) -> io::Result<usize> {
        let n = unsafe { (self.poll)(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

/// Returns the open-descriptor limit, raising the soft limit to the hard
/// limit first when the hard limit is finite.
///
/// The value returned is also installed as the soft limit, so no descriptor
/// the process can open falls outside the slots sized from it. An unbounded
/// limit becomes [`DEFAULT_OPEN_LIMIT`] and anything above [`MAX_OPEN_LIMIT`]
/// is capped. If the soft limit cannot be lowered to match, a warning is
/// logged and registrations past the returned capacity fail with
/// `Error::CapacityExhausted`.
pub(crate) fn open_limit() -> usize {
    let mut rl = rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    if unsafe { libc::getrlimit(RLIMIT_NOFILE, &mut rl) } < 0 {
        warn!(
            error = %io::Error::last_os_error(),
            "getrlimit(RLIMIT_NOFILE) failed, using default"
        );
        return DEFAULT_OPEN_LIMIT;
    }

    if rl.rlim_max != RLIM_INFINITY && rl.rlim_cur < rl.rlim_max {
        let hard = rl.rlim_max;
        set_soft_limit(&mut rl, hard);
    }

    let limit = if rl.rlim_cur == RLIM_INFINITY {
        DEFAULT_OPEN_LIMIT
    } else {
        usize::try_from(rl.rlim_cur)
            .unwrap_or(MAX_OPEN_LIMIT)
            .clamp(1, MAX_OPEN_LIMIT)
    };

    if rl.rlim_cur == RLIM_INFINITY || rl.rlim_cur > limit as libc::rlim_t {
        set_soft_limit(&mut rl, limit as libc::rlim_t);
    }

    limit
}

/// Installs `soft` as the `RLIMIT_NOFILE` soft limit, updating `rl` on
/// success.
fn set_soft_limit(rl: &mut rlimit, soft: libc::rlim_t) {
    let wanted = rlimit {
        rlim_cur: soft,
        rlim_max: rl.rlim_max,
    };

    if unsafe { libc::setrlimit(RLIMIT_NOFILE, &wanted) } == 0 {
        rl.rlim_cur = soft;
    } else {
        warn!(
            soft = rl.rlim_cur,
            wanted = soft,
            hard = rl.rlim_max,
            error = %io::Error::last_os_error(),
            "unable to change the descriptor soft limit"
        );
    }
}
