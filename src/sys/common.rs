use std::io;

use super::platform::PollFd;

/// Read/write interest of a registration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    /// Returns `true` when neither side is wanted.
    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// The readiness-wait primitive the backend drives.
///
/// [`SysPoll`](super::SysPoll) calls the genuine system `poll`; other
/// implementations exist to script readiness in tests or to route the call
/// through a different binding.
pub trait RawPoll {
    /// Waits on `fds` for at most `timeout_ms` milliseconds (`-1` blocks,
    /// `0` returns immediately) and fills each entry's returned bits.
    ///
    /// Returns the number of entries with non-zero returned bits. An
    /// interrupted call must be reported as [`io::ErrorKind::Interrupted`].
    fn poll(&mut self, fds: &mut [PollFd], timeout_ms: i32) -> io::Result<usize>;
}
