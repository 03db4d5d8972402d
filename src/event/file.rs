use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::Event;
use crate::sys::{Interest, RawFd};

/// Shared handle to a registration record.
///
/// The hook layer owns records through this handle; backends only keep weak
/// references to them.
pub type FileEventRef = Rc<RefCell<FileEvent>>;

/// Readiness callback. Receives the backend running the dispatch, so it can
/// register or deregister descriptors, and the record that became ready.
pub type Handler = dyn FnMut(&mut dyn Event, &FileEventRef);

pub(crate) type SharedHandler = Rc<RefCell<Handler>>;

/// Registration record of one descriptor.
///
/// A record is created by the hook layer on the first I/O interest for a
/// descriptor and tracks which slot of the backend it occupies. A record is
/// registered exactly when [`id`](Self::id) returns `Some`.
pub struct FileEvent {
    pub(crate) fd: RawFd,
    pub(crate) id: Option<usize>,
    pub(crate) mask: Interest,
    pub(crate) r_proc: Option<SharedHandler>,
    pub(crate) w_proc: Option<SharedHandler>,
}

impl FileEvent {
    /// Creates an unregistered record for `fd`.
    pub fn new(fd: RawFd) -> FileEventRef {
        Rc::new(RefCell::new(Self {
            fd,
            id: None,
            mask: Interest::NONE,
            r_proc: None,
            w_proc: None,
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Slot currently held in the backend, `None` when unregistered.
    ///
    /// Slots move when other records are deregistered; never keep this value
    /// across a deregistration.
    pub fn id(&self) -> Option<usize> {
        self.id
    }

    /// Interests currently registered.
    pub fn mask(&self) -> Interest {
        self.mask
    }

    /// Sets the callback run when the descriptor becomes readable.
    pub fn set_read_proc<F>(&mut self, f: F)
    where
        F: FnMut(&mut dyn Event, &FileEventRef) + 'static,
    {
        self.r_proc = Some(Rc::new(RefCell::new(f)));
    }

    /// Sets the callback run when the descriptor becomes writable.
    pub fn set_write_proc<F>(&mut self, f: F)
    where
        F: FnMut(&mut dyn Event, &FileEventRef) + 'static,
    {
        self.w_proc = Some(Rc::new(RefCell::new(f)));
    }

    pub fn clear_read_proc(&mut self) {
        self.r_proc = None;
    }

    pub fn clear_write_proc(&mut self) {
        self.w_proc = None;
    }
}

impl fmt::Debug for FileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEvent")
            .field("fd", &self.fd)
            .field("id", &self.id)
            .field("mask", &self.mask)
            .field("r_proc", &self.r_proc.is_some())
            .field("w_proc", &self.w_proc.is_some())
            .finish()
    }
}
