//! `poll(2)` backend.
//!
//! Registered descriptors live in two parallel arrays sized once at creation:
//! the raw `pollfd` entries handed to the kernel and weak references to the
//! records that own them. Slots `0..count` are active; a removed slot is
//! filled by the last active one so the active range stays dense.

use std::cell::RefCell;
use std::io;
use std::ptr;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, error, trace};

use super::file::{FileEvent, FileEventRef, SharedHandler};
use super::{Event, PollBuilder};
use crate::error::{Error, Result};
use crate::sys::{
    Events, Interest, POLLIN, POLLOUT, PollFd, READ_READY, RawFd, RawPoll, SysPoll, WRITE_READY,
    empty_pollfd,
};

/// Event backend over the readiness-wait primitive `P`.
///
/// A backend is driven by a single scheduler loop; it is neither `Send` nor
/// `Sync`.
pub struct PollEvent<P = SysPoll> {
    /// The primitive called by [`wait`](Event::wait).
    poller: P,

    /// Number of slots, fixed at creation.
    capacity: usize,

    /// Number of active slots.
    count: usize,

    /// Raw entries passed to the primitive; `pfds[..count]` are active.
    pfds: Vec<PollFd>,

    /// Records owning each slot, indexed like `pfds`.
    files: Vec<Option<Weak<RefCell<FileEvent>>>>,
}

impl PollEvent {
    /// Creates a backend over the system `poll`.
    ///
    /// The suggested size is ignored: capacity always comes from the
    /// open-descriptor limit, so the arrays never need to grow.
    ///
    /// # Errors
    ///
    /// [`Error::HookUnresolved`] if the system `poll` cannot be resolved.
    pub fn create(size_hint: usize) -> Result<Self> {
        let ev = PollBuilder::new().build()?;
        debug!(size_hint, capacity = ev.capacity, "poll backend created");
        Ok(ev)
    }
}

impl<P: RawPoll> PollEvent<P> {
    pub(crate) fn with_capacity(poller: P, capacity: usize) -> Self {
        Self {
            poller,
            capacity,
            count: 0,
            pfds: vec![empty_pollfd(); capacity],
            files: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Descriptor held by an active slot.
    pub fn fd_at(&self, slot: usize) -> Option<RawFd> {
        (slot < self.count).then(|| self.pfds[slot].fd as RawFd)
    }

    /// Requested event bits of an active slot.
    pub fn events_at(&self, slot: usize) -> Option<Events> {
        (slot < self.count).then(|| self.pfds[slot].events)
    }

    /// Record owning an active slot.
    pub fn record_at(&self, slot: usize) -> Option<FileEventRef> {
        if slot < self.count {
            self.files[slot].as_ref().and_then(Weak::upgrade)
        } else {
            None
        }
    }

    fn record(&self, slot: usize) -> Result<FileEventRef> {
        self.record_at(slot).ok_or_else(|| {
            error!(slot, "active slot refers to a dropped record");
            Error::StaleRecord { slot }
        })
    }

    fn owns(&self, slot: usize, fe: &FileEventRef) -> bool {
        self.files[slot]
            .as_ref()
            .is_some_and(|w| ptr::eq(w.as_ptr(), Rc::as_ptr(fe)))
    }

    fn add(&mut self, fe: &FileEventRef, interest: Interest) -> Result<()> {
        let mut rec = fe.borrow_mut();

        let slot = match rec.id {
            Some(slot) if slot < self.count => slot,
            Some(slot) => {
                error!(fd = rec.fd, slot, count = self.count, "record names an inactive slot");
                return Err(Error::SlotOutOfRange {
                    slot,
                    count: self.count,
                    fd: rec.fd,
                });
            }
            None => {
                if self.count >= self.capacity {
                    error!(fd = rec.fd, capacity = self.capacity, "poll slots exhausted");
                    return Err(Error::CapacityExhausted {
                        capacity: self.capacity,
                        fd: rec.fd,
                    });
                }

                let slot = self.count;
                self.count += 1;
                rec.id = Some(slot);
                slot
            }
        };

        if self.pfds[slot].events & (POLLIN | POLLOUT) != 0 {
            if !self.owns(slot, fe) {
                error!(fd = rec.fd, slot, "slot is owned by another record");
                return Err(Error::SlotMismatch { slot, fd: rec.fd });
            }
        } else {
            let mut pfd = empty_pollfd();
            pfd.fd = rec.fd as _;
            self.pfds[slot] = pfd;
            self.files[slot] = Some(Rc::downgrade(fe));
            trace!(fd = rec.fd, slot, "slot assigned");
        }

        self.pfds[slot].events |= requested(interest);
        rec.mask.read |= interest.read;
        rec.mask.write |= interest.write;

        Ok(())
    }

    fn del(&mut self, fe: &FileEventRef, interest: Interest) -> Result<()> {
        let mut rec = fe.borrow_mut();

        let slot = match rec.id {
            Some(slot) if slot < self.count => slot,
            Some(slot) => {
                error!(fd = rec.fd, slot, count = self.count, "record names an inactive slot");
                return Err(Error::SlotOutOfRange {
                    slot,
                    count: self.count,
                    fd: rec.fd,
                });
            }
            None => {
                error!(fd = rec.fd, "deregistering an unregistered record");
                return Err(Error::NotRegistered { fd: rec.fd });
            }
        };

        if !self.owns(slot, fe) {
            error!(fd = rec.fd, slot, "slot is owned by another record");
            return Err(Error::SlotMismatch { slot, fd: rec.fd });
        }

        let last = self.count - 1;
        let remaining = self.pfds[slot].events & !requested(interest) & (POLLIN | POLLOUT);

        // Resolve the record to move before touching any state.
        let moved = if remaining == 0 && slot < last {
            Some(self.record(last)?)
        } else {
            None
        };

        self.pfds[slot].events &= !requested(interest);
        rec.mask.read &= !interest.read;
        rec.mask.write &= !interest.write;

        if remaining != 0 {
            return Ok(());
        }

        if let Some(moved) = moved {
            self.pfds[slot] = self.pfds[last];
            self.files[slot] = self.files[last].take();
            moved.borrow_mut().id = Some(slot);
            trace!(fd = self.pfds[slot].fd as RawFd, from = last, to = slot, "slot compacted");
        }

        self.count = last;
        self.pfds[last] = empty_pollfd();
        self.files[last] = None;
        rec.id = None;
        trace!(fd = rec.fd, count = self.count, "slot released");

        Ok(())
    }

    /// Returns `true` if `slot` requested `want` and its returned bits
    /// include any of `ready`.
    fn ready(&self, slot: usize, want: Events, ready: Events) -> bool {
        let pfd = &self.pfds[slot];
        pfd.events & want != 0 && pfd.revents & ready != 0
    }

    fn fire(&mut self, fe: &FileEventRef, handler: Option<SharedHandler>) {
        if let Some(handler) = handler {
            let ev: &mut dyn Event = self;
            let mut f = handler.borrow_mut();
            (&mut *f)(ev, fe);
        }
    }

    fn dispatch(&mut self) -> Result<()> {
        let mut i = 0;

        // Callbacks may add or remove records, so `count` is re-read on every
        // pass. A record moved into an already visited slot waits for the
        // next call.
        while i < self.count {
            let fe = self.record(i)?;

            if self.ready(i, POLLIN, READ_READY) {
                let handler = fe.borrow().r_proc.clone();
                self.fire(&fe, handler);
            }

            let slot = fe.borrow().id.filter(|&slot| slot < self.count);
            if let Some(slot) = slot {
                if self.ready(slot, POLLOUT, WRITE_READY) {
                    let handler = fe.borrow().w_proc.clone();
                    self.fire(&fe, handler);
                }
            }

            i += 1;
        }

        Ok(())
    }
}

impl<P: RawPoll> Event for PollEvent<P> {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn handle(&self) -> Option<RawFd> {
        None
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let timeout_ms = timeout_ms(timeout);

        let n = match self.poller.poll(&mut self.pfds[..self.count], timeout_ms) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!("poll interrupted");
                return Ok(0);
            }
            Err(e) => {
                error!(error = %e, count = self.count, "poll failed");
                return Err(Error::Poll(e));
            }
        };

        self.dispatch()?;
        Ok(n)
    }

    fn add_read(&mut self, fe: &FileEventRef) -> Result<()> {
        self.add(fe, Interest::READ)
    }

    fn add_write(&mut self, fe: &FileEventRef) -> Result<()> {
        self.add(fe, Interest::WRITE)
    }

    fn del_read(&mut self, fe: &FileEventRef) -> Result<()> {
        self.del(fe, Interest::READ)
    }

    fn del_write(&mut self, fe: &FileEventRef) -> Result<()> {
        self.del(fe, Interest::WRITE)
    }
}

impl<P> Drop for PollEvent<P> {
    fn drop(&mut self) {
        debug!(count = self.count, capacity = self.capacity, "poll backend released");
    }
}

fn requested(interest: Interest) -> Events {
    let mut bits = 0;
    if interest.read {
        bits |= POLLIN;
    }
    if interest.write {
        bits |= POLLOUT;
    }
    bits
}

/// Converts a timeout to poll's milliseconds: `-1` blocks, partial
/// milliseconds round up so a short wait never becomes a busy loop.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => {
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            ms.min(i32::MAX as u128) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sys::POLLHUP;
    use std::cell::Cell;

    /// Reports scripted returned bits, or a scripted failure.
    #[derive(Default)]
    struct Scripted {
        ready: Rc<RefCell<Vec<(RawFd, Events)>>>,
        fail: Rc<Cell<Option<io::ErrorKind>>>,
    }

    impl RawPoll for Scripted {
        fn poll(&mut self, fds: &mut [PollFd], _timeout_ms: i32) -> io::Result<usize> {
            if let Some(kind) = self.fail.get() {
                return Err(kind.into());
            }

            let mut n = 0;
            for pfd in fds.iter_mut() {
                pfd.revents = 0;
                for &(fd, bits) in self.ready.borrow().iter() {
                    if pfd.fd as RawFd == fd {
                        pfd.revents |= bits;
                    }
                }
                if pfd.revents != 0 {
                    n += 1;
                }
            }
            Ok(n)
        }
    }

    fn backend(capacity: usize) -> PollEvent<Scripted> {
        PollBuilder::new()
            .capacity(capacity)
            .build_with(Scripted::default())
    }

    fn fd(n: i32) -> RawFd {
        n as RawFd
    }

    fn assert_consistent(ev: &PollEvent<Scripted>) {
        for i in 0..ev.len() {
            let fe = ev.record_at(i).expect("active slot without record");
            let rec = fe.borrow();
            assert_eq!(rec.id(), Some(i));
            assert_eq!(ev.fd_at(i), Some(rec.fd()));
        }
        for i in ev.len()..ev.capacity() {
            assert!(ev.files[i].is_none());
            assert_eq!(ev.pfds[i].events, 0);
        }
    }

    #[test]
    fn test_name_and_handle() {
        let ev = backend(4);
        assert_eq!(ev.name(), "poll");
        assert_eq!(ev.handle(), None);
        assert!(ev.is_empty());
    }

    #[test]
    fn test_read_then_write_share_a_slot() {
        let mut ev = backend(4);
        let fe = FileEvent::new(fd(5));

        ev.add_read(&fe).unwrap();
        ev.add_write(&fe).unwrap();

        assert_eq!(ev.len(), 1);
        assert_eq!(fe.borrow().id(), Some(0));
        assert_eq!(
            fe.borrow().mask(),
            Interest {
                read: true,
                write: true
            }
        );
        assert_eq!(ev.events_at(0), Some(POLLIN | POLLOUT));

        ev.del_read(&fe).unwrap();
        assert_eq!(ev.len(), 1);
        assert_eq!(fe.borrow().mask(), Interest::WRITE);
        assert_eq!(ev.events_at(0), Some(POLLOUT));

        ev.del_write(&fe).unwrap();
        assert!(ev.is_empty());
        assert_eq!(fe.borrow().id(), None);
        assert_eq!(fe.borrow().mask(), Interest::NONE);
        assert_consistent(&ev);
    }

    #[test]
    fn test_remove_middle_slot_compacts() {
        let mut ev = backend(4);
        let files: Vec<_> = (0..4).map(|n| FileEvent::new(fd(20 + n))).collect();
        for fe in &files {
            ev.add_read(fe).unwrap();
        }

        ev.del_read(&files[1]).unwrap();

        assert_eq!(ev.len(), 3);
        assert_eq!(files[3].borrow().id(), Some(1));
        assert_eq!(ev.fd_at(1), Some(fd(23)));
        assert_eq!(files[1].borrow().id(), None);
        assert_consistent(&ev);
    }

    #[test]
    fn test_remove_last_slot_does_not_move_others() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        let b = FileEvent::new(fd(2));
        ev.add_read(&a).unwrap();
        ev.add_write(&b).unwrap();

        ev.del_write(&b).unwrap();

        assert_eq!(ev.len(), 1);
        assert_eq!(a.borrow().id(), Some(0));
        assert_consistent(&ev);
    }

    #[test]
    fn test_reregistration_uses_current_count() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        let b = FileEvent::new(fd(2));
        let c = FileEvent::new(fd(3));
        ev.add_read(&a).unwrap();
        ev.add_read(&b).unwrap();
        ev.add_read(&c).unwrap();

        ev.del_read(&a).unwrap();
        assert_eq!(c.borrow().id(), Some(0));

        ev.add_write(&a).unwrap();
        assert_eq!(a.borrow().id(), Some(2));
        assert_eq!(ev.events_at(2), Some(POLLOUT));
        assert_consistent(&ev);
    }

    #[test]
    fn test_random_sequence_keeps_invariants() {
        let mut ev = backend(8);
        let files: Vec<_> = (0..8).map(|n| FileEvent::new(fd(100 + n))).collect();

        // (record, add?, read?)
        let ops = [
            (0, true, true),
            (1, true, false),
            (2, true, true),
            (2, true, false),
            (3, true, true),
            (0, false, true),
            (4, true, false),
            (2, false, true),
            (5, true, true),
            (1, false, false),
            (6, true, true),
            (2, false, false),
            (0, true, false),
            (7, true, true),
            (3, false, true),
        ];

        for (idx, add, read) in ops {
            let fe = &files[idx];
            match (add, read) {
                (true, true) => ev.add_read(fe).unwrap(),
                (true, false) => ev.add_write(fe).unwrap(),
                (false, true) => ev.del_read(fe).unwrap(),
                (false, false) => ev.del_write(fe).unwrap(),
            }
            assert_consistent(&ev);

            let active = files.iter().filter(|f| !f.borrow().mask().is_empty()).count();
            assert_eq!(ev.len(), active);
        }
    }

    #[test]
    fn test_capacity_exhausted_is_reported() {
        let mut ev = backend(2);
        let a = FileEvent::new(fd(1));
        let b = FileEvent::new(fd(2));
        let c = FileEvent::new(fd(3));
        ev.add_read(&a).unwrap();
        ev.add_read(&b).unwrap();

        let err = ev.add_read(&c).unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { capacity: 2, .. }));
        assert_eq!(ev.len(), 2);
        assert_eq!(c.borrow().id(), None);
        assert_eq!(c.borrow().mask(), Interest::NONE);
        assert_consistent(&ev);

        // Still usable for records that already hold a slot.
        ev.add_write(&a).unwrap();
    }

    #[test]
    fn test_foreign_record_on_slot_is_rejected() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        let intruder = FileEvent::new(fd(9));
        ev.add_read(&a).unwrap();

        intruder.borrow_mut().id = Some(0);
        let err = ev.add_write(&intruder).unwrap_err();
        assert!(matches!(err, Error::SlotMismatch { slot: 0, .. }));
        assert_eq!(ev.events_at(0), Some(POLLIN));
    }

    #[test]
    fn test_del_unregistered_is_rejected() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));

        assert!(matches!(
            ev.del_read(&a).unwrap_err(),
            Error::NotRegistered { .. }
        ));

        a.borrow_mut().id = Some(3);
        assert!(matches!(
            ev.del_write(&a).unwrap_err(),
            Error::SlotOutOfRange { slot: 3, count: 0, .. }
        ));
    }

    #[test]
    fn test_interrupted_wait_runs_no_callbacks() {
        let mut ev = backend(4);
        let fired = Rc::new(Cell::new(0));
        let a = FileEvent::new(fd(1));
        let hits = fired.clone();
        a.borrow_mut().set_read_proc(move |_, _| hits.set(hits.get() + 1));
        ev.add_read(&a).unwrap();

        ev.poller.ready.borrow_mut().push((fd(1), POLLIN));
        ev.poller.fail.set(Some(io::ErrorKind::Interrupted));

        assert_eq!(ev.wait(None).unwrap(), 0);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_failed_wait_is_fatal() {
        let mut ev = backend(4);
        ev.poller.fail.set(Some(io::ErrorKind::InvalidInput));

        let err = ev.wait(Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.as_label(), "poll_failed");
    }

    #[test]
    fn test_only_requested_sides_fire() {
        let mut ev = backend(4);
        let log = Rc::new(RefCell::new(Vec::new()));

        let a = FileEvent::new(fd(1));
        let b = FileEvent::new(fd(2));
        for (fe, name) in [(&a, "a"), (&b, "b")] {
            let r = log.clone();
            let w = log.clone();
            let mut rec = fe.borrow_mut();
            rec.set_read_proc(move |_, _| r.borrow_mut().push(format!("{name}:read")));
            rec.set_write_proc(move |_, _| w.borrow_mut().push(format!("{name}:write")));
        }
        ev.add_read(&a).unwrap();
        ev.add_write(&b).unwrap();

        ev.poller
            .ready
            .borrow_mut()
            .extend([(fd(1), POLLIN | POLLOUT), (fd(2), POLLIN | POLLOUT)]);

        assert_eq!(ev.wait(Some(Duration::from_millis(10))).unwrap(), 2);
        assert_eq!(*log.borrow(), vec!["a:read", "b:write"]);
    }

    #[test]
    fn test_hangup_wakes_registered_side() {
        let mut ev = backend(4);
        let fired = Rc::new(Cell::new(false));
        let a = FileEvent::new(fd(1));
        let hit = fired.clone();
        a.borrow_mut().set_write_proc(move |_, _| hit.set(true));
        ev.add_write(&a).unwrap();

        ev.poller.ready.borrow_mut().push((fd(1), POLLHUP));
        ev.wait(None).unwrap();

        assert!(fired.get());
    }

    #[test]
    fn test_callback_can_deregister_itself() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        let b = FileEvent::new(fd(2));
        let b_fired = Rc::new(Cell::new(false));

        a.borrow_mut().set_read_proc(|ev, fe| {
            ev.del_read(fe).unwrap();
        });
        let hit = b_fired.clone();
        b.borrow_mut().set_read_proc(move |_, _| hit.set(true));

        ev.add_read(&a).unwrap();
        ev.add_read(&b).unwrap();
        ev.poller
            .ready
            .borrow_mut()
            .extend([(fd(1), POLLIN), (fd(2), POLLIN)]);

        ev.wait(None).unwrap();

        // `b` moved into the visited slot 0 and is skipped this pass.
        assert!(!b_fired.get());
        assert_eq!(ev.len(), 1);
        assert_eq!(b.borrow().id(), Some(0));
        assert_eq!(a.borrow().id(), None);
        assert_consistent(&ev);

        ev.wait(None).unwrap();
        assert!(b_fired.get());
    }

    #[test]
    fn test_read_callback_dropping_write_interest_skips_write() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        let wrote = Rc::new(Cell::new(false));

        a.borrow_mut().set_read_proc(|ev, fe| {
            ev.del_write(fe).unwrap();
        });
        let hit = wrote.clone();
        a.borrow_mut().set_write_proc(move |_, _| hit.set(true));

        ev.add_read(&a).unwrap();
        ev.add_write(&a).unwrap();
        ev.poller.ready.borrow_mut().push((fd(1), POLLIN | POLLOUT));

        ev.wait(None).unwrap();

        assert!(!wrote.get());
        assert_eq!(a.borrow().mask(), Interest::READ);
    }

    #[test]
    fn test_callback_can_clear_itself() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        let fired = Rc::new(Cell::new(0));
        let hits = fired.clone();

        a.borrow_mut().set_read_proc(move |_, fe| {
            hits.set(hits.get() + 1);
            fe.borrow_mut().clear_read_proc();
        });
        ev.add_read(&a).unwrap();
        ev.poller.ready.borrow_mut().push((fd(1), POLLIN));

        ev.wait(None).unwrap();
        ev.wait(None).unwrap();

        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_dropped_record_is_stale() {
        let mut ev = backend(4);
        let a = FileEvent::new(fd(1));
        ev.add_read(&a).unwrap();
        drop(a);

        let err = ev.wait(Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, Error::StaleRecord { slot: 0 }));
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }
}
