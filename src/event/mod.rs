//! The event backend contract and its `poll(2)` implementation.
//!
//! A scheduler drives exactly one [`Event`] per OS thread. Fibers never talk
//! to the backend directly: the hook layer turns blocking calls into
//! registrations of a [`FileEvent`], and the scheduler loop calls
//! [`Event::wait`] whenever every fiber is parked.
//!
//! Backends are interchangeable behind the trait. Which one is used is decided
//! by the embedding scheduler.

mod builder;
mod file;
mod poll;

pub use builder::PollBuilder;
pub use file::{FileEvent, FileEventRef, Handler};
pub use poll::PollEvent;

use std::time::Duration;

use crate::error::Result;
use crate::sys::RawFd;

/// Capability set every event backend provides.
///
/// Dropping the backend releases it.
pub trait Event {
    /// Short backend name, e.g. `"poll"`.
    fn name(&self) -> &'static str;

    /// Descriptor owned by the backend itself, if any.
    fn handle(&self) -> Option<RawFd>;

    /// Waits for readiness and runs the callbacks of ready records.
    ///
    /// `None` blocks indefinitely, `Some(Duration::ZERO)` returns at once.
    /// Returns the number of ready descriptors reported by the OS; it is a
    /// liveness signal only. An interrupted wait returns `Ok(0)` and the
    /// caller simply waits again.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<usize>;

    fn add_read(&mut self, fe: &FileEventRef) -> Result<()>;

    fn add_write(&mut self, fe: &FileEventRef) -> Result<()>;

    fn del_read(&mut self, fe: &FileEventRef) -> Result<()>;

    fn del_write(&mut self, fe: &FileEventRef) -> Result<()>;
}

/// Creates a `poll(2)` backend behind the generic contract.
///
/// `size_hint` is ignored: the backend is sized to the process's
/// open-descriptor limit.
pub fn create_poll(size_hint: usize) -> Result<Box<dyn Event>> {
    Ok(Box::new(PollEvent::create(size_hint)?))
}
