//! Error types produced by the poll backend.
//!
//! Every variant of [`Error`] is unrecoverable: it reports either an unusable
//! multiplexer (the system `poll` failed or could not be resolved) or a broken
//! registry invariant. Embedding code decides how to shut down, but there is no
//! path that makes the backend usable again.
//!
//! Interrupted calls (`EINTR`) are never reported here; [`wait`] absorbs them.
//!
//! [`wait`]: crate::Event::wait

use std::io;
use thiserror::Error;

use crate::sys::RawFd;

/// Shorthand for results returned by the backend.
pub type Result<T> = std::result::Result<T, Error>;

/// # Errors produced by the poll backend.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// The system `poll` failed with something other than an interrupted call.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// The genuine `poll` symbol could not be located past the interception layer.
    #[error("unable to resolve the system poll symbol")]
    HookUnresolved,

    /// A new registration would exceed the slot capacity.
    #[error("slot capacity {capacity} exhausted while registering fd {fd}")]
    CapacityExhausted {
        /// Capacity fixed at creation.
        capacity: usize,
        /// Descriptor that could not be registered.
        fd: RawFd,
    },

    /// The slot named by a record holds a different record.
    #[error("slot {slot} is owned by another record (fd {fd})")]
    SlotMismatch {
        /// Slot named by the caller's record.
        slot: usize,
        /// Descriptor of the caller's record.
        fd: RawFd,
    },

    /// A record names a slot outside the active range.
    #[error("slot {slot} out of range (count {count}) for fd {fd}")]
    SlotOutOfRange {
        /// Slot named by the record.
        slot: usize,
        /// Number of active slots.
        count: usize,
        /// Descriptor of the record.
        fd: RawFd,
    },

    /// Deregistration of a record that is not registered.
    #[error("fd {fd} is not registered")]
    NotRegistered {
        /// Descriptor of the record.
        fd: RawFd,
    },

    /// An active slot refers to a record that has already been dropped.
    #[error("slot {slot} refers to a dropped record")]
    StaleRecord {
        /// Slot holding the dangling reference.
        slot: usize,
    },
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Poll(_) => "poll_failed",
            Error::HookUnresolved => "hook_unresolved",
            Error::CapacityExhausted { .. } => "capacity_exhausted",
            Error::SlotMismatch { .. } => "slot_mismatch",
            Error::SlotOutOfRange { .. } => "slot_out_of_range",
            Error::NotRegistered { .. } => "not_registered",
            Error::StaleRecord { .. } => "stale_record",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let err = Error::CapacityExhausted { capacity: 3, fd: 7 };
        assert_eq!(err.as_label(), "capacity_exhausted");
        assert_eq!(
            err.to_string(),
            "slot capacity 3 exhausted while registering fd 7"
        );

        let err = Error::Poll(io::Error::from(io::ErrorKind::InvalidInput));
        assert_eq!(err.as_label(), "poll_failed");
    }
}
