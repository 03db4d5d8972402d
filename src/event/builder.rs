use super::PollEvent;
use crate::error::Result;
use crate::sys::{RawPoll, SysPoll, open_limit};

/// Builder for configuring and creating a [`PollEvent`].
///
/// By default the backend is sized to the process's open-descriptor limit,
/// which is what [`PollEvent::create`] does.
///
/// # Examples
///
/// ```rust,ignore
/// let backend = PollBuilder::new()
///     .capacity(256)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct PollBuilder {
    /// Explicit slot capacity; `None` uses the descriptor limit.
    capacity: Option<usize>,
}

impl PollBuilder {
    pub fn new() -> Self {
        Self { capacity: None }
    }

    /// Fixes the number of slots instead of deriving it from the descriptor
    /// limit.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "capacity must be > 0");

        self.capacity = Some(n);
        self
    }

    /// Builds a backend over the system `poll`, resolving it if needed.
    pub fn build(self) -> Result<PollEvent> {
        let poller = SysPoll::resolve()?;
        Ok(self.build_with(poller))
    }

    /// Builds a backend over the given primitive.
    pub fn build_with<P: RawPoll>(self, poller: P) -> PollEvent<P> {
        let capacity = self.capacity.unwrap_or_else(open_limit);
        PollEvent::with_capacity(poller, capacity)
    }
}
