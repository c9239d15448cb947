//! Client-side request cooldown.
//!
//! A new request may only start once `min_interval` has passed since the
//! previous one. Requests made during the cooldown are rejected immediately
//! with the remaining wait, never queued.

use std::time::Duration;

use tokio::time::Instant;

use crate::observability::CLIENT_COOLDOWN_REJECTS;
use crate::{Error, Result};

/// Default minimum spacing between outbound requests.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(4);

/// Enforces a minimum interval between requests.
#[derive(Debug, Clone)]
pub struct Cooldown {
    min_interval: Duration,
    last_request: Option<Instant>,
}

impl Cooldown {
    /// Create a new `Cooldown` with the given minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: None,
        }
    }

    /// The configured minimum interval.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Time left before another request is allowed; zero when ready.
    pub fn remaining(&self) -> Duration {
        match self.last_request {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Claim the right to send a request now.
    ///
    /// On success the cooldown restarts; otherwise returns [`Error::Cooldown`]
    /// carrying the remaining wait.
    pub fn try_acquire(&mut self) -> Result<()> {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            CLIENT_COOLDOWN_REJECTS.click();
            return Err(Error::cooldown(remaining));
        }
        self.last_request = Some(Instant::now());
        Ok(())
    }

    /// Forget the previous request so the next one is allowed immediately.
    pub fn reset(&mut self) {
        self.last_request = None;
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
