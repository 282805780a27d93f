//! Fetch progress events and throttling.

use std::time::{Duration, Instant};

/// Progress updates are emitted at most this often.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Something observable happened while fetching one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// A pre-downloaded copy is being used.
    UsingLocalCopy { path: String },
    /// Starting a download from a source.
    Attempt { source_url: String },
    /// Bytes written so far; only emitted when the length is known.
    Progress { written: u64, total: u64 },
    /// Body fully written.
    Transferred { written: u64, total: Option<u64> },
    /// Digest matched the manifest.
    Verified,
    /// A source failed; the next one will be tried.
    SourceFailed { source_url: String, reason: String },
}

/// Callback receiving fetch events.
pub type FetchObserver<'a> = &'a dyn Fn(&FetchEvent);

/// Rate limiter for progress events.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Instant,
}

impl ProgressThrottle {
    /// Start a throttle; the first emission happens one interval after `start`.
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last_emit: start,
        }
    }

    /// Returns true (and resets the timer) if an update is due at `now`.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_emit) >= self.interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}
