//! Wall-clock sources.
//!
//! Member timestamps are wall-clock instants while timers run on the tokio
//! clock. [`TokioClock`] ties the two together so that a paused runtime moves
//! both at once.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time derived from the tokio clock.
///
/// Reports `origin` plus however much tokio time has elapsed since the clock
/// was created.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl TokioClock {
    /// Create a clock reading `origin` right now.
    #[must_use]
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}
