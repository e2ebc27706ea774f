use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use tracing::trace;

use super::state::RunFlag;

/// Time source for pacing, waits, search budgets and the time variables.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Block the calling thread.
    fn sleep(&self, duration: Duration);

    /// Current local wall-clock time.
    fn local_time(&self) -> NaiveDateTime;
}

/// Real time: `Instant`, `thread::sleep` and the local timezone.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn local_time(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Simulated time: sleeping advances the clock instantly.
///
/// Used for dry runs (the macro is walked without real delays) and tests. A
/// flag can be scheduled to stop once virtual time reaches a deadline, which
/// models an external cancellation arriving in the middle of a sleep.
#[derive(Debug)]
pub struct VirtualClock {
    inner: Mutex<VirtualState>,
}

#[derive(Debug)]
struct VirtualState {
    elapsed: Duration,
    wall_start: NaiveDateTime,
    stops: Vec<(Duration, RunFlag)>,
}

impl VirtualClock {
    pub fn new(wall_start: NaiveDateTime) -> Self {
        Self {
            inner: Mutex::new(VirtualState {
                elapsed: Duration::ZERO,
                wall_start,
                stops: Vec::new(),
            }),
        }
    }

    /// Virtual clock whose wall time starts at the current local time.
    pub fn starting_now() -> Self {
        Self::new(Local::now().naive_local())
    }

    /// Stop `flag` when virtual time reaches `at`.
    pub fn stop_flag_at(&self, at: Duration, flag: RunFlag) {
        self.lock().stops.push((at, flag));
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtualState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        let now = state.elapsed;
        state.stops.retain(|(at, flag)| {
            if *at <= now {
                flag.stop();
                false
            } else {
                true
            }
        });
        trace!(target: "aimacro::clock", ?duration, ?now, "Virtual sleep");
    }

    fn local_time(&self) -> NaiveDateTime {
        let state = self.lock();
        state.wall_start
            + chrono::Duration::from_std(state.elapsed).unwrap_or(chrono::Duration::zero())
    }
}
