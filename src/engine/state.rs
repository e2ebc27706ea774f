use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The run's `running` flag.
///
/// Backed by a [`CancellationToken`]: clearing the flag cancels the token, so
/// async observers (the CLI's Ctrl+C handler, a UI) can `await` the stop while
/// the blocking engine simply polls [`RunFlag::is_running`]. Stopping is
/// idempotent and cannot be undone; every run gets a fresh flag.
#[derive(Debug, Clone, Default)]
pub struct RunFlag {
    token: CancellationToken,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Request the run to stop.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Token observers can await (`flag.token().cancelled().await`).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Where the next dispatch starts, and the timestamp pacing is measured from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub index: usize,
    pub previous_timestamp: Option<f64>,
}

impl Step {
    pub const fn new(index: usize, previous_timestamp: Option<f64>) -> Self {
        Self {
            index,
            previous_timestamp,
        }
    }
}

/// Position and repeat bookkeeping of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunState {
    pub index: usize,
    pub previous_timestamp: Option<f64>,
    pub repeat_count: u32,
    /// Passes started so far (the first pass counts as 1).
    pub completed_repeats: u32,
}

impl RunState {
    pub fn new(repeat_count: u32) -> Self {
        Self {
            index: 0,
            previous_timestamp: None,
            repeat_count: repeat_count.max(1),
            completed_repeats: 1,
        }
    }

    pub fn apply(&mut self, step: Step) {
        self.index = step.index;
        self.previous_timestamp = step.previous_timestamp;
    }

    pub fn step(&self) -> Step {
        Step::new(self.index, self.previous_timestamp)
    }

    /// Start the next pass if the index ran off the end and the repeat budget
    /// allows it. Timing restarts fresh for every pass.
    pub fn wrap_if_finished(&mut self, len: usize) -> bool {
        if self.index >= len && self.completed_repeats < self.repeat_count {
            self.completed_repeats += 1;
            self.index = 0;
            self.previous_timestamp = None;
            return true;
        }
        false
    }
}

/// Live "current line and action" indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
    pub line: usize,
    pub pass: u32,
    pub action: String,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line: {} - {}", self.line, self.action)
    }
}

pub type StatusSender = watch::Sender<RunStatus>;
pub type StatusReceiver = watch::Receiver<RunStatus>;

/// Create the status channel an engine publishes on.
pub fn status_channel() -> (StatusSender, StatusReceiver) {
    watch::channel(RunStatus::default())
}
