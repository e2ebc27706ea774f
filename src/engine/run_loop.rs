use tracing::{debug, info};

use super::executor::Engine;
use super::state::{RunState, Step};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every pass ran to the end of the list.
    Completed,
    /// The flag was cleared, externally or by a fatal event.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Engine steps taken, across all passes.
    pub dispatches: usize,
    /// Passes started (the first pass counts as 1).
    pub passes: u32,
    /// Position the run ended at.
    pub last: Step,
}

/// Repeats an [`Engine`] over the whole macro.
pub struct RunLoop {
    engine: Engine,
    state: RunState,
}

impl RunLoop {
    pub fn new(engine: Engine, repeat_count: u32) -> Self {
        Self {
            engine,
            state: RunState::new(repeat_count),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run until the repeat budget is spent or the flag is cleared. The flag
    /// is cleared on return either way.
    pub fn run(&mut self) -> RunSummary {
        let flag = self.engine.flag().clone();
        let mut dispatches = 0;
        info!(
            target: "aimacro::engine",
            events = self.engine.source().len(),
            repeat = self.state.repeat_count,
            "Macro started"
        );

        while flag.is_running() && self.state.index < self.engine.source().len() {
            self.engine.set_pass(self.state.completed_repeats);
            let next = self.engine.step(self.state.step());
            dispatches += 1;
            self.state.apply(next);
            if self.state.wrap_if_finished(self.engine.source().len()) {
                debug!(
                    target: "aimacro::engine",
                    pass = self.state.completed_repeats,
                    of = self.state.repeat_count,
                    "Starting next pass"
                );
            }
        }

        let outcome = if flag.is_running() {
            RunOutcome::Completed
        } else {
            RunOutcome::Stopped
        };
        flag.stop();
        let summary = RunSummary {
            outcome,
            dispatches,
            passes: self.state.completed_repeats,
            last: self.state.step(),
        };
        info!(
            target: "aimacro::engine",
            ?outcome,
            dispatches,
            passes = summary.passes,
            "Macro finished"
        );
        summary
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }
}
