/*!
Macro execution.

A run walks the macro by index: [`Engine::step`] executes the line at the
current position and hands back the next position plus the timestamp the
following recorded event is paced against. Branches and jumps are plain
index reassignments, so loops cost nothing.

- `state`: run flag, position bookkeeping and the live status channel.
- `clock`: time source for pacing, waits and search budgets.
- `collaborators`: the traits for input, screen, vision, notification and
  macro storage, plus the offline implementations.
- `input`: Enigo-backed input injection.
- `pushover`: notification delivery over the Pushover API.
- `variables` / `condition`: the variable store and `If` semantics.
- `executor`: per-event dispatch.
- `run_loop`: repeats the engine over the whole macro.
*/

pub mod clock;
pub mod collaborators;
pub mod condition;
pub mod executor;
pub mod input;
pub mod pushover;
pub mod run_loop;
pub mod state;
pub mod variables;

pub use clock::{Clock, SystemClock, VirtualClock};
#[cfg(feature = "live-capture")]
pub use collaborators::XcapScreen;
pub use collaborators::{
    ImageFileScreen, InputInjector, LogNotifier, MacroSource, NoScreen, Notifier, ScreenCapture, UnavailableVision,
    VisionAnalyzer, VisionRequest, crop_to_area,
};
pub use executor::{Collaborators, Engine, EngineOptions, VISION_FAILURE_MARKERS};
pub use input::EnigoInjector;
pub use pushover::{PUSHOVER_ENDPOINT, PushoverNotifier, pushover_form};
pub use run_loop::{RunLoop, RunOutcome, RunSummary};
pub use state::{RunFlag, RunState, RunStatus, StatusReceiver, Step};
pub use variables::{TIME_VARIABLES, VarValue, VariableStore};
