use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::collaborators::{InputInjector, MacroSource, Notifier, ScreenCapture, VisionAnalyzer, VisionRequest};
use super::condition::evaluate;
use super::state::{RunFlag, RunStatus, StatusReceiver, StatusSender, Step, status_channel};
use super::variables::VariableStore;
use crate::events::{
    BranchNotifications, Event, GotoEvent, GotoTarget, IfEvent, ParsedLine, PatternSearchEvent, SearchArea,
    Target, VisionEvent, VisionProvider, parse_line, replace_image_payload,
};
use crate::pattern::{PatternSearcher, SearchRequest, SearchSettings};
use crate::utils::imaging::{encode_base64_png, encode_png, upscale_min_size};

/// Substrings a vision backend uses to report its own failure.
pub const VISION_FAILURE_MARKERS: [&str; 2] = ["API request failed", "JSON parsing error"];

const DEFAULT_CHATGPT_PROMPT: &str = "What's in this image?";

/// Tunables of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub search: SearchSettings,
    /// Captures smaller than this are upscaled before reaching the vision backend.
    pub vision_min_size: (u32, u32),
    /// Used when a pattern event's threshold lies outside `0..=1`.
    pub default_threshold: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            search: SearchSettings::default(),
            vision_min_size: (50, 50),
            default_threshold: 0.7,
        }
    }
}

/// The side-effecting collaborators an engine drives.
pub struct Collaborators {
    pub input: Box<dyn InputInjector>,
    pub screen: Box<dyn ScreenCapture>,
    pub vision: Box<dyn VisionAnalyzer>,
    pub notifier: Box<dyn Notifier>,
}

/// Executes one macro line at a time.
///
/// [`Engine::step`] takes the position to execute and returns the position
/// to continue from. It never fails: errors are logged, stop the run, and
/// leave the position unchanged.
pub struct Engine {
    source: Arc<dyn MacroSource>,
    variables: VariableStore,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    flag: RunFlag,
    options: EngineOptions,
    status: StatusSender,
    pass: u32,
}

impl Engine {
    pub fn new(source: Arc<dyn MacroSource>, variables: VariableStore, collaborators: Collaborators) -> Self {
        let (status, _) = status_channel();
        Self {
            source,
            variables,
            collaborators,
            clock: Arc::new(SystemClock::new()),
            flag: RunFlag::new(),
            options: EngineOptions::default(),
            status,
            pass: 1,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Observe (and stop) the run through `flag`.
    pub fn with_flag(mut self, flag: RunFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn flag(&self) -> &RunFlag {
        &self.flag
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn source(&self) -> &Arc<dyn MacroSource> {
        &self.source
    }

    /// Receiver of the live "line and action" indicator.
    pub fn subscribe(&self) -> StatusReceiver {
        self.status.subscribe()
    }

    pub(crate) fn set_pass(&mut self, pass: u32) {
        self.pass = pass;
    }

    /// Execute the line at `step.index`.
    pub fn step(&mut self, step: Step) -> Step {
        match self.dispatch(step) {
            Ok(next) => next,
            Err(err) => {
                let chain = format!("{err:#}");
                error!(
                    target: "aimacro::engine",
                    line = step.index,
                    error = %chain,
                    "Unexpected error while executing event, stopping macro: {err:?}"
                );
                self.flag.stop();
                step
            }
        }
    }

    fn dispatch(&mut self, step: Step) -> Result<Step> {
        if !self.flag.is_running() {
            debug!(target: "aimacro::engine", line = step.index, "Macro not running, skipping event");
            return Ok(step);
        }
        let index = step.index;
        let Some(line) = self.source.event(index) else {
            debug!(target: "aimacro::engine", line = index, "No event at index");
            return Ok(step);
        };

        let ParsedLine { timestamp, event } = match parse_line(&line) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(target: "aimacro::engine", line = index, error = %err, "Malformed event, skipping");
                return Ok(Step::new(index + 1, step.previous_timestamp));
            }
        };

        if let (Some(ts), Some(prev)) = (timestamp, step.previous_timestamp) {
            let delay = ts - prev;
            if delay > 0.0 {
                debug!(target: "aimacro::engine", line = index, delay, "Waiting before event");
                self.clock
                    .sleep(Duration::try_from_secs_f64(delay).unwrap_or_default());
            }
            if !self.flag.is_running() {
                return Ok(step);
            }
        }

        self.publish(index, &event.to_string());
        let advance = Step::new(index + 1, timestamp);
        // Replayed input keeps the recording timeline even across untimed lines.
        let replayed = Step::new(index + 1, timestamp.or(step.previous_timestamp));
        let input = &mut self.collaborators.input;
        match &event {
            Event::KeyPress(key) => input.press_key(key).map(|()| replayed),
            Event::KeyRelease(key) => input.release_key(key).map(|()| replayed),
            Event::MouseMove(to) => input.move_mouse(*to).map(|()| replayed),
            Event::MouseScroll { direction, at } => input.scroll(*direction, *at).map(|()| replayed),
            Event::MouseButton { side, action, at } => {
                input.mouse_button(*side, *action, *at).map(|()| replayed)
            }
            Event::Vision(vision) => self.run_vision(vision, step),
            Event::PatternSearch(pattern) => self.run_pattern(pattern, &line, index, timestamp),
            Event::If(cond) => Ok(self.run_if(cond, index, timestamp)),
            Event::Wait { seconds } => Ok(self.run_wait(*seconds, step, timestamp)),
            Event::Goto(goto) => Ok(self.run_goto(goto, index, timestamp)),
            Event::Checkpoint { name } => {
                debug!(target: "aimacro::engine", line = index, checkpoint = %name, "Reached checkpoint");
                Ok(advance)
            }
            Event::Unrecognized(raw) => {
                warn!(target: "aimacro::engine", line = index, event = %raw, "Unrecognized event format");
                Ok(advance)
            }
        }
    }

    fn run_vision(&mut self, vision: &VisionEvent, step: Step) -> Result<Step> {
        let area = SearchArea::Region(vision.area);
        let capture = self
            .collaborators
            .screen
            .capture(&area)
            .with_context(|| format!("Failed to capture vision area {}", vision.area))?;
        let (min_w, min_h) = self.options.vision_min_size;
        let png = encode_png(&upscale_min_size(capture, min_w, min_h)).context("Failed to encode capture as PNG")?;

        let content = vision.content.trim();
        let prompt = if vision.provider == VisionProvider::ChatGpt && content.is_empty() {
            DEFAULT_CHATGPT_PROMPT
        } else {
            content
        };
        let text = self
            .collaborators
            .vision
            .analyze(
                &png,
                &VisionRequest {
                    provider: vision.provider,
                    feature: &vision.feature,
                    prompt,
                },
            )
            .with_context(|| format!("{} vision request failed", vision.provider))?;
        debug!(target: "aimacro::engine", line = step.index, provider = %vision.provider, result = %text, "Vision result");

        if !vision.variable.is_empty() {
            self.variables.set(vision.variable.as_str(), text.as_str());
            debug!(target: "aimacro::engine", variable = %vision.variable, "Stored vision result");
        }

        if VISION_FAILURE_MARKERS.iter().any(|marker| text.contains(marker)) {
            error!(target: "aimacro::engine", line = step.index, result = %text, "Vision request failed, stopping macro");
            self.flag.stop();
            return Ok(step);
        }
        Ok(Step::new(step.index + 1, step.previous_timestamp))
    }

    fn run_pattern(
        &mut self,
        pattern: &PatternSearchEvent,
        line: &str,
        index: usize,
        timestamp: Option<f64>,
    ) -> Result<Step> {
        let threshold = if (0.0..=1.0).contains(&pattern.threshold) {
            pattern.threshold
        } else {
            warn!(
                target: "aimacro::engine",
                line = index,
                threshold = pattern.threshold,
                fallback = self.options.default_threshold,
                "Threshold out of range, using default"
            );
            self.options.default_threshold
        };

        let Collaborators { input, screen, .. } = &mut self.collaborators;
        let outcome = PatternSearcher::new(
            screen.as_mut(),
            input.as_mut(),
            self.clock.as_ref(),
            &self.flag,
            self.options.search,
        )
        .search(&SearchRequest {
            template: &pattern.image,
            area: &pattern.area,
            threshold,
            wait: Duration::try_from_secs_f64(pattern.wait).unwrap_or_default(),
            click: pattern.click,
        })
        .context("Pattern search failed")?;

        let found = outcome.is_found();
        info!(target: "aimacro::engine", line = index, found, "Pattern search finished");
        self.notify(&pattern.notifications, found);

        if pattern.scene_change && !found {
            self.rewrite_scene(&pattern.area, line, index)?;
        }

        let target = if found { &pattern.succeed } else { &pattern.fail };
        Ok(self.route(target, index, timestamp))
    }

    /// Replace the stored template of the line at `index` with a fresh capture
    /// of its search area. Skipped when the line was edited or moved while
    /// the search ran.
    fn rewrite_scene(&mut self, area: &SearchArea, line: &str, index: usize) -> Result<()> {
        let capture = self
            .collaborators
            .screen
            .capture(area)
            .with_context(|| format!("Failed to capture scene change area {area}"))?;
        let payload = encode_base64_png(&capture).context("Failed to encode scene change capture")?;
        let updated = replace_image_payload(line, &payload);
        if self.source.rewrite_event_if(index, line, updated) {
            info!(target: "aimacro::engine", line = index, "Scene changed, stored pattern image updated");
        } else {
            warn!(
                target: "aimacro::engine",
                line = index,
                "Event was edited during the search, scene change not stored"
            );
        }
        Ok(())
    }

    fn run_if(&mut self, cond: &IfEvent, index: usize, timestamp: Option<f64>) -> Step {
        self.variables.refresh_time(self.clock.local_time());
        let Some(value) = self.variables.get(&cond.variable) else {
            debug!(target: "aimacro::engine", line = index, variable = %cond.variable, "Variable not found, skipping If");
            return Step::new(index + 1, timestamp);
        };
        let met = evaluate(cond.op, &value, &cond.value);
        debug!(
            target: "aimacro::engine",
            line = index,
            variable = %cond.variable,
            %value,
            op = cond.op.as_str(),
            expected = %cond.value,
            met,
            "Condition evaluated"
        );
        self.notify(&cond.notifications, met);
        let target = if met { &cond.succeed } else { &cond.fail };
        self.route(target, index, timestamp)
    }

    fn run_wait(&mut self, seconds: f64, step: Step, timestamp: Option<f64>) -> Step {
        let whole = seconds.trunc() as u64;
        for elapsed in 0..whole {
            self.publish(step.index, &format!("waiting: {}", crate::events::fmt_float(seconds - elapsed as f64)));
            self.clock.sleep(Duration::from_secs(1));
            if !self.flag.is_running() {
                debug!(target: "aimacro::engine", line = step.index, "Wait interrupted");
                return step;
            }
        }
        Step::new(step.index + 1, timestamp)
    }

    fn run_goto(&mut self, goto: &GotoEvent, index: usize, timestamp: Option<f64>) -> Step {
        match &goto.target {
            GotoTarget::Checkpoint(name) | GotoTarget::Target(name) => {
                self.route(&Target::Checkpoint(name.clone()), index, timestamp)
            }
            GotoTarget::Line(line) => {
                let len = self.source.len();
                let Some(dest) = usize::try_from(*line).ok().filter(|d| *d < len) else {
                    error!(target: "aimacro::engine", line = index, dest = *line, len, "Line number out of range, continuing");
                    return Step::new(index + 1, timestamp);
                };
                if let Some(expected) = &goto.element {
                    if self.source.event(dest).as_deref() != Some(expected.as_str()) {
                        warn!(target: "aimacro::engine", line = index, dest, "Element at jump destination changed since the jump was written");
                    }
                }
                debug!(target: "aimacro::engine", line = index, dest, "Jumping to line");
                Step::new(dest, timestamp)
            }
        }
    }

    /// Resolve a branch destination. An unknown checkpoint stops the run.
    fn route(&mut self, target: &Target, index: usize, timestamp: Option<f64>) -> Step {
        match target {
            Target::Next => Step::new(index + 1, timestamp),
            Target::Checkpoint(name) => match self.source.resolve_checkpoint(name) {
                Some(next) => {
                    debug!(target: "aimacro::engine", line = index, checkpoint = %name, next, "Jumping to checkpoint");
                    Step::new(next, timestamp)
                }
                None => {
                    error!(target: "aimacro::engine", line = index, checkpoint = %name, "Checkpoint not found, stopping macro");
                    self.flag.stop();
                    Step::new(index, timestamp)
                }
            },
        }
    }

    fn notify(&mut self, notifications: &BranchNotifications, succeeded: bool) {
        let Some(name) = notifications.for_outcome(succeeded) else {
            return;
        };
        if self.collaborators.notifier.send(name) {
            debug!(target: "aimacro::engine", notification = %name, "Notification sent");
        } else {
            warn!(target: "aimacro::engine", notification = %name, "Notification could not be sent");
        }
    }

    fn publish(&self, line: usize, action: &str) {
        let status = RunStatus {
            line,
            pass: self.pass,
            action: action.to_string(),
        };
        info!(target: "aimacro::engine", pass = self.pass, "{}", abbreviate(&status.to_string(), 120));
        self.status.send_replace(status);
    }
}

/// Shorten long lines (pattern events embed whole images) for the log.
fn abbreviate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviate_keeps_short_text() {
        assert_eq!(abbreviate("line: 3 - Wait: 1.0s", 120), "line: 3 - Wait: 1.0s");
        assert_eq!(abbreviate("abcdef", 3), "abc...");
    }
}
