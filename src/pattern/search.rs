use std::time::Duration;

use tracing::{debug, trace};

use super::SearchError;
use super::matcher::locate_until;
use crate::engine::clock::Clock;
use crate::engine::collaborators::{InputInjector, ScreenCapture};
use crate::engine::state::RunFlag;
use crate::events::{Point, SearchArea};
use crate::utils::imaging::decode_base64_image;

/// Timing of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    /// Sleep between two unsuccessful attempts.
    pub retry_interval: Duration,
    /// Pause between finding the template and clicking it.
    pub click_settle: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            click_settle: Duration::from_millis(500),
        }
    }
}

/// One search, as declared by a `Search Pattern` event.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    /// Base64-encoded template.
    pub template: &'a str,
    pub area: &'a SearchArea,
    pub threshold: f64,
    /// Upper bound on the time spent retrying.
    pub wait: Duration,
    pub click: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Screen coordinates of the match center; `clicked` reports whether the
    /// click was issued (a stop during the settle pause skips it).
    Found { center: Point, clicked: bool },
    NotFound,
}

impl SearchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }
}

/// Polls the screen for a template until it shows up, the wait budget runs
/// out, or the run is stopped.
pub struct PatternSearcher<'a> {
    screen: &'a mut dyn ScreenCapture,
    input: &'a mut dyn InputInjector,
    clock: &'a dyn Clock,
    flag: &'a RunFlag,
    settings: SearchSettings,
}

impl<'a> PatternSearcher<'a> {
    pub fn new(
        screen: &'a mut dyn ScreenCapture,
        input: &'a mut dyn InputInjector,
        clock: &'a dyn Clock,
        flag: &'a RunFlag,
        settings: SearchSettings,
    ) -> Self {
        Self {
            screen,
            input,
            clock,
            flag,
            settings,
        }
    }

    pub fn search(&mut self, request: &SearchRequest<'_>) -> Result<SearchOutcome, SearchError> {
        let template = decode_base64_image(request.template)?.to_luma8();
        let offset = match request.area {
            SearchArea::FullScreen => Point::new(0, 0),
            SearchArea::Region(region) if region.is_valid() => region.start,
            SearchArea::Region(region) => return Err(SearchError::Region(*region)),
        };
        debug!(
            target: "aimacro::pattern",
            area = %request.area,
            threshold = request.threshold,
            wait = ?request.wait,
            click = request.click,
            "Searching for pattern"
        );

        let started = self.clock.now();
        let (clock, flag) = (self.clock, self.flag);
        let within_budget = || flag.is_running() && clock.now().saturating_sub(started) < request.wait;
        while within_budget() {
            let screen = self
                .screen
                .capture(request.area)
                .map_err(SearchError::Capture)?
                .to_luma8();

            if let Some(found) = locate_until(&template, &screen, request.threshold, &within_budget) {
                let (cx, cy) = found.center();
                let center = Point::new(offset.x + cx as i32, offset.y + cy as i32);
                debug!(
                    target: "aimacro::pattern",
                    x = found.x,
                    y = found.y,
                    score = found.score,
                    %center,
                    "Pattern found"
                );
                let clicked = request.click && self.click(center)?;
                return Ok(SearchOutcome::Found { center, clicked });
            }

            if !self.flag.is_running() {
                debug!(target: "aimacro::pattern", "Run stopped, ending pattern search early");
                return Ok(SearchOutcome::NotFound);
            }
            let remaining = request.wait.saturating_sub(self.clock.now().saturating_sub(started));
            trace!(
                target: "aimacro::pattern",
                ?remaining,
                budget = ?request.wait,
                "Pattern not found, retrying"
            );
            // The budget is a ceiling: never sleep past it.
            self.clock.sleep(self.settings.retry_interval.min(remaining));
        }

        debug!(target: "aimacro::pattern", wait = ?request.wait, "Pattern not found within budget");
        Ok(SearchOutcome::NotFound)
    }

    fn click(&mut self, at: Point) -> Result<bool, SearchError> {
        self.clock.sleep(self.settings.click_settle);
        if !self.flag.is_running() {
            debug!(target: "aimacro::pattern", %at, "Run stopped before click");
            return Ok(false);
        }
        self.input
            .click(at)
            .map_err(|cause| SearchError::Click { at, cause })?;
        debug!(target: "aimacro::pattern", %at, "Clicked pattern center");
        Ok(true)
    }
}
