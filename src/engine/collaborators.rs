//! Interfaces the engine drives, plus the implementations shipped with the
//! crate that do not need a live desktop session.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use image::DynamicImage;
use tracing::{info, warn};

use crate::config::NotificationPreset;
use crate::events::{ButtonAction, KeyToken, MouseSide, Point, ScrollDirection, SearchArea, VisionProvider};

/// Synthesizes keyboard and mouse input.
pub trait InputInjector {
    fn press_key(&mut self, key: &KeyToken) -> Result<()>;
    fn release_key(&mut self, key: &KeyToken) -> Result<()>;
    fn move_mouse(&mut self, to: Point) -> Result<()>;
    /// Scroll one notch, first moving to `at` when given.
    fn scroll(&mut self, direction: ScrollDirection, at: Option<Point>) -> Result<()>;
    /// Press or release a button, first moving to `at` when given.
    fn mouse_button(&mut self, side: MouseSide, action: ButtonAction, at: Option<Point>) -> Result<()>;

    /// Left click at `at`.
    fn click(&mut self, at: Point) -> Result<()> {
        self.mouse_button(MouseSide::Left, ButtonAction::Pressed, Some(at))?;
        self.mouse_button(MouseSide::Left, ButtonAction::Released, Some(at))
    }
}

/// Grabs screen pixels.
pub trait ScreenCapture {
    fn capture(&mut self, area: &SearchArea) -> Result<DynamicImage>;
}

/// What a vision backend is asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisionRequest<'a> {
    pub provider: VisionProvider,
    pub feature: &'a str,
    pub prompt: &'a str,
}

/// OCR / image-understanding backend.
///
/// Backends report their own failures in-band, as text containing
/// `"API request failed"` or `"JSON parsing error"`; `Err` is reserved for
/// failures to even reach the backend.
pub trait VisionAnalyzer {
    fn analyze(&mut self, png: &[u8], request: &VisionRequest<'_>) -> Result<String>;
}

/// Fire-and-forget notification delivery. Returns whether the send succeeded.
pub trait Notifier {
    fn send(&mut self, name: &str) -> bool;
}

/// Shared event list and checkpoint table, owned by whoever edits the macro.
pub trait MacroSource: Send + Sync {
    fn event(&self, index: usize) -> Option<String>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn resolve_checkpoint(&self, name: &str) -> Option<usize>;
    /// Replace the stored line at `index`; `false` when the index is gone.
    fn rewrite_event(&self, index: usize, line: String) -> bool;
    /// Replace the line at `index` only if it still reads `expected`, checked
    /// and written under one lock. `false` when the line moved or changed.
    fn rewrite_event_if(&self, index: usize, expected: &str, line: String) -> bool;
}

/// A still image standing in for the screen.
#[derive(Debug, Clone)]
pub struct ImageFileScreen {
    frame: DynamicImage,
}

impl ImageFileScreen {
    pub fn new(frame: DynamicImage) -> Self {
        Self { frame }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let frame = image::open(path)
            .with_context(|| format!("Failed to open screen image {}", path.display()))?;
        Ok(Self::new(frame))
    }

    /// Replace the frame future captures are cut from.
    pub fn set_frame(&mut self, frame: DynamicImage) {
        self.frame = frame;
    }
}

impl ScreenCapture for ImageFileScreen {
    fn capture(&mut self, area: &SearchArea) -> Result<DynamicImage> {
        crop_to_area(&self.frame, area)
    }
}

/// Cut `area` out of a full-screen frame. Errors when the region is
/// degenerate or reaches past the frame.
pub fn crop_to_area(frame: &DynamicImage, area: &SearchArea) -> Result<DynamicImage> {
    let SearchArea::Region(region) = area else {
        return Ok(frame.clone());
    };
    if !region.is_valid() {
        bail!("Region {region} has a non-positive width or height");
    }
    let (fw, fh) = (i64::from(frame.width()), i64::from(frame.height()));
    let inside = region.start.x >= 0
        && region.start.y >= 0
        && i64::from(region.end.x) <= fw
        && i64::from(region.end.y) <= fh;
    if !inside {
        bail!("Region {region} lies outside the {fw}x{fh} screen");
    }
    // Inside the frame, so every extent fits in u32.
    Ok(frame.crop_imm(
        region.start.x as u32,
        region.start.y as u32,
        region.width() as u32,
        region.height() as u32,
    ))
}

/// Live capture of the primary monitor through `xcap`.
///
/// Coordinates are those of the primary monitor's own pixels, matching what
/// the editor recorded.
#[cfg(feature = "live-capture")]
#[derive(Debug, Clone, Copy, Default)]
pub struct XcapScreen;

#[cfg(feature = "live-capture")]
impl XcapScreen {
    pub fn new() -> Self {
        Self
    }

    fn primary() -> Result<xcap::Monitor> {
        let monitors = xcap::Monitor::all().context("Failed to list monitors")?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                return Ok(monitor);
            }
            fallback.get_or_insert(monitor);
        }
        fallback.context("No monitor found")
    }
}

#[cfg(feature = "live-capture")]
impl ScreenCapture for XcapScreen {
    fn capture(&mut self, area: &SearchArea) -> Result<DynamicImage> {
        let shot = Self::primary()?
            .capture_image()
            .context("Failed to capture the primary monitor")?;
        tracing::trace!(
            target: "aimacro::screen",
            width = shot.width(),
            height = shot.height(),
            %area,
            "Captured monitor"
        );
        crop_to_area(&DynamicImage::ImageRgba8(shot), area)
    }
}

/// Screen source used when none is configured: every capture fails, which
/// stops the run at the first event that needs pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScreen;

impl ScreenCapture for NoScreen {
    fn capture(&mut self, area: &SearchArea) -> Result<DynamicImage> {
        bail!("No screen source is configured (cannot capture {area})")
    }
}

/// Vision backend used when none is configured. Answers with a failure
/// marker so the run stops instead of acting on an empty answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableVision;

impl VisionAnalyzer for UnavailableVision {
    fn analyze(&mut self, _png: &[u8], request: &VisionRequest<'_>) -> Result<String> {
        Ok(format!(
            "API request failed: no {} backend is configured",
            request.provider
        ))
    }
}

/// Notifier that resolves names against the configured presets and writes
/// them to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    presets: BTreeMap<String, NotificationPreset>,
    sent: Vec<String>,
}

impl LogNotifier {
    pub fn new(presets: BTreeMap<String, NotificationPreset>) -> Self {
        Self {
            presets,
            sent: Vec::new(),
        }
    }

    /// Names successfully sent so far, in order.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }
}

impl Notifier for LogNotifier {
    fn send(&mut self, name: &str) -> bool {
        match self.presets.get(name) {
            Some(preset) => {
                info!(
                    target: "aimacro::notify",
                    notification = %name,
                    priority = preset.priority,
                    message = %preset.message,
                    "Notification"
                );
                self.sent.push(name.to_string());
                true
            }
            None => {
                warn!(
                    target: "aimacro::notify",
                    notification = %name,
                    known = ?self.presets.keys().collect::<Vec<_>>(),
                    "Notification not found"
                );
                false
            }
        }
    }
}
