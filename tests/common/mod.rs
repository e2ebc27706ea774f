#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use aimacro::document::SharedMacro;
use aimacro::engine::{
    Collaborators, Engine, ImageFileScreen, InputInjector, Notifier, RunFlag, ScreenCapture, VariableStore,
    VirtualClock, VisionAnalyzer, VisionRequest,
};
use aimacro::events::{ButtonAction, KeyToken, MouseSide, Point, ScrollDirection, SearchArea, VisionProvider};
use anyhow::{Result, bail};
use chrono::NaiveDate;
use image::{DynamicImage, GrayImage, Luma};

/// What the recording injector saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Press(String),
    Release(String),
    Move(Point),
    Scroll(ScrollDirection, Option<Point>),
    Button(MouseSide, ButtonAction, Option<Point>),
}

#[derive(Clone, Default)]
pub struct RecordingInput {
    pub log: Arc<Mutex<Vec<Input>>>,
    pub fail: bool,
}

impl RecordingInput {
    pub fn taken(&self) -> Vec<Input> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, input: Input) -> Result<()> {
        if self.fail {
            bail!("input device unplugged");
        }
        self.log.lock().unwrap().push(input);
        Ok(())
    }
}

impl InputInjector for RecordingInput {
    fn press_key(&mut self, key: &KeyToken) -> Result<()> {
        self.record(Input::Press(key.to_string()))
    }
    fn release_key(&mut self, key: &KeyToken) -> Result<()> {
        self.record(Input::Release(key.to_string()))
    }
    fn move_mouse(&mut self, to: Point) -> Result<()> {
        self.record(Input::Move(to))
    }
    fn scroll(&mut self, direction: ScrollDirection, at: Option<Point>) -> Result<()> {
        self.record(Input::Scroll(direction, at))
    }
    fn mouse_button(&mut self, side: MouseSide, action: ButtonAction, at: Option<Point>) -> Result<()> {
        self.record(Input::Button(side, action, at))
    }
}

/// Screen whose frame a test can swap while the engine holds it.
#[derive(Clone)]
pub struct SharedScreen {
    pub inner: Arc<Mutex<ImageFileScreen>>,
    pub captures: Arc<Mutex<Vec<SearchArea>>>,
}

impl SharedScreen {
    pub fn new(frame: DynamicImage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ImageFileScreen::new(frame))),
            captures: Arc::default(),
        }
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().unwrap().len()
    }
}

impl ScreenCapture for SharedScreen {
    fn capture(&mut self, area: &SearchArea) -> Result<DynamicImage> {
        self.captures.lock().unwrap().push(*area);
        self.inner.lock().unwrap().capture(area)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionCall {
    pub provider: VisionProvider,
    pub feature: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

/// Vision backend answering from a script.
#[derive(Clone, Default)]
pub struct ScriptedVision {
    pub answers: Arc<Mutex<VecDeque<String>>>,
    pub calls: Arc<Mutex<Vec<VisionCall>>>,
}

impl ScriptedVision {
    pub fn answering(answers: &[&str]) -> Self {
        let vision = Self::default();
        vision
            .answers
            .lock()
            .unwrap()
            .extend(answers.iter().map(|a| a.to_string()));
        vision
    }

    pub fn calls(&self) -> Vec<VisionCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl VisionAnalyzer for ScriptedVision {
    fn analyze(&mut self, png: &[u8], request: &VisionRequest<'_>) -> Result<String> {
        let img = image::load_from_memory(png)?;
        self.calls.lock().unwrap().push(VisionCall {
            provider: request.provider,
            feature: request.feature.to_string(),
            prompt: request.prompt.to_string(),
            width: img.width(),
            height: img.height(),
        });
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&mut self, name: &str) -> bool {
        self.sent.lock().unwrap().push(name.to_string());
        true
    }
}

/// Everything a test needs to drive and inspect one engine.
pub struct Harness {
    pub source: Arc<SharedMacro>,
    pub variables: VariableStore,
    pub flag: RunFlag,
    pub clock: Arc<VirtualClock>,
    pub input: RecordingInput,
    pub screen: SharedScreen,
    pub vision: ScriptedVision,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new(lines: &[&str]) -> Self {
        let wall = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Self {
            source: Arc::new(SharedMacro::with_rebuilt_checkpoints(
                lines.iter().map(|l| l.to_string()).collect(),
            )),
            variables: VariableStore::new(),
            flag: RunFlag::new(),
            clock: Arc::new(VirtualClock::new(wall)),
            input: RecordingInput::default(),
            screen: SharedScreen::new(DynamicImage::ImageLuma8(noise(320, 240, 7))),
            vision: ScriptedVision::default(),
            notifier: RecordingNotifier::default(),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine_with_screen(Box::new(self.screen.clone()))
    }

    pub fn engine_with_screen(&self, screen: Box<dyn ScreenCapture>) -> Engine {
        Engine::new(
            self.source.clone(),
            self.variables.clone(),
            Collaborators {
                input: Box::new(self.input.clone()),
                screen,
                vision: Box::new(self.vision.clone()),
                notifier: Box::new(self.notifier.clone()),
            },
        )
        .with_clock(self.clock.clone())
        .with_flag(self.flag.clone())
    }
}

/// Deterministic texture, so templates match exactly where they were cut.
pub fn noise(w: u32, h: u32, seed: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| {
        let v = (x.wrapping_mul(31) ^ y.wrapping_mul(197) ^ seed).wrapping_mul(2_654_435_761);
        Luma([(v >> 24) as u8])
    })
}

pub fn paste(dst: &mut GrayImage, src: &GrayImage, at_x: u32, at_y: u32) {
    for (x, y, p) in src.enumerate_pixels() {
        dst.put_pixel(at_x + x, at_y + y, *p);
    }
}
