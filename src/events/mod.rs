/*!
Event grammar for recorded macros.

A macro is an ordered list of text lines, one event per line. Recorded input
events carry a leading `"<seconds> - "` timestamp; events authored in the
editor (conditions, waits, jumps, pattern and vision queries) do not.

- `region`: the `{'start': (x, y), 'end': (x, y)}` literal used by area fields.
- `parser`: text line -> [`ParsedLine`].

Every type here renders back to the exact text form through `Display`, so
`parse_line(&parsed.to_string())` yields an equivalent value.
*/

use std::fmt;

use thiserror::Error;

pub mod parser;
pub mod region;

pub use parser::{parse_line, replace_image_payload};
pub use region::{Point, Region, parse_point, parse_region};

/// A grammar failure for a line whose leading keyword was recognized but
/// whose fields could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid region literal {literal:?}: {reason}")]
    Region {
        literal: String,
        reason: &'static str,
    },
    #[error("invalid number {value:?} in `{field}`")]
    Number { field: &'static str, value: String },
    #[error("invalid boolean {value:?} in `{field}` (expected True or False)")]
    Bool { field: &'static str, value: String },
    #[error("invalid coordinates {0:?}")]
    Point(String),
    #[error("unknown vision provider {0:?}")]
    UnknownProvider(String),
    #[error("unknown comparison operator {0:?}")]
    UnknownOperator(String),
    #[error("invalid key token {0:?}")]
    KeyToken(String),
    #[error("{kind} event is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// One parsed line: the event plus its optional recording timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub timestamp: Option<f64>,
    pub event: Event,
}

impl fmt::Display for ParsedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{ts:.3} - {}", self.event),
            None => write!(f, "{}", self.event),
        }
    }
}

/// A macro instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    KeyPress(KeyToken),
    KeyRelease(KeyToken),
    MouseMove(Point),
    MouseScroll {
        direction: ScrollDirection,
        at: Option<Point>,
    },
    MouseButton {
        side: MouseSide,
        action: ButtonAction,
        at: Option<Point>,
    },
    Vision(VisionEvent),
    PatternSearch(PatternSearchEvent),
    If(IfEvent),
    Wait {
        seconds: f64,
    },
    Goto(GotoEvent),
    Checkpoint {
        name: String,
    },
    /// A line matching none of the known shapes; kept verbatim.
    Unrecognized(String),
}

impl Event {
    /// Short kind name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::KeyPress(_) => "key_press",
            Event::KeyRelease(_) => "key_release",
            Event::MouseMove(_) => "mouse_move",
            Event::MouseScroll { .. } => "mouse_scroll",
            Event::MouseButton { .. } => "mouse_button",
            Event::Vision(_) => "vision",
            Event::PatternSearch(_) => "pattern_search",
            Event::If(_) => "if",
            Event::Wait { .. } => "wait",
            Event::Goto(_) => "goto",
            Event::Checkpoint { .. } => "checkpoint",
            Event::Unrecognized(_) => "unrecognized",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::KeyPress(key) => write!(f, "Key pressed: {key}"),
            Event::KeyRelease(key) => write!(f, "Key released: {key}"),
            Event::MouseMove(p) => write!(f, "Mouse moved to: {p}"),
            Event::MouseScroll { direction, at } => {
                write!(f, "Mouse scrolled {}", direction.as_str())?;
                write_at(f, *at)
            }
            Event::MouseButton { side, action, at } => {
                write!(f, "Mouse Button.{} {}", side.as_str(), action.as_str())?;
                write_at(f, *at)
            }
            Event::Vision(v) => v.fmt(f),
            Event::PatternSearch(p) => p.fmt(f),
            Event::If(i) => i.fmt(f),
            Event::Wait { seconds } => write!(f, "Wait: {}s", fmt_float(*seconds)),
            Event::Goto(g) => g.fmt(f),
            Event::Checkpoint { name } => write!(f, "Checkpoint: {name}"),
            Event::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

fn write_at(f: &mut fmt::Formatter<'_>, at: Option<Point>) -> fmt::Result {
    match at {
        Some(p) => write!(f, " at: {p}"),
        None => Ok(()),
    }
}

/// Render a float the way the editor does (`3.0`, `0.85`).
pub(crate) fn fmt_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Key identifier of a key event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyToken {
    /// A printable character, written quoted (`'a'`) or bare (`a`).
    Char { ch: char, quoted: bool },
    /// A symbolic key such as `Key.enter` (stored without the `Key.` prefix).
    Named(String),
}

impl fmt::Display for KeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyToken::Char { ch: '\'', quoted: true } => f.write_str("\"'\""),
            KeyToken::Char { ch: '\\', quoted: true } => f.write_str("'\\\\'"),
            KeyToken::Char { ch, quoted: true } => write!(f, "'{ch}'"),
            KeyToken::Char { ch, quoted: false } => write!(f, "{ch}"),
            KeyToken::Named(name) => write!(f, "Key.{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseSide {
    Left,
    Right,
}

impl MouseSide {
    pub fn as_str(self) -> &'static str {
        match self {
            MouseSide::Left => "left",
            MouseSide::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Pressed,
    Released,
}

impl ButtonAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ButtonAction::Pressed => "pressed",
            ButtonAction::Released => "released",
        }
    }
}

/// Backend that answers a vision event. Resolved from the provider name once,
/// at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionProvider {
    Azure,
    ChatGpt,
    LocalOcr,
}

impl VisionProvider {
    /// Case-insensitive lookup of an editor provider name.
    pub fn from_name(name: &str) -> Result<Self, ParseError> {
        match name.trim().to_lowercase().as_str() {
            "azure" => Ok(VisionProvider::Azure),
            "chatgpt" => Ok(VisionProvider::ChatGpt),
            "local ocr" | "local_ocr" | "local" => Ok(VisionProvider::LocalOcr),
            _ => Err(ParseError::UnknownProvider(name.trim().to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VisionProvider::Azure => "Azure",
            VisionProvider::ChatGpt => "ChatGPT",
            VisionProvider::LocalOcr => "Local OCR",
        }
    }
}

impl fmt::Display for VisionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Image AI - ...` (or legacy `OCR Search - ...`): capture an area, ask a
/// vision backend about it and store the answer in a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionEvent {
    pub provider: VisionProvider,
    pub feature: String,
    pub area: Region,
    /// Optional `Wait: <n>s` field the editor writes; not used for pacing.
    pub wait: Option<f64>,
    pub variable: String,
    /// Prompt (ChatGPT) or expected text; may be empty.
    pub content: String,
    /// Written in the legacy `OCR Search` form.
    pub legacy: bool,
}

impl fmt::Display for VisionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.legacy {
            return write!(
                f,
                "OCR Search - Area: {}, Wait: {}s, Variable: {}, Variable Content: {}",
                self.area,
                fmt_float(self.wait.unwrap_or(0.0)),
                self.variable,
                self.content
            );
        }
        write!(
            f,
            "Image AI - Provider: {}, Feature: {}, Area: {}, ",
            self.provider, self.feature, self.area
        )?;
        if let Some(wait) = self.wait {
            write!(f, "Wait: {}s, ", fmt_float(wait))?;
        }
        write!(
            f,
            "Variable: {}, Variable Content: {}",
            self.variable, self.content
        )
    }
}

/// Where a pattern search looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchArea {
    FullScreen,
    Region(Region),
}

impl fmt::Display for SearchArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchArea::FullScreen => f.write_str("Full Screen"),
            SearchArea::Region(r) => r.fmt(f),
        }
    }
}

/// Branch destination of a conditional or pattern event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Continue with the following line.
    Next,
    Checkpoint(String),
}

impl Target {
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label == "Next" {
            Target::Next
        } else {
            Target::Checkpoint(label.to_string())
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Next => f.write_str("Next"),
            Target::Checkpoint(name) => f.write_str(name),
        }
    }
}

/// Optional notification names attached to a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchNotifications {
    pub succeed: Option<String>,
    pub fail: Option<String>,
}

impl BranchNotifications {
    /// Notification to fire for the given branch outcome. The editor's
    /// `None` placeholder counts as absent.
    pub fn for_outcome(&self, succeeded: bool) -> Option<&str> {
        let name = if succeeded { &self.succeed } else { &self.fail };
        name.as_deref().filter(|n| !n.is_empty() && *n != "None")
    }
}

impl fmt::Display for BranchNotifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.succeed {
            write!(f, ", Succeed Notification: {name}")?;
        }
        if let Some(name) = &self.fail {
            write!(f, ", Fail Notification: {name}")?;
        }
        Ok(())
    }
}

/// `Search Pattern - ...`: look for a template image on screen and branch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSearchEvent {
    /// Base64-encoded template image.
    pub image: String,
    pub area: SearchArea,
    pub succeed: Target,
    pub fail: Target,
    pub click: bool,
    /// Search budget in seconds.
    pub wait: f64,
    pub threshold: f64,
    pub scene_change: bool,
    pub notifications: BranchNotifications,
}

impl fmt::Display for PatternSearchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Search Pattern - Image: {}, Search Area: {}, Succeed Go To: {}, Fail Go To: {}, \
             Click: {}, Wait: {}s, Threshold: {}, Scene Change: {}{}",
            self.image,
            self.area,
            self.succeed,
            self.fail,
            py_bool(self.click),
            fmt_float(self.wait),
            fmt_float(self.threshold),
            py_bool(self.scene_change),
            self.notifications
        )
    }
}

fn py_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

/// Operator of an `If` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
    Ne,
    Contains,
    /// Divisibility test: `int(variable) % int(value) == 0`.
    Modulo,
}

impl Comparison {
    pub fn from_token(token: &str) -> Result<Self, ParseError> {
        Ok(match token {
            "==" => Comparison::Eq,
            ">" => Comparison::Gt,
            "<" => Comparison::Lt,
            ">=" => Comparison::Ge,
            "<=" => Comparison::Le,
            "!=" => Comparison::Ne,
            "Contains" => Comparison::Contains,
            "%" => Comparison::Modulo,
            other => return Err(ParseError::UnknownOperator(other.to_string())),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Ge => ">=",
            Comparison::Le => "<=",
            Comparison::Ne => "!=",
            Comparison::Contains => "Contains",
            Comparison::Modulo => "%",
        }
    }
}

/// `If <variable> <op> <value>, ...`: compare a variable and branch.
#[derive(Debug, Clone, PartialEq)]
pub struct IfEvent {
    pub variable: String,
    pub op: Comparison,
    pub value: String,
    pub succeed: Target,
    pub fail: Target,
    /// Stored by the editor; the engine does not wait on it.
    pub wait: f64,
    pub notifications: BranchNotifications,
}

impl fmt::Display for IfEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "If {} {} {}, Succeed Go To: {}, Fail Go To: {}, Wait: {}s{}",
            self.variable,
            self.op.as_str(),
            self.value,
            self.succeed,
            self.fail,
            fmt_float(self.wait),
            self.notifications
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GotoTarget {
    /// `Go To - Checkpoint: <name>`
    Checkpoint(String),
    /// `Go To - Target: <name>`, the editor's spelling of a checkpoint jump.
    Target(String),
    /// `Go To - Line: <index>`
    Line(i64),
}

/// `Go To - ...`: unconditional jump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GotoEvent {
    pub target: GotoTarget,
    /// Text of the destination line when the jump was authored.
    pub element: Option<String>,
}

impl fmt::Display for GotoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            GotoTarget::Checkpoint(name) => write!(f, "Go To - Checkpoint: {name}")?,
            GotoTarget::Target(name) => write!(f, "Go To - Target: {name}")?,
            GotoTarget::Line(line) => write!(f, "Go To - Line: {line}")?,
        }
        if let Some(element) = &self.element {
            write!(f, ", Element: {element}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_render_like_the_editor() {
        assert_eq!(fmt_float(3.0), "3.0");
        assert_eq!(fmt_float(0.85), "0.85");
        assert_eq!(fmt_float(12.5), "12.5");
    }

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(VisionProvider::from_name("AZURE").unwrap(), VisionProvider::Azure);
        assert_eq!(VisionProvider::from_name("ChatGPT").unwrap(), VisionProvider::ChatGpt);
        assert_eq!(VisionProvider::from_name("local_ocr").unwrap(), VisionProvider::LocalOcr);
        assert_eq!(VisionProvider::from_name("Local OCR").unwrap(), VisionProvider::LocalOcr);
        assert_eq!(
            VisionProvider::from_name("grok"),
            Err(ParseError::UnknownProvider("grok".into()))
        );
    }

    #[test]
    fn none_notification_is_not_fired() {
        let n = BranchNotifications {
            succeed: Some("None".into()),
            fail: Some("pager".into()),
        };
        assert_eq!(n.for_outcome(true), None);
        assert_eq!(n.for_outcome(false), Some("pager"));
    }

    #[test]
    fn key_tokens_render() {
        assert_eq!(KeyToken::Char { ch: 'a', quoted: true }.to_string(), "'a'");
        assert_eq!(KeyToken::Char { ch: 'a', quoted: false }.to_string(), "a");
        assert_eq!(KeyToken::Named("enter".into()).to_string(), "Key.enter");
    }
}
