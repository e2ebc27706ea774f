use anyhow::{Context, Result};
use enigo::Keyboard as _;
use enigo::Mouse as _;
use enigo::{Axis, Button as EButton, Coordinate, Direction, Enigo, Key, Settings};
use tracing::{error, info, trace};

use super::collaborators::InputInjector;
use crate::events::{ButtonAction, KeyToken, MouseSide, Point, ScrollDirection};

/// Injects recorded input through Enigo, or only logs it in dry-run mode.
///
/// The Enigo connection is opened on first use, so a dry run never touches
/// the display server.
pub struct EnigoInjector {
    dry_run: bool,
    enigo: Option<Enigo>,
}

impl EnigoInjector {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            enigo: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn key(&mut self, token: &KeyToken, direction: Direction) -> Result<()> {
        let Some(key) = map_key(token) else {
            // Unknown symbolic keys are skipped; the macro keeps going.
            error!(target: "aimacro::input", key = %token, "Key not recognized");
            return Ok(());
        };
        if self.dry_run {
            info!(target: "aimacro::input", key = %token, ?direction, "DRY-RUN key");
            return Ok(());
        }
        let enigo = self.ensure_enigo()?;
        trace!(target: "aimacro::input", key = %token, ?direction, "key");
        enigo
            .key(key, direction)
            .with_context(|| format!("Failed to send {direction:?} for key {token}"))?;
        Ok(())
    }

    fn move_to(&mut self, to: Point) -> Result<()> {
        let enigo = self.ensure_enigo()?;
        enigo
            .move_mouse(to.x, to.y, Coordinate::Abs)
            .with_context(|| format!("Failed to move mouse to {to}"))?;
        Ok(())
    }

    fn ensure_enigo(&mut self) -> Result<&mut Enigo> {
        if self.enigo.is_none() {
            trace!(target: "aimacro::input", "Initializing Enigo");
            self.enigo =
                Some(Enigo::new(&Settings::default()).context("Failed to initialize Enigo")?);
        }
        self.enigo.as_mut().context("Enigo connection unavailable")
    }
}

impl InputInjector for EnigoInjector {
    fn press_key(&mut self, key: &KeyToken) -> Result<()> {
        self.key(key, Direction::Press)
    }

    fn release_key(&mut self, key: &KeyToken) -> Result<()> {
        self.key(key, Direction::Release)
    }

    fn move_mouse(&mut self, to: Point) -> Result<()> {
        if self.dry_run {
            info!(target: "aimacro::input", %to, "DRY-RUN mouse_move");
            return Ok(());
        }
        trace!(target: "aimacro::input", %to, "mouse_move");
        self.move_to(to)
    }

    fn scroll(&mut self, direction: ScrollDirection, at: Option<Point>) -> Result<()> {
        if self.dry_run {
            info!(target: "aimacro::input", direction = direction.as_str(), ?at, "DRY-RUN scroll");
            return Ok(());
        }
        if let Some(at) = at {
            self.move_to(at)?;
        }
        let amount = match direction {
            ScrollDirection::Up => -1,
            ScrollDirection::Down => 1,
        };
        trace!(target: "aimacro::input", direction = direction.as_str(), ?at, "scroll");
        self.ensure_enigo()?
            .scroll(amount, Axis::Vertical)
            .context("Failed to scroll")?;
        Ok(())
    }

    fn mouse_button(&mut self, side: MouseSide, action: ButtonAction, at: Option<Point>) -> Result<()> {
        if self.dry_run {
            info!(
                target: "aimacro::input",
                side = side.as_str(),
                action = action.as_str(),
                ?at,
                "DRY-RUN mouse_button"
            );
            return Ok(());
        }
        if let Some(at) = at {
            self.move_to(at)?;
        }
        let button = match side {
            MouseSide::Left => EButton::Left,
            MouseSide::Right => EButton::Right,
        };
        let direction = match action {
            ButtonAction::Pressed => Direction::Press,
            ButtonAction::Released => Direction::Release,
        };
        trace!(target: "aimacro::input", side = side.as_str(), action = action.as_str(), ?at, "mouse_button");
        self.ensure_enigo()?
            .button(button, direction)
            .with_context(|| format!("Failed to {} {} button", action.as_str(), side.as_str()))?;
        Ok(())
    }
}

/// Enigo key for a recorded token. Symbolic names follow the recorder's
/// naming (`Key.enter`, `Key.ctrl_l`, `Key.f5`); left/right variants map to
/// the generic modifier.
fn map_key(token: &KeyToken) -> Option<Key> {
    let name = match token {
        KeyToken::Char { ch, .. } => return Some(Key::Unicode(*ch)),
        KeyToken::Named(name) => name.as_str(),
    };
    let key = match name {
        "alt" | "alt_l" | "alt_r" | "alt_gr" => Key::Alt,
        "backspace" => Key::Backspace,
        "caps_lock" => Key::CapsLock,
        "cmd" | "cmd_l" | "cmd_r" => Key::Meta,
        "ctrl" | "ctrl_l" | "ctrl_r" => Key::Control,
        "delete" => Key::Delete,
        "down" => Key::DownArrow,
        "end" => Key::End,
        "enter" => Key::Return,
        "esc" => Key::Escape,
        "home" => Key::Home,
        "left" => Key::LeftArrow,
        "page_down" => Key::PageDown,
        "page_up" => Key::PageUp,
        "right" => Key::RightArrow,
        "shift" | "shift_l" | "shift_r" => Key::Shift,
        "space" => Key::Space,
        "tab" => Key::Tab,
        "up" => Key::UpArrow,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "f13" => Key::F13,
        "f14" => Key::F14,
        "f15" => Key::F15,
        "f16" => Key::F16,
        "f17" => Key::F17,
        "f18" => Key::F18,
        "f19" => Key::F19,
        "f20" => Key::F20,
        "media_play_pause" => Key::MediaPlayPause,
        "media_next" => Key::MediaNextTrack,
        "media_previous" => Key::MediaPrevTrack,
        "media_volume_up" => Key::VolumeUp,
        "media_volume_down" => Key::VolumeDown,
        "media_volume_mute" => Key::VolumeMute,
        other => return platform_key(other),
    };
    Some(key)
}

/// Keys enigo only offers on Windows and X11/Wayland.
#[cfg(any(target_os = "windows", all(unix, not(target_os = "macos"))))]
fn platform_key(name: &str) -> Option<Key> {
    let key = match name {
        "insert" => Key::Insert,
        "num_lock" => Key::Numlock,
        "print_screen" => Key::PrintScr,
        "pause" => Key::Pause,
        #[cfg(target_os = "windows")]
        "menu" => Key::Apps,
        #[cfg(not(target_os = "windows"))]
        "menu" => Key::LMenu,
        #[cfg(target_os = "windows")]
        "scroll_lock" => Key::Scroll,
        #[cfg(not(target_os = "windows"))]
        "scroll_lock" => Key::ScrollLock,
        _ => return None,
    };
    Some(key)
}

#[cfg(not(any(target_os = "windows", all(unix, not(target_os = "macos")))))]
fn platform_key(_name: &str) -> Option<Key> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_characters_and_named_keys() {
        let quoted = KeyToken::Char { ch: 'a', quoted: true };
        assert_eq!(map_key(&quoted), Some(Key::Unicode('a')));
        assert_eq!(map_key(&KeyToken::Named("enter".into())), Some(Key::Return));
        assert_eq!(map_key(&KeyToken::Named("ctrl_l".into())), Some(Key::Control));
        assert_eq!(map_key(&KeyToken::Named("f5".into())), Some(Key::F5));
        assert_eq!(map_key(&KeyToken::Named("hyper_x".into())), None);
    }

    #[test]
    fn maps_function_row_and_media_keys() {
        let named = |name: &str| map_key(&KeyToken::Named(name.into()));
        assert_eq!(named("f13"), Some(Key::F13));
        assert_eq!(named("f20"), Some(Key::F20));
        assert_eq!(named("f21"), None);
        assert_eq!(named("media_play_pause"), Some(Key::MediaPlayPause));
        assert_eq!(named("media_previous"), Some(Key::MediaPrevTrack));
        assert_eq!(named("media_volume_mute"), Some(Key::VolumeMute));
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    #[test]
    fn maps_editing_and_lock_keys() {
        let named = |name: &str| map_key(&KeyToken::Named(name.into()));
        assert_eq!(named("insert"), Some(Key::Insert));
        assert_eq!(named("menu"), Some(Key::LMenu));
        assert_eq!(named("num_lock"), Some(Key::Numlock));
        assert_eq!(named("print_screen"), Some(Key::PrintScr));
        assert_eq!(named("pause"), Some(Key::Pause));
        assert_eq!(named("scroll_lock"), Some(Key::ScrollLock));
    }

    #[test]
    fn dry_run_never_opens_a_connection() {
        let mut input = EnigoInjector::new(true);
        input.press_key(&KeyToken::Named("enter".into())).unwrap();
        input.move_mouse(Point::new(10, 20)).unwrap();
        input.scroll(ScrollDirection::Up, Some(Point::new(1, 1))).unwrap();
        input.click(Point::new(5, 5)).unwrap();
        assert!(input.is_dry_run());
        assert!(input.enigo.is_none());
    }

    #[test]
    fn unknown_key_is_skipped() {
        let mut input = EnigoInjector::new(false);
        input.press_key(&KeyToken::Named("not_a_key".into())).unwrap();
        assert!(input.enigo.is_none());
    }
}
