//! Keyboard input observed while a statement is running
//!
//! The controller polls an [`InputSource`] for single key bytes and maps them
//! to an [`Interrupt`]. The terminal implementation reads crossterm events,
//! which requires raw mode for the duration of the wait (see [`RawModeGuard`]).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tracing::{debug, warn};

/// What a key press asks the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Stop the statement
    Cancel,
    /// Return to the prompt and leave the statement running
    Detach,
}

impl Interrupt {
    /// Cancel keys: Ctrl-C, Ctrl-D, Ctrl-Q and Escape.
    pub fn cancel_key(key: u8) -> Option<Self> {
        match key {
            0x03 | 0x04 | 0x11 | 0x1b => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Cancel keys plus Enter (carriage return or line feed) for detaching.
    pub fn cancel_or_detach_key(key: u8) -> Option<Self> {
        match key {
            0x0d | 0x0a => Some(Self::Detach),
            _ => Self::cancel_key(key),
        }
    }
}

/// Non-blocking source of raw key bytes.
pub trait InputSource: Send + Sync {
    /// Returns the next pending key, or `None` when nothing was pressed.
    fn read_key(&self) -> Option<u8>;
}

/// Reads key presses from the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalInput;

impl TerminalInput {
    pub fn new() -> Self {
        Self
    }
}

impl InputSource for TerminalInput {
    fn read_key(&self) -> Option<u8> {
        match event::poll(Duration::ZERO) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                debug!("Terminal poll failed: {}", e);
                return None;
            }
        }

        match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                key_to_byte(key.code, key.modifiers)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Terminal read failed: {}", e);
                None
            }
        }
    }
}

/// Maps a crossterm key to the byte a raw terminal would have produced.
fn key_to_byte(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    match code {
        KeyCode::Enter => Some(0x0d),
        KeyCode::Esc => Some(0x1b),
        KeyCode::Char(c)
            if modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() =>
        {
            Some((c.to_ascii_lowercase() as u8) - b'a' + 1)
        }
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        _ => None,
    }
}

/// Keeps the terminal in raw mode until dropped.
///
/// Enabling can fail when stdin is not a terminal; the guard then does
/// nothing on drop.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        match terminal::enable_raw_mode() {
            Ok(()) => Self { enabled: true },
            Err(e) => {
                debug!("Raw mode unavailable: {}", e);
                Self { enabled: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = terminal::disable_raw_mode() {
                warn!("Failed to restore terminal mode: {}", e);
            }
        }
    }
}

/// Replays a fixed key sequence, each key becoming readable after its delay
/// from construction. Used by tests and the non-interactive `-e` mode.
#[derive(Debug)]
pub struct ScriptedInput {
    started: Instant,
    keys: Mutex<VecDeque<(Duration, u8)>>,
}

impl ScriptedInput {
    pub fn new(keys: impl IntoIterator<Item = (Duration, u8)>) -> Self {
        Self {
            started: Instant::now(),
            keys: Mutex::new(keys.into_iter().collect()),
        }
    }

    /// A source that never produces a key.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }
}

impl InputSource for ScriptedInput {
    fn read_key(&self) -> Option<u8> {
        let mut keys = self
            .keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match keys.front() {
            Some((after, _)) if self.started.elapsed() >= *after => {
                keys.pop_front().map(|(_, k)| k)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_keys() {
        for key in [0x03, 0x04, 0x11, 0x1b] {
            assert_eq!(Interrupt::cancel_key(key), Some(Interrupt::Cancel));
            assert_eq!(Interrupt::cancel_or_detach_key(key), Some(Interrupt::Cancel));
        }
        assert_eq!(Interrupt::cancel_key(b'q'), None);
    }

    #[test]
    fn test_enter_only_detaches_when_allowed() {
        assert_eq!(Interrupt::cancel_key(0x0d), None);
        assert_eq!(Interrupt::cancel_or_detach_key(0x0d), Some(Interrupt::Detach));
        assert_eq!(Interrupt::cancel_or_detach_key(0x0a), Some(Interrupt::Detach));
        assert_eq!(Interrupt::cancel_or_detach_key(b' '), None);
    }

    #[test]
    fn test_key_to_byte() {
        assert_eq!(key_to_byte(KeyCode::Char('c'), KeyModifiers::CONTROL), Some(0x03));
        assert_eq!(key_to_byte(KeyCode::Char('D'), KeyModifiers::CONTROL), Some(0x04));
        assert_eq!(key_to_byte(KeyCode::Char('q'), KeyModifiers::CONTROL), Some(0x11));
        assert_eq!(key_to_byte(KeyCode::Enter, KeyModifiers::NONE), Some(0x0d));
        assert_eq!(key_to_byte(KeyCode::Esc, KeyModifiers::NONE), Some(0x1b));
        assert_eq!(key_to_byte(KeyCode::Char('x'), KeyModifiers::NONE), Some(b'x'));
        assert_eq!(key_to_byte(KeyCode::Up, KeyModifiers::NONE), None);
    }

    #[test]
    fn test_scripted_input_respects_delays() {
        let input = ScriptedInput::new(vec![
            (Duration::ZERO, b'a'),
            (Duration::from_secs(3600), b'b'),
        ]);
        assert_eq!(input.read_key(), Some(b'a'));
        assert_eq!(input.read_key(), None);
        assert_eq!(ScriptedInput::silent().read_key(), None);
    }
}
