//! Key mapping for terminal input
//!
//! Sorts key events into local session controls and the characters
//! handed to the line discipline. The discipline itself decides what a
//! character means; this layer only normalizes Enter and Backspace to
//! their character codes and recognizes the control chords.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press means to the hosting loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    /// Feed this character to the session's line discipline.
    Char(char),
    /// Ctrl+S: start (or restart) the session.
    Start,
    /// Ctrl+X: stop the session.
    Stop,
    /// Ctrl+Q: quit the program.
    Quit,
    /// Not meaningful here.
    None,
}

/// Key mapper for converting key events to session input
pub struct KeyMapper;

impl KeyMapper {
    pub fn map(event: &KeyEvent) -> KeyInput {
        if event.modifiers.contains(KeyModifiers::CONTROL) {
            return match event.code {
                KeyCode::Char('s') | KeyCode::Char('S') => KeyInput::Start,
                KeyCode::Char('x') | KeyCode::Char('X') => KeyInput::Stop,
                KeyCode::Char('q') | KeyCode::Char('Q') => KeyInput::Quit,
                _ => KeyInput::None,
            };
        }

        match event.code {
            KeyCode::Enter => KeyInput::Char('\r'),
            KeyCode::Backspace => KeyInput::Char('\u{7f}'),
            KeyCode::Char(ch) if !event.modifiers.contains(KeyModifiers::ALT) => {
                KeyInput::Char(ch)
            }
            _ => KeyInput::None,
        }
    }
}
