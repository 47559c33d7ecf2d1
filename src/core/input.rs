//! Input line buffering
//!
//! Accumulates keystrokes into newline-terminated commands before
//! anything reaches the transport. The remote side does not echo input;
//! the visible characters come from local echo, and command results
//! arrive later as inbound transport text.

/// What the session should do with one keystroke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Send the finished command (trailing newline included), echo
    /// `\r\n`, and start a fresh line.
    Dispatch(String),
    /// Erase the last buffered character and one visible column.
    Erase,
    /// Append the character and echo it.
    Echo(char),
    /// Not part of the line discipline; no echo, no buffer change.
    Ignore,
}

const CR: u32 = 13;
const DEL: u32 = 127;

/// Pending command line, character-code driven.
///
/// Code 13 dispatches, 127 erases (no-op on an empty line), 32..=254
/// appends; everything else is ignored.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one keystroke through the discipline.
    pub fn push(&mut self, ch: char) -> KeyAction {
        match ch as u32 {
            CR => {
                let mut command = std::mem::take(&mut self.pending);
                command.push('\n');
                KeyAction::Dispatch(command)
            }
            DEL => {
                if self.pending.pop().is_some() {
                    KeyAction::Erase
                } else {
                    KeyAction::Ignore
                }
            }
            32..=254 => {
                self.pending.push(ch);
                KeyAction::Echo(ch)
            }
            _ => KeyAction::Ignore,
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    fn as_str(&self) -> &str {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_dispatches_buffered_command() {
        let mut line = LineBuffer::new();
        for ch in "ls -la".chars() {
            assert_eq!(line.push(ch), KeyAction::Echo(ch));
        }
        assert_eq!(line.push('\r'), KeyAction::Dispatch("ls -la\n".into()));
        assert!(line.is_empty());
    }

    #[test]
    fn enter_on_empty_line_sends_bare_newline() {
        let mut line = LineBuffer::new();
        assert_eq!(line.push('\r'), KeyAction::Dispatch("\n".into()));
    }

    #[test]
    fn backspace_removes_last_character() {
        let mut line = LineBuffer::new();
        line.push('a');
        line.push('b');
        assert_eq!(line.push('\u{7f}'), KeyAction::Erase);
        assert_eq!(line.as_str(), "a");
    }

    #[test]
    fn backspace_on_empty_buffer_is_ignored() {
        let mut line = LineBuffer::new();
        assert_eq!(line.push('\u{7f}'), KeyAction::Ignore);
        assert!(line.is_empty());
    }

    #[test]
    fn control_characters_are_ignored() {
        let mut line = LineBuffer::new();
        assert_eq!(line.push('\t'), KeyAction::Ignore);
        assert_eq!(line.push('\x03'), KeyAction::Ignore);
        assert_eq!(line.push('\x1b'), KeyAction::Ignore);
        assert!(line.is_empty());
    }

    #[test]
    fn characters_above_254_are_ignored() {
        let mut line = LineBuffer::new();
        assert_eq!(line.push('あ'), KeyAction::Ignore);
        // Latin-1 range still passes
        assert_eq!(line.push('é'), KeyAction::Echo('é'));
        assert_eq!(line.as_str(), "é");
    }

    #[test]
    fn clear_drops_pending_input() {
        let mut line = LineBuffer::new();
        line.push('x');
        line.clear();
        assert!(line.is_empty());
        assert_eq!(line.push('\u{7f}'), KeyAction::Ignore);
    }
}
