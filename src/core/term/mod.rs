//! Terminal emulation: screen grid, escape sequence parser, and the
//! emulator facade the session controller owns.

pub mod parser;
pub mod state;

pub use parser::Parser;
pub use state::{Cell, Color, Cursor, Modes, Screen, Style, StyleFlags};

/// The emulator half of a session: a screen grid driven by a VT parser.
///
/// Inbound transport text and local echo share the same write path, so
/// control sequences behave identically for both.
pub struct Emulator {
    screen: Screen,
    parser: Parser,
}

impl Emulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            screen: Screen::new(cols, rows),
            parser: Parser::new(),
        }
    }

    /// Write text verbatim into the grid, interpreting escape sequences.
    pub fn feed(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_ascii() {
                self.parser.feed(ch as u8, &mut self.screen);
            } else {
                self.screen.put_char(ch);
            }
        }
    }

    /// Erase one visible column (the echo for a backspace keystroke).
    pub fn erase_column(&mut self) {
        self.feed("\x08 \x08");
    }

    /// Re-fit the grid to a new viewport size.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.screen.resize(cols, rows);
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(emulator: &Emulator, row: usize) -> String {
        emulator
            .screen()
            .grid()
            .line(row)
            .unwrap()
            .iter()
            .filter(|c| !c.is_spacer())
            .map(|c| c.display())
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn feed_writes_plain_text() {
        let mut emulator = Emulator::new(20, 4);
        emulator.feed("hi\r\nthere");
        assert_eq!(line_text(&emulator, 0), "hi");
        assert_eq!(line_text(&emulator, 1), "there");
    }

    #[test]
    fn feed_interprets_colors() {
        let mut emulator = Emulator::new(20, 4);
        emulator.feed("\x1b[31mred");
        let cell = &emulator.screen().grid().line(0).unwrap()[0];
        assert_eq!(cell.style.fg, Color::Ansi(1));
    }

    #[test]
    fn erase_column_removes_last_echo() {
        let mut emulator = Emulator::new(20, 4);
        emulator.feed("ab");
        emulator.erase_column();
        assert_eq!(line_text(&emulator, 0), "a");
        assert_eq!(emulator.screen().cursor.col, 1);
    }

    #[test]
    fn non_ascii_text_renders() {
        let mut emulator = Emulator::new(20, 4);
        emulator.feed("日本語");
        assert_eq!(line_text(&emulator, 0), "日本語");
    }
}
