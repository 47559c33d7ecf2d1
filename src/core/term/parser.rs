//! VT sequence parser
//!
//! Parses ANSI/VT escape sequences and applies them to the screen.
//! Query sequences that would require an answer (DSR, DA) are consumed
//! and dropped: the only outbound frames on this wire are command lines
//! and the terminate control frame.

use super::state::{Color, Screen, StyleFlags};

/// Byte-driven escape sequence state machine.
pub struct Parser {
    state: State,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc: String,
}

#[derive(Clone, Copy, Default, PartialEq)]
enum State {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC seen inside an OSC string, waiting for the `\` of ST.
    OscEscape,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc: String::new(),
        }
    }

    /// Feed a single byte to the parser.
    pub fn feed(&mut self, byte: u8, screen: &mut Screen) {
        // C0 controls act anywhere except inside OSC strings
        if byte < 0x20 && self.state != State::OscString && self.state != State::OscEscape {
            match byte {
                0x1B => self.enter_escape(),
                0x07 => {} // BEL
                0x08 => screen.backspace(),
                0x09 => screen.horizontal_tab(),
                0x0A | 0x0B | 0x0C => screen.linefeed(),
                0x0D => screen.carriage_return(),
                _ => {}
            }
            return;
        }

        match self.state {
            State::Ground => self.ground(byte, screen),
            State::Escape => self.escape(byte, screen),
            State::EscapeIntermediate => self.escape_intermediate(byte),
            State::CsiEntry => self.csi_entry(byte, screen),
            State::CsiParam => self.csi_param(byte, screen),
            State::CsiIntermediate => self.csi_intermediate(byte, screen),
            State::OscString => self.osc_string(byte, screen),
            State::OscEscape => self.osc_escape(byte, screen),
        }
    }

    fn enter_escape(&mut self) {
        self.state = State::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8, screen: &mut Screen) {
        if byte >= 0x20 && byte != 0x7F {
            // Multi-byte UTF-8 is decoded before it reaches the parser;
            // anything arriving here is a single-byte character.
            screen.put_char(byte as char);
        }
    }

    fn escape(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'[' => {
                self.state = State::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = State::OscString;
                self.osc.clear();
            }
            b'7' => {
                screen.save_cursor();
                self.state = State::Ground;
            }
            b'8' => {
                screen.restore_cursor();
                self.state = State::Ground;
            }
            b'D' => {
                screen.index();
                self.state = State::Ground;
            }
            b'E' => {
                screen.carriage_return();
                screen.linefeed();
                self.state = State::Ground;
            }
            b'M' => {
                screen.reverse_index();
                self.state = State::Ground;
            }
            b'c' => {
                screen.full_reset();
                self.state = State::Ground;
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
            }
            _ => {
                self.state = State::Ground;
            }
        }
    }

    // Charset designations and friends; recognized, not acted on.
    fn escape_intermediate(&mut self, byte: u8) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            _ => self.state = State::Ground,
        }
    }

    fn csi_entry(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = State::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = State::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' => {
                self.intermediates.push(byte);
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7E => self.dispatch_csi(byte, screen),
            _ => {
                self.state = State::Ground;
            }
        }
    }

    fn csi_param(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            // Subparameter colons are treated as plain separators
            b';' | b':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.dispatch_csi(byte, screen);
            }
            _ => {
                self.state = State::Ground;
            }
        }
    }

    fn csi_intermediate(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => self.dispatch_csi(byte, screen),
            _ => self.state = State::Ground,
        }
    }

    fn osc_string(&mut self, byte: u8, screen: &mut Screen) {
        match byte {
            0x07 => {
                self.apply_osc(screen);
                self.state = State::Ground;
            }
            0x1B => {
                self.state = State::OscEscape;
            }
            0x9C => {
                self.apply_osc(screen);
                self.state = State::Ground;
            }
            _ => self.osc.push(byte as char),
        }
    }

    fn osc_escape(&mut self, byte: u8, screen: &mut Screen) {
        if byte == b'\\' {
            // ST (ESC \)
            self.apply_osc(screen);
            self.state = State::Ground;
        } else {
            // Not ST: close the OSC and reprocess as a fresh escape
            self.apply_osc(screen);
            self.enter_escape();
            self.escape(byte, screen);
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8, screen: &mut Screen) {
        let private = self.intermediates.contains(&b'?');
        let params = &self.params;
        let first = |def: u16| params.first().copied().unwrap_or(def);

        match (private, final_byte) {
            // Cursor movement
            (false, b'A') => screen.cursor_up(first(1).max(1)),
            (false, b'B') => screen.cursor_down(first(1).max(1)),
            (false, b'C') => screen.cursor_forward(first(1).max(1)),
            (false, b'D') => screen.cursor_back(first(1).max(1)),
            (false, b'E') => {
                screen.cursor_down(first(1).max(1));
                screen.carriage_return();
            }
            (false, b'F') => {
                screen.cursor_up(first(1).max(1));
                screen.carriage_return();
            }
            (false, b'G') => {
                let row = screen.cursor.row + 1;
                screen.cursor_goto(row, first(1));
            }
            (false, b'H') | (false, b'f') => {
                let row = first(1);
                let col = params.get(1).copied().unwrap_or(1);
                screen.cursor_goto(row, col);
            }
            (false, b'd') => {
                let col = screen.cursor.col + 1;
                screen.cursor_goto(first(1), col);
            }

            // Erase
            (false, b'J') => screen.erase_in_display(first(0)),
            (false, b'K') => screen.erase_in_line(first(0)),

            // Line and character edits
            (false, b'L') => screen.insert_lines(first(1).max(1)),
            (false, b'M') => screen.delete_lines(first(1).max(1)),
            (false, b'@') => screen.insert_chars(first(1).max(1)),
            (false, b'P') => screen.delete_chars(first(1).max(1)),
            (false, b'X') => screen.erase_chars(first(1).max(1)),

            // Scrolling
            (false, b'S') => screen.scroll_up(first(1).max(1)),
            (false, b'T') => screen.scroll_down(first(1).max(1)),
            (false, b'r') => {
                let top = first(1);
                let bottom = params.get(1).copied().unwrap_or(screen.rows);
                screen.set_scroll_region(top, bottom);
                screen.cursor_goto(1, 1);
            }

            // Attributes
            (false, b'm') => self.apply_sgr(screen),

            // Save/restore cursor
            (false, b's') => screen.save_cursor(),
            (false, b'u') => screen.restore_cursor(),

            // Queries (DSR, DA): parsed, never answered
            (false, b'n') | (false, b'c') => {}

            // DEC private modes
            (true, b'h') => {
                for &p in params {
                    screen.set_private_mode(p, true);
                }
            }
            (true, b'l') => {
                for &p in params {
                    screen.set_private_mode(p, false);
                }
            }

            // ANSI modes
            (false, b'h') => {
                for &p in params {
                    match p {
                        4 => screen.modes.insert = true,
                        20 => screen.modes.linefeed_newline = true,
                        _ => {}
                    }
                }
            }
            (false, b'l') => {
                for &p in params {
                    match p {
                        4 => screen.modes.insert = false,
                        20 => screen.modes.linefeed_newline = false,
                        _ => {}
                    }
                }
            }

            _ => {
                tracing::debug!(
                    "unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates,
                    params,
                    final_byte as char
                );
            }
        }

        self.state = State::Ground;
    }

    fn apply_sgr(&self, screen: &mut Screen) {
        if self.params.is_empty() {
            screen.pen.reset();
            return;
        }

        let mut iter = self.params.iter();
        while let Some(&param) = iter.next() {
            match param {
                0 => screen.pen.reset(),
                1 => screen.pen.flags |= StyleFlags::BOLD,
                2 => screen.pen.flags |= StyleFlags::DIM,
                3 => screen.pen.flags |= StyleFlags::ITALIC,
                4 => screen.pen.flags |= StyleFlags::UNDERLINE,
                5 => screen.pen.flags |= StyleFlags::BLINK,
                7 => screen.pen.flags |= StyleFlags::REVERSE,
                8 => screen.pen.flags |= StyleFlags::HIDDEN,
                9 => screen.pen.flags |= StyleFlags::STRIKE,

                22 => screen.pen.flags &= !(StyleFlags::BOLD | StyleFlags::DIM),
                23 => screen.pen.flags &= !StyleFlags::ITALIC,
                24 => screen.pen.flags &= !StyleFlags::UNDERLINE,
                25 => screen.pen.flags &= !StyleFlags::BLINK,
                27 => screen.pen.flags &= !StyleFlags::REVERSE,
                28 => screen.pen.flags &= !StyleFlags::HIDDEN,
                29 => screen.pen.flags &= !StyleFlags::STRIKE,

                30..=37 => screen.pen.fg = Color::Ansi((param - 30) as u8),
                38 => {
                    if let Some(color) = extended_color(&mut iter) {
                        screen.pen.fg = color;
                    }
                }
                39 => screen.pen.fg = Color::Default,

                40..=47 => screen.pen.bg = Color::Ansi((param - 40) as u8),
                48 => {
                    if let Some(color) = extended_color(&mut iter) {
                        screen.pen.bg = color;
                    }
                }
                49 => screen.pen.bg = Color::Default,

                90..=97 => screen.pen.fg = Color::Ansi((param - 90 + 8) as u8),
                100..=107 => screen.pen.bg = Color::Ansi((param - 100 + 8) as u8),

                _ => {}
            }
        }
    }

    fn apply_osc(&mut self, screen: &mut Screen) {
        // OSC payload is "code;text"
        if let Some(pos) = self.osc.find(';') {
            let (code, text) = self.osc.split_at(pos);
            match code {
                "0" | "1" | "2" => screen.title = text[1..].to_string(),
                _ => {}
            }
        }
    }
}

/// SGR 38/48 extension: `5;n` (256-color) or `2;r;g;b` (truecolor).
fn extended_color<'a>(iter: &mut impl Iterator<Item = &'a u16>) -> Option<Color> {
    match iter.next().copied() {
        Some(5) => iter.next().map(|&n| Color::Ansi(n as u8)),
        Some(2) => {
            let r = iter.next().copied().unwrap_or(0) as u8;
            let g = iter.next().copied().unwrap_or(0) as u8;
            let b = iter.next().copied().unwrap_or(0) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut Parser, screen: &mut Screen, bytes: &[u8]) {
        for &b in bytes {
            parser.feed(b, screen);
        }
    }

    #[test]
    fn cursor_position_sequence() {
        let mut screen = Screen::new(80, 24);
        let mut parser = Parser::new();
        feed(&mut parser, &mut screen, b"\x1b[5;10H");
        assert_eq!(screen.cursor.row, 4);
        assert_eq!(screen.cursor.col, 9);
    }

    #[test]
    fn sgr_sets_foreground() {
        let mut screen = Screen::new(80, 24);
        let mut parser = Parser::new();
        feed(&mut parser, &mut screen, b"\x1b[31m");
        assert_eq!(screen.pen.fg, Color::Ansi(1));
    }

    #[test]
    fn sgr_256_color() {
        let mut screen = Screen::new(80, 24);
        let mut parser = Parser::new();
        feed(&mut parser, &mut screen, b"\x1b[38;5;208m");
        assert_eq!(screen.pen.fg, Color::Ansi(208));
    }

    #[test]
    fn osc_sets_title() {
        let mut screen = Screen::new(80, 24);
        let mut parser = Parser::new();
        feed(&mut parser, &mut screen, b"\x1b]0;remote shell\x07");
        assert_eq!(screen.title, "remote shell");
    }

    #[test]
    fn device_status_query_is_dropped() {
        let mut screen = Screen::new(80, 24);
        let mut parser = Parser::new();
        // DSR must not disturb the grid or leave the parser stuck
        feed(&mut parser, &mut screen, b"\x1b[6nok");
        assert_eq!(screen.grid().line(0).unwrap()[0].display(), "o");
        assert_eq!(screen.grid().line(0).unwrap()[1].display(), "k");
    }

    #[test]
    fn erase_display_clears_grid() {
        let mut screen = Screen::new(10, 4);
        let mut parser = Parser::new();
        feed(&mut parser, &mut screen, b"hello\x1b[2J");
        assert_eq!(screen.grid().line(0).unwrap()[0].display(), " ");
    }
}
