//! Terminal renderer using crossterm
//!
//! Draws the emulator grid into the host terminal and keeps one status
//! line at the bottom of the screen.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
    style::{
        Attribute, Color as TermColor, ResetColor, SetAttribute, SetBackgroundColor,
        SetForegroundColor,
    },
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::core::term::{Color, Screen, Style, StyleFlags};

/// Coloring of the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    /// Nothing running.
    Neutral,
    /// Connecting.
    Busy,
    /// Connected.
    Good,
    /// Disconnected by error or remote close.
    Bad,
}

/// Terminal renderer
pub struct Renderer {
    initialized: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Initialize the host terminal for rendering.
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        // Synchronized output mode (reduces flicker)
        write!(stdout, "\x1b[?2026h")?;
        stdout.flush()?;
        self.initialized = true;
        Ok(())
    }

    /// Restore the host terminal.
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, Show);
        let _ = execute!(stdout, EnableLineWrap);
        let _ = execute!(stdout, LeaveAlternateScreen);
        let _ = stdout.flush();

        // The most important part: give the shell its terminal back
        terminal::disable_raw_mode()?;
        println!();
        Ok(())
    }

    /// Render the grid (when present) and the status line (when shown).
    ///
    /// With no live emulator the previous grid content is left on
    /// screen, so a parting diagnostic stays visible after teardown.
    pub fn render(
        &mut self,
        screen: Option<&Screen>,
        status: Option<(&str, StatusTone)>,
    ) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());

        // Begin synchronized update
        write!(out, "\x1b[?2026h")?;
        execute!(out, Hide)?;

        if let Some(screen) = screen {
            if screen.grid().needs_full_redraw() {
                self.draw_full(&mut out, screen)?;
            } else if screen.grid().has_changes() {
                self.draw_dirty(&mut out, screen)?;
            }
        }

        if let Some((status, tone)) = status {
            let (cols, rows) = terminal::size()?;
            self.draw_status(&mut out, status, tone, cols, rows.saturating_sub(1))?;
        }

        match screen {
            Some(screen) if screen.cursor.visible => {
                execute!(out, MoveTo(screen.cursor.col, screen.cursor.row), Show)?;
            }
            _ => {
                execute!(out, Hide)?;
            }
        }

        // End synchronized update
        write!(out, "\x1b[?2026l")?;
        out.flush()
    }

    fn draw_full<W: Write>(&self, out: &mut W, screen: &Screen) -> io::Result<()> {
        for row in 0..screen.rows as usize {
            self.draw_line(out, screen, row)?;
        }
        execute!(out, ResetColor, SetAttribute(Attribute::Reset))
    }

    fn draw_dirty<W: Write>(&self, out: &mut W, screen: &Screen) -> io::Result<()> {
        let mut dirty: Vec<_> = screen.grid().dirty_lines().collect();
        dirty.sort_unstable();
        for row in dirty {
            if row < screen.rows as usize {
                self.draw_line(out, screen, row)?;
            }
        }
        execute!(out, ResetColor, SetAttribute(Attribute::Reset))
    }

    fn draw_line<W: Write>(&self, out: &mut W, screen: &Screen, row: usize) -> io::Result<()> {
        let Some(line) = screen.grid().line(row) else {
            return Ok(());
        };

        execute!(out, MoveTo(0, row as u16))?;
        write!(out, "\x1b[K")?;

        // Batch runs of identically styled cells into one write
        let mut run = String::with_capacity(256);
        let mut run_style = Style::default();
        let mut col: u16 = 0;

        for cell in line {
            if col >= screen.cols {
                break;
            }
            if cell.is_spacer() {
                col += 1;
                continue;
            }
            if cell.style != run_style && !run.is_empty() {
                self.apply_style(out, &run_style)?;
                write!(out, "{}", run)?;
                run.clear();
            }
            if cell.style != run_style {
                run_style = cell.style.clone();
            }
            run.push_str(cell.display());
            col += cell.width.max(1) as u16;
        }

        if !run.is_empty() {
            self.apply_style(out, &run_style)?;
            write!(out, "{}", run)?;
        }
        Ok(())
    }

    fn draw_status<W: Write>(
        &self,
        out: &mut W,
        status: &str,
        tone: StatusTone,
        cols: u16,
        row: u16,
    ) -> io::Result<()> {
        let (bg, fg) = match tone {
            StatusTone::Neutral => (TermColor::DarkGrey, TermColor::White),
            StatusTone::Busy => (TermColor::DarkYellow, TermColor::Black),
            StatusTone::Good => (TermColor::DarkGreen, TermColor::White),
            StatusTone::Bad => (TermColor::DarkRed, TermColor::White),
        };
        execute!(out, MoveTo(0, row), SetBackgroundColor(bg), SetForegroundColor(fg))?;

        let text: String = format!(" {}", status)
            .chars()
            .take(cols as usize)
            .collect();
        let padding = (cols as usize).saturating_sub(text.chars().count());
        write!(out, "{}{}", text, " ".repeat(padding))?;
        execute!(out, ResetColor, SetAttribute(Attribute::Reset))
    }

    fn apply_style<W: Write>(&self, out: &mut W, style: &Style) -> io::Result<()> {
        execute!(out, SetAttribute(Attribute::Reset))?;

        if style.flags.contains(StyleFlags::BOLD) {
            execute!(out, SetAttribute(Attribute::Bold))?;
        }
        if style.flags.contains(StyleFlags::DIM) {
            execute!(out, SetAttribute(Attribute::Dim))?;
        }
        if style.flags.contains(StyleFlags::ITALIC) {
            execute!(out, SetAttribute(Attribute::Italic))?;
        }
        if style.flags.contains(StyleFlags::UNDERLINE) {
            execute!(out, SetAttribute(Attribute::Underlined))?;
        }
        if style.flags.contains(StyleFlags::BLINK) {
            execute!(out, SetAttribute(Attribute::SlowBlink))?;
        }
        if style.flags.contains(StyleFlags::REVERSE) {
            execute!(out, SetAttribute(Attribute::Reverse))?;
        }
        if style.flags.contains(StyleFlags::HIDDEN) {
            execute!(out, SetAttribute(Attribute::Hidden))?;
        }
        if style.flags.contains(StyleFlags::STRIKE) {
            execute!(out, SetAttribute(Attribute::CrossedOut))?;
        }

        let fg = to_term_color(style.fg);
        if fg != TermColor::Reset {
            execute!(out, SetForegroundColor(fg))?;
        }
        let bg = to_term_color(style.bg);
        if bg != TermColor::Reset {
            execute!(out, SetBackgroundColor(bg))?;
        }
        Ok(())
    }

    /// Host terminal size.
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn to_term_color(color: Color) -> TermColor {
    match color {
        Color::Default => TermColor::Reset,
        Color::Ansi(n) => TermColor::AnsiValue(n),
        Color::Rgb(r, g, b) => TermColor::Rgb { r, g, b },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mapping() {
        assert_eq!(to_term_color(Color::Default), TermColor::Reset);
        assert_eq!(to_term_color(Color::Ansi(3)), TermColor::AnsiValue(3));
        assert_eq!(
            to_term_color(Color::Rgb(1, 2, 3)),
            TermColor::Rgb { r: 1, g: 2, b: 3 }
        );
    }
}
