//! Terminal screen state
//!
//! The in-memory character grid the remote shell draws into: cells,
//! cursor, attributes, modes, and the dirty-line bookkeeping the
//! renderer consumes.

use bitflags::bitflags;
use std::collections::HashSet;
use unicode_width::UnicodeWidthChar;

/// Full screen state: main and alternate grids plus cursor and modes.
pub struct Screen {
    pub cols: u16,
    pub rows: u16,
    main: Grid,
    alt: Grid,
    alt_active: bool,
    pub cursor: Cursor,
    saved: Option<SavedCursor>,
    /// Attributes applied to newly written cells.
    pub pen: Style,
    pub modes: Modes,
    pub title: String,
    /// Scroll region (top, bottom), 0-indexed, inclusive.
    scroll_region: (u16, u16),
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            main: Grid::new(cols, rows),
            alt: Grid::new(cols, rows),
            alt_active: false,
            cursor: Cursor::default(),
            saved: None,
            pen: Style::default(),
            modes: Modes::default(),
            title: String::from("wsterm"),
            scroll_region: (0, rows - 1),
        }
    }

    pub fn grid(&self) -> &Grid {
        if self.alt_active {
            &self.alt
        } else {
            &self.main
        }
    }

    pub fn grid_mut(&mut self) -> &mut Grid {
        if self.alt_active {
            &mut self.alt
        } else {
            &mut self.main
        }
    }

    /// Recompute the grid for a new viewport size.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        self.cols = cols;
        self.rows = rows;
        self.main.resize(cols, rows);
        self.alt.resize(cols, rows);
        self.scroll_region = (0, rows - 1);
        self.cursor.col = self.cursor.col.min(cols - 1);
        self.cursor.row = self.cursor.row.min(rows - 1);
    }

    /// Write a character at the cursor, honoring wrap and wide cells.
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining mark: attach to the cell just written
            self.attach_combining(ch);
            return;
        }

        if self.cursor.col >= self.cols {
            if self.modes.autowrap {
                self.cursor.col = 0;
                self.linefeed();
            } else {
                self.cursor.col = self.cols - 1;
            }
        }

        let (row, col) = (self.cursor.row as usize, self.cursor.col as usize);
        if col >= self.cols as usize {
            return;
        }

        self.clear_wide_overlap(row, col);

        let pen = self.pen.clone();
        let cols = self.cols as usize;
        let grid = self.grid_mut();
        grid.line_mut(row)[col] = Cell::glyph(ch, width as u8, &pen);
        if width == 2 && col + 1 < cols {
            grid.line_mut(row)[col + 1] = Cell::spacer(&pen);
        }
        grid.touch(row);

        self.cursor.col += width;
    }

    fn attach_combining(&mut self, ch: char) {
        let (row, col) = (self.cursor.row as usize, self.cursor.col as usize);
        if col > 0 {
            let grid = self.grid_mut();
            grid.line_mut(row)[col - 1].text.push(ch);
            grid.touch(row);
        }
    }

    // Writing over either half of a wide character blanks the other half.
    fn clear_wide_overlap(&mut self, row: usize, col: usize) {
        let pen = self.pen.clone();
        let cols = self.cols as usize;
        let grid = self.grid_mut();
        let line = grid.line_mut(row);
        if col > 0 && line[col].is_spacer() {
            line[col - 1] = Cell::glyph(' ', 1, &pen);
        }
        if line[col].width == 2 && col + 1 < cols {
            line[col + 1] = Cell::glyph(' ', 1, &pen);
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        let row = self.cursor.row as usize;
        self.grid_mut().touch(row);
    }

    /// Move down one line, scrolling the region when at its bottom.
    pub fn linefeed(&mut self) {
        if self.cursor.row >= self.scroll_region.1 {
            self.scroll_up(1);
        } else if self.cursor.row < self.rows - 1 {
            self.cursor.row += 1;
        }
    }

    pub fn backspace(&mut self) {
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    pub fn horizontal_tab(&mut self) {
        // Fixed tab stops every 8 columns
        self.cursor.col = (self.cursor.col / 8 + 1) * 8;
        if self.cursor.col >= self.cols {
            self.cursor.col = self.cols - 1;
        }
    }

    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let grid = self.grid_mut();
        for _ in 0..n {
            if (bottom as usize) < grid.lines.len() {
                grid.lines.remove(top as usize);
                grid.lines.insert(bottom as usize, blank_line(cols));
            }
        }
        grid.touch_all();
    }

    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let grid = self.grid_mut();
        for _ in 0..n {
            if (bottom as usize) < grid.lines.len() {
                grid.lines.remove(bottom as usize);
                grid.lines.insert(top as usize, blank_line(cols));
            }
        }
        grid.touch_all();
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.row = self.cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.cursor.row = (self.cursor.row + n).min(self.rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = (self.cursor.col + n).min(self.cols - 1);
    }

    pub fn cursor_back(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    /// Move the cursor to a 1-indexed position.
    pub fn cursor_goto(&mut self, row: u16, col: u16) {
        self.cursor.row = row.saturating_sub(1).min(self.rows - 1);
        self.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// ED - erase in display. Modes 0/1/2 as in ECMA-48; 3 treated as 2.
    pub fn erase_in_display(&mut self, mode: u16) {
        let (cur_row, rows) = (self.cursor.row as usize, self.rows as usize);
        match mode {
            0 => {
                self.erase_in_line(0);
                let pen = self.pen.clone();
                let grid = self.grid_mut();
                for r in (cur_row + 1)..rows {
                    clear_line(grid.line_mut(r), &pen);
                    grid.touch(r);
                }
            }
            1 => {
                let pen = self.pen.clone();
                {
                    let grid = self.grid_mut();
                    for r in 0..cur_row {
                        clear_line(grid.line_mut(r), &pen);
                        grid.touch(r);
                    }
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                let pen = self.pen.clone();
                let grid = self.grid_mut();
                for r in 0..rows {
                    clear_line(grid.line_mut(r), &pen);
                }
                grid.touch_all();
            }
            _ => {}
        }
    }

    /// EL - erase in line.
    pub fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = (self.cursor.row as usize, self.cursor.col as usize);
        let cols = self.cols as usize;
        let pen = self.pen.clone();
        let grid = self.grid_mut();
        let line = grid.line_mut(row);
        match mode {
            0 => {
                for cell in line.iter_mut().take(cols).skip(col) {
                    cell.erase(&pen);
                }
            }
            1 => {
                for cell in line.iter_mut().take((col + 1).min(cols)) {
                    cell.erase(&pen);
                }
            }
            2 => clear_line(line, &pen),
            _ => return,
        }
        grid.touch(row);
    }

    pub fn insert_lines(&mut self, n: u16) {
        let row = self.cursor.row as usize;
        let total = self.rows as usize;
        let cols = self.cols;
        let grid = self.grid_mut();
        for _ in 0..n {
            if row < grid.lines.len() {
                grid.lines.insert(row, blank_line(cols));
                if grid.lines.len() > total {
                    grid.lines.pop();
                }
            }
        }
        grid.touch_all();
    }

    pub fn delete_lines(&mut self, n: u16) {
        let row = self.cursor.row as usize;
        let cols = self.cols;
        let grid = self.grid_mut();
        for _ in 0..n {
            if row < grid.lines.len() {
                grid.lines.remove(row);
                grid.lines.push(blank_line(cols));
            }
        }
        grid.touch_all();
    }

    /// ICH - insert blank characters at the cursor.
    pub fn insert_chars(&mut self, n: u16) {
        let (row, col) = (self.cursor.row as usize, self.cursor.col as usize);
        let grid = self.grid_mut();
        let line = grid.line_mut(row);
        for _ in 0..n {
            if col < line.len() {
                line.pop();
                line.insert(col, Cell::default());
            }
        }
        grid.touch(row);
    }

    /// DCH - delete characters at the cursor.
    pub fn delete_chars(&mut self, n: u16) {
        let (row, col) = (self.cursor.row as usize, self.cursor.col as usize);
        let grid = self.grid_mut();
        let line = grid.line_mut(row);
        for _ in 0..n {
            if col < line.len() {
                line.remove(col);
                line.push(Cell::default());
            }
        }
        grid.touch(row);
    }

    /// ECH - erase characters at the cursor without shifting.
    pub fn erase_chars(&mut self, n: u16) {
        let (row, col) = (self.cursor.row as usize, self.cursor.col as usize);
        let pen = self.pen.clone();
        let grid = self.grid_mut();
        let line = grid.line_mut(row);
        for i in 0..n as usize {
            if let Some(cell) = line.get_mut(col + i) {
                cell.erase(&pen);
            }
        }
        grid.touch(row);
    }

    /// DECSTBM - set scroll region from 1-indexed bounds.
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.saturating_sub(1).min(self.rows - 1);
        let bottom = bottom.saturating_sub(1).min(self.rows - 1);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn save_cursor(&mut self) {
        self.saved = Some(SavedCursor {
            col: self.cursor.col,
            row: self.cursor.row,
            pen: self.pen.clone(),
        });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved.clone() {
            self.cursor.col = saved.col.min(self.cols - 1);
            self.cursor.row = saved.row.min(self.rows - 1);
            self.pen = saved.pen;
        }
    }

    /// DEC private mode set/reset.
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.autowrap = enable,
            25 => self.cursor.visible = enable,
            47 | 1047 => {
                self.alt_active = enable;
                if enable {
                    self.alt = Grid::new(self.cols, self.rows);
                }
                self.grid_mut().touch_all();
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.alt_active = true;
                    self.alt = Grid::new(self.cols, self.rows);
                    self.cursor = Cursor::default();
                } else {
                    self.alt_active = false;
                    self.restore_cursor();
                }
                self.grid_mut().touch_all();
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {}
        }
    }

    /// RI - cursor up, scrolling when at the region top.
    pub fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// IND - cursor down, scrolling when at the region bottom.
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// RIS - reset to the initial state, keeping dimensions.
    pub fn full_reset(&mut self) {
        *self = Screen::new(self.cols, self.rows);
        self.grid_mut().touch_all();
    }
}

/// A rectangular block of cells with dirty-line tracking.
pub struct Grid {
    lines: Vec<Vec<Cell>>,
    dirty: HashSet<usize>,
    full_redraw: bool,
}

impl Grid {
    fn new(cols: u16, rows: u16) -> Self {
        Self {
            lines: (0..rows).map(|_| blank_line(cols)).collect(),
            dirty: HashSet::new(),
            full_redraw: true,
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        while self.lines.len() < rows as usize {
            self.lines.push(blank_line(cols));
        }
        self.lines.truncate(rows as usize);
        for line in &mut self.lines {
            line.resize(cols as usize, Cell::default());
        }
        self.touch_all();
    }

    pub fn line(&self, row: usize) -> Option<&[Cell]> {
        self.lines.get(row).map(|l| l.as_slice())
    }

    fn line_mut(&mut self, row: usize) -> &mut Vec<Cell> {
        let last = self.lines.len() - 1;
        &mut self.lines[row.min(last)]
    }

    pub fn touch(&mut self, row: usize) {
        self.dirty.insert(row);
    }

    pub fn touch_all(&mut self) {
        self.full_redraw = true;
    }

    pub fn needs_full_redraw(&self) -> bool {
        self.full_redraw
    }

    pub fn dirty_lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty.iter().copied()
    }

    pub fn has_changes(&self) -> bool {
        self.full_redraw || !self.dirty.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.dirty.clear();
        self.full_redraw = false;
    }
}

fn blank_line(cols: u16) -> Vec<Cell> {
    vec![Cell::default(); cols as usize]
}

fn clear_line(line: &mut [Cell], pen: &Style) {
    for cell in line {
        cell.erase(pen);
    }
}

/// One character cell. `text` holds the base character plus any
/// combining marks; width 0 marks the spacer half of a wide character.
#[derive(Clone)]
pub struct Cell {
    pub text: String,
    pub width: u8,
    pub style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            text: String::new(),
            width: 1,
            style: Style::default(),
        }
    }
}

impl Cell {
    fn glyph(ch: char, width: u8, style: &Style) -> Self {
        Self {
            text: ch.to_string(),
            width,
            style: style.clone(),
        }
    }

    fn spacer(style: &Style) -> Self {
        Self {
            text: String::new(),
            width: 0,
            style: style.clone(),
        }
    }

    pub fn is_spacer(&self) -> bool {
        self.width == 0
    }

    fn erase(&mut self, pen: &Style) {
        self.text.clear();
        self.width = 1;
        self.style = pen.clone();
    }

    /// Text to draw for this cell (space when empty).
    pub fn display(&self) -> &str {
        if self.text.is_empty() {
            " "
        } else {
            &self.text
        }
    }
}

/// Rendering attributes for a cell.
#[derive(Clone, Default, PartialEq)]
pub struct Style {
    pub fg: Color,
    pub bg: Color,
    pub flags: StyleFlags,
}

impl Style {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Cell color.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
pub enum Color {
    #[default]
    Default,
    Ansi(u8),
    Rgb(u8, u8, u8),
}

bitflags! {
    #[derive(Clone, Copy, Default, PartialEq)]
    pub struct StyleFlags: u16 {
        const BOLD      = 1 << 0;
        const DIM       = 1 << 1;
        const ITALIC    = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK     = 1 << 4;
        const REVERSE   = 1 << 5;
        const HIDDEN    = 1 << 6;
        const STRIKE    = 1 << 7;
    }
}

#[derive(Clone)]
pub struct Cursor {
    pub col: u16,
    pub row: u16,
    pub visible: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
        }
    }
}

#[derive(Clone)]
struct SavedCursor {
    col: u16,
    row: u16,
    pen: Style,
}

/// Terminal modes toggled by escape sequences. Only `autowrap` changes
/// output handling; keyboard input never consults these (the line
/// discipline owns the keyboard).
#[derive(Clone)]
pub struct Modes {
    #[allow(dead_code)]
    pub application_cursor: bool,
    pub autowrap: bool,
    #[allow(dead_code)]
    pub insert: bool,
    #[allow(dead_code)]
    pub linefeed_newline: bool,
    #[allow(dead_code)]
    pub bracketed_paste: bool,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            autowrap: true,
            insert: false,
            linefeed_newline: false,
            bracketed_paste: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(screen: &Screen, row: usize) -> String {
        screen
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
    fn put_char_advances_cursor() {
        let mut screen = Screen::new(10, 4);
        screen.put_char('h');
        screen.put_char('i');
        assert_eq!(screen.cursor.col, 2);
        assert_eq!(line_text(&screen, 0), "hi");
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let mut screen = Screen::new(10, 4);
        screen.put_char('日');
        assert_eq!(screen.cursor.col, 2);
        assert!(screen.grid().line(0).unwrap()[1].is_spacer());
    }

    #[test]
    fn autowrap_moves_to_next_line() {
        let mut screen = Screen::new(3, 4);
        for ch in "abcd".chars() {
            screen.put_char(ch);
        }
        assert_eq!(line_text(&screen, 0), "abc");
        assert_eq!(line_text(&screen, 1), "d");
    }

    #[test]
    fn linefeed_at_bottom_scrolls() {
        let mut screen = Screen::new(5, 2);
        screen.put_char('a');
        screen.carriage_return();
        screen.linefeed();
        screen.put_char('b');
        screen.carriage_return();
        screen.linefeed();
        screen.put_char('c');
        assert_eq!(line_text(&screen, 0), "b");
        assert_eq!(line_text(&screen, 1), "c");
    }

    #[test]
    fn erase_in_line_from_cursor() {
        let mut screen = Screen::new(5, 2);
        for ch in "hello".chars() {
            screen.put_char(ch);
        }
        screen.cursor.col = 2;
        screen.erase_in_line(0);
        assert_eq!(line_text(&screen, 0), "he");
    }

    #[test]
    fn resize_clamps_cursor() {
        let mut screen = Screen::new(80, 24);
        screen.cursor_goto(24, 80);
        screen.resize(10, 5);
        assert!(screen.cursor.col < 10);
        assert!(screen.cursor.row < 5);
    }

    #[test]
    fn alternate_screen_preserves_main_grid() {
        let mut screen = Screen::new(10, 4);
        screen.put_char('x');
        screen.set_private_mode(1049, true);
        screen.put_char('y');
        assert_eq!(line_text(&screen, 0), "y");
        screen.set_private_mode(1049, false);
        assert_eq!(line_text(&screen, 0), "x");
    }
}
