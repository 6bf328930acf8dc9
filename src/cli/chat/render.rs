use std::io::Write;

use crossterm::cursor::MoveLeft;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use eyre::Result;

const CURSOR_GLYPH: char = '▌';

/// Accumulates response fragments and redraws after each one.
///
/// On a terminal a cursor glyph trails the text while the response is still
/// arriving. It is erased before every redraw and when the stream ends.
pub struct StreamRenderer {
    buffer: String,
    show_cursor: bool,
    cursor_drawn: bool,
}

impl StreamRenderer {
    pub fn new(show_cursor: bool) -> Self {
        Self {
            buffer: String::new(),
            show_cursor,
            cursor_drawn: false,
        }
    }

    pub fn push<W: Write>(&mut self, out: &mut W, fragment: &str) -> Result<()> {
        self.erase_cursor(out)?;
        self.buffer.push_str(fragment);
        queue!(out, Print(fragment))?;
        if self.show_cursor {
            queue!(out, Print(CURSOR_GLYPH))?;
            self.cursor_drawn = true;
        }
        out.flush()?;
        Ok(())
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Ends the stream and hands back the full response.
    pub fn finish<W: Write>(mut self, out: &mut W) -> Result<String> {
        self.erase_cursor(out)?;
        writeln!(out)?;
        out.flush()?;
        Ok(self.buffer)
    }

    /// Ends the stream after a failure; the partial response is dropped.
    pub fn abort<W: Write>(mut self, out: &mut W) -> Result<()> {
        self.erase_cursor(out)?;
        if !self.buffer.is_empty() {
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }

    fn erase_cursor<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if self.cursor_drawn {
            queue!(out, MoveLeft(1), Clear(ClearType::UntilNewLine))?;
            self.cursor_drawn = false;
        }
        Ok(())
    }
}
