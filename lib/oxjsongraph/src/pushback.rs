//! Code-point level input for the parser: buffered UTF-8 decoding with
//! pushback, line/column bookkeeping and a bounded snippet of recent input
//! for error messages.

use crate::error::{JsonGraphError, JsonGraphSyntaxError, TextPosition};
use std::collections::VecDeque;
use std::io::{self, Read};

/// How many code points can be pushed back before `unread` is considered a bug.
const PUSHBACK_CAPACITY: usize = 16;
/// How many of the last read code points are kept for error snippets.
const SNIPPET_CAPACITY: usize = 200;
const READ_BUFFER_SIZE: usize = 8192;

pub struct PushbackReader<R: Read> {
    input: R,
    buffer: Vec<u8>,
    buffer_start: usize,
    buffer_end: usize,
    pushback: Vec<char>,
    line: u64,
    column: u64,
    column_before_line_jump: u64,
    snippet: VecDeque<char>,
}

impl<R: Read> PushbackReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buffer: vec![0; READ_BUFFER_SIZE],
            buffer_start: 0,
            buffer_end: 0,
            pushback: Vec::with_capacity(PUSHBACK_CAPACITY),
            line: 1,
            column: 0,
            column_before_line_jump: 0,
            snippet: VecDeque::with_capacity(SNIPPET_CAPACITY),
        }
    }

    /// Reads the next code point, `None` at end of input.
    pub fn read(&mut self) -> Result<Option<char>, JsonGraphError> {
        let c = if let Some(c) = self.pushback.pop() {
            Some(c)
        } else {
            self.decode_next()?
        };
        if let Some(c) = c {
            if c == '\n' {
                self.column_before_line_jump = self.column;
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
            if self.snippet.len() == SNIPPET_CAPACITY {
                self.snippet.pop_front();
            }
            self.snippet.push_back(c);
        }
        Ok(c)
    }

    /// Puts a code point back so the next `read` returns it again.
    ///
    /// Line, column and the snippet are rolled back symmetrically. Unreading
    /// more than the pushback capacity is a bug in the parser itself.
    pub fn unread(&mut self, c: char) -> Result<(), JsonGraphError> {
        if self.pushback.len() == PUSHBACK_CAPACITY {
            return Err(io::Error::other(format!(
                "unread() called more than the pushback buffer size ({PUSHBACK_CAPACITY})"
            ))
            .into());
        }
        self.pushback.push(c);
        if c == '\n' {
            self.line -= 1;
            self.column = self.column_before_line_jump;
        } else {
            self.column = self.column.saturating_sub(1);
        }
        self.snippet.pop_back();
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> TextPosition {
        TextPosition {
            line: self.line,
            column: self.column,
        }
    }

    /// The last read input, at most 200 code points.
    pub fn snippet(&self) -> String {
        self.snippet.iter().collect()
    }

    pub fn syntax_error(&self, message: impl Into<String>) -> JsonGraphSyntaxError {
        JsonGraphSyntaxError::new(message, self.position(), self.snippet())
    }

    fn decode_next(&mut self) -> Result<Option<char>, JsonGraphError> {
        let Some(first) = self.next_byte()? else {
            return Ok(None);
        };
        if first < 0x80 {
            return Ok(Some(char::from(first)));
        }
        let width = match first {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(self.syntax_error("Invalid UTF-8 byte in input").into()),
        };
        let mut sequence = [first, 0, 0, 0];
        for slot in sequence.iter_mut().take(width).skip(1) {
            *slot = self.next_byte()?.ok_or_else(|| {
                JsonGraphError::from(
                    self.syntax_error("End of input inside a UTF-8 sequence"),
                )
            })?;
        }
        match std::str::from_utf8(&sequence[..width]) {
            Ok(s) => Ok(s.chars().next()),
            Err(_) => Err(self.syntax_error("Invalid UTF-8 sequence in input").into()),
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, JsonGraphError> {
        if self.buffer_start == self.buffer_end {
            self.buffer_start = 0;
            self.buffer_end = self.input.read(&mut self.buffer)?;
            if self.buffer_end == 0 {
                return Ok(None);
            }
        }
        let byte = self.buffer[self.buffer_start];
        self.buffer_start += 1;
        Ok(Some(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(input: &str) -> PushbackReader<&[u8]> {
        PushbackReader::new(input.as_bytes())
    }

    #[test]
    fn reads_code_points() -> Result<(), JsonGraphError> {
        let mut r = reader("a\u{e9}\u{1f600}");
        assert_eq!(r.read()?, Some('a'));
        assert_eq!(r.read()?, Some('\u{e9}'));
        assert_eq!(r.read()?, Some('\u{1f600}'));
        assert_eq!(r.read()?, None);
        Ok(())
    }

    #[test]
    fn tracks_line_and_column() -> Result<(), JsonGraphError> {
        let mut r = reader("ab\ncd");
        r.read()?;
        r.read()?;
        assert_eq!(r.position(), TextPosition { line: 1, column: 2 });
        r.read()?;
        assert_eq!(r.position(), TextPosition { line: 2, column: 0 });
        r.read()?;
        assert_eq!(r.position(), TextPosition { line: 2, column: 1 });
        Ok(())
    }

    #[test]
    fn unread_rolls_back_position() -> Result<(), JsonGraphError> {
        let mut r = reader("ab\ncd");
        for _ in 0..3 {
            r.read()?;
        }
        r.unread('\n')?;
        assert_eq!(r.position(), TextPosition { line: 1, column: 2 });
        assert_eq!(r.read()?, Some('\n'));
        assert_eq!(r.position(), TextPosition { line: 2, column: 0 });
        Ok(())
    }

    #[test]
    fn unread_beyond_capacity_is_an_error() -> Result<(), JsonGraphError> {
        let mut r = reader("x");
        for _ in 0..16 {
            r.unread('y')?;
        }
        let error = r.unread('y').unwrap_err();
        assert!(error.to_string().contains("16"));
        Ok(())
    }

    #[test]
    fn snippet_is_bounded_to_200_code_points() -> Result<(), JsonGraphError> {
        let text: String = "x".repeat(300);
        let mut r = reader(&text);
        while r.read()?.is_some() {}
        assert_eq!(r.snippet().chars().count(), 200);
        Ok(())
    }

    #[test]
    fn truncated_utf8_is_a_syntax_error() {
        let mut r = PushbackReader::new(&[0xE2, 0x82][..]);
        assert!(r.read().is_err());
    }
}
