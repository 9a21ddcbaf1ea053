// Licensed under the Apache-2.0 license

//! Serial line editor.
//!
//! Collects bytes into a command line, echoing as it goes. Carriage return ends
//! a line, line feed is ignored so CR-LF terminals work, and ESC throws the
//! line away.

use embedded_io::{Write, WriteFmtError};

pub const MAX_CMD_LENGTH: usize = 100;
pub const PROMPT: &str = "Cmd> ";

const NUL: u8 = 0x00;
const BACKSPACE: u8 = 0x08;
const LINE_FEED: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';
const ESC: u8 = 0x1B;
const DELETE: u8 = 0x7F;

const CLEAR_EOL: &str = "\x1b[K";

pub type Line = heapless::String<MAX_CMD_LENGTH>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Byte consumed, line not finished.
    Pending,
    Line(Line),
    Cancelled,
}

#[derive(Default)]
pub struct LineEditor {
    line: Line,
}

impl LineEditor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text collected so far.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.line
    }

    /// # Errors
    ///
    /// Output errors from `out`.
    pub fn prompt<W: Write>(&self, out: &mut W) -> Result<(), WriteFmtError<W::Error>> {
        write!(out, "{CLEAR_EOL}{PROMPT}")
    }

    /// Feed one received byte.
    ///
    /// # Errors
    ///
    /// Output errors from echoing to `out`.
    pub fn push<W: Write>(
        &mut self,
        byte: u8,
        out: &mut W,
    ) -> Result<Input, WriteFmtError<W::Error>> {
        match byte {
            NUL | LINE_FEED => Ok(Input::Pending),
            BACKSPACE | DELETE => {
                if self.line.pop().is_some() {
                    write!(out, "\x08 \x08")?;
                }
                Ok(Input::Pending)
            }
            CARRIAGE_RETURN => {
                write!(out, "\r\n")?;
                Ok(Input::Line(core::mem::take(&mut self.line)))
            }
            ESC => {
                self.line.clear();
                write!(out, "\r\n")?;
                Ok(Input::Cancelled)
            }
            b'\t' | 0x20..=0x7E => {
                let c = char::from(byte);
                if self.line.push(c).is_ok() {
                    write!(out, "{c}")?;
                }
                Ok(Input::Pending)
            }
            // Other control and non-ASCII bytes are line noise.
            _ => Ok(Input::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(editor: &mut LineEditor, bytes: &[u8], echo: &mut Vec<u8>) -> Vec<Input> {
        bytes
            .iter()
            .map(|b| editor.push(*b, echo).unwrap())
            .filter(|input| *input != Input::Pending)
            .collect()
    }

    #[test]
    fn carriage_return_completes_the_line() {
        let mut editor = LineEditor::new();
        let mut echo = Vec::new();
        let inputs = feed(&mut editor, b"R 50 4\r\n", &mut echo);

        assert_eq!(inputs.len(), 1);
        let Input::Line(line) = &inputs[0] else {
            panic!("expected a line");
        };
        assert_eq!(line.as_str(), "R 50 4");
        assert_eq!(echo, b"R 50 4\r\n");
        assert_eq!(editor.pending(), "");
    }

    #[test]
    fn backspace_erases_and_echoes() {
        let mut editor = LineEditor::new();
        let mut echo = Vec::new();
        feed(&mut editor, b"\x08SX\x08", &mut echo);

        assert_eq!(editor.pending(), "S");
        assert_eq!(echo, b"SX\x08 \x08");
    }

    #[test]
    fn noise_is_ignored() {
        let mut editor = LineEditor::new();
        let mut echo = Vec::new();
        feed(&mut editor, b"\0H\x01\xFF\n", &mut echo);
        assert_eq!(editor.pending(), "H");
        assert_eq!(echo, b"H");
    }

    #[test]
    fn escape_cancels() {
        let mut editor = LineEditor::new();
        let mut echo = Vec::new();
        let inputs = feed(&mut editor, b"W 50 01\x1b", &mut echo);
        assert_eq!(inputs, [Input::Cancelled]);
        assert_eq!(editor.pending(), "");
    }

    #[test]
    fn full_line_stops_accepting() {
        let mut editor = LineEditor::new();
        let mut echo = Vec::new();
        let long = [b'a'; MAX_CMD_LENGTH + 5];
        feed(&mut editor, &long, &mut echo);
        assert_eq!(editor.pending().len(), MAX_CMD_LENGTH);
        assert_eq!(echo.len(), MAX_CMD_LENGTH);
    }

    #[test]
    fn prompt_clears_to_end_of_line() {
        let editor = LineEditor::new();
        let mut out = Vec::new();
        editor.prompt(&mut out).unwrap();
        assert_eq!(out, b"\x1b[KCmd> ");
    }
}
