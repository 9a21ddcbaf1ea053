// Licensed under the Apache-2.0 license

//! I2C command console.
//!
//! Reads command lines from a serial stream and runs them as bus transactions:
//!
//! ```text
//! Cmd> G 68 00 03
//! Write: I2C_COMPLETE (00)
//! Read:  I2C_COMPLETE (00)
//! Data:
//!   0x00: 0x30  0b00110000
//!   0x01: 0x45  0b01000101
//!   0x02: 0x12  0b00010010
//! ```
//!
//! Output goes to any `embedded_io::Write`, so the same console runs over a UART
//! or a host terminal.

pub mod command;
pub mod line;
pub mod parse;

pub use command::{Command, CommandError, MAX_RWBYTES};
pub use line::{Input, LineEditor};

use embedded_io::{Write, WriteFmtError};

use crate::common::{Logger, NoOpLogger};
use crate::i2c::{Status, TwiHardware, TwiMaster};

pub const HELP_SCREEN: &str = "\
R <slave> <nBytes>                Read  data bytes from slave\r\n\
W <slave> <Byte1> [<Byte2>] ...   Write data bytes to   slave\r\n\
S                                 Scan for slaves on bus\r\n\
D <slave> <reg> <nBytes>          Dump slave registers starting at <reg>\r\n\
G <slave> <reg> <nBytes>          Dump slave registers using repeated start\r\n\
X                                 Show the driver trace\r\n\
\r\n\
H           Show this help panel\r\n\
?           Show this help panel\r\n\
\r\n\
All values hex, lead 0x may be omitted.\r\n\
Get  command uses repeated start.\r\n\
Dump command uses full write followed by read.\r\n\
";

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const HELP_HINT: &str = "Type '?' for help\r\n";

pub type ConsoleResult<E> = Result<(), WriteFmtError<E>>;

pub struct Console<H: TwiHardware, L: Logger = NoOpLogger> {
    master: TwiMaster<H, L>,
    editor: LineEditor,
    buffer: [u8; MAX_RWBYTES],
}

impl<H: TwiHardware, L: Logger> Console<H, L> {
    /// `master` must already be initialized.
    pub fn new(master: TwiMaster<H, L>) -> Self {
        Self {
            master,
            editor: LineEditor::new(),
            buffer: [0xFF; MAX_RWBYTES],
        }
    }

    pub fn master(&self) -> &TwiMaster<H, L> {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut TwiMaster<H, L> {
        &mut self.master
    }

    /// Clear the screen, print the banner and the first prompt.
    ///
    /// # Errors
    ///
    /// Output errors from `out`.
    pub fn start<W: Write>(&mut self, out: &mut W) -> ConsoleResult<W::Error> {
        write!(out, "{CLEAR_SCREEN}I2C CMD\r\n{HELP_HINT}\r\n")?;
        self.editor.prompt(out)
    }

    /// Feed one received byte; runs the command when a line completes.
    ///
    /// # Errors
    ///
    /// Output errors from `out`.
    pub fn feed<W: Write>(&mut self, byte: u8, out: &mut W) -> ConsoleResult<W::Error> {
        match self.editor.push(byte, out)? {
            Input::Pending => Ok(()),
            Input::Line(line) => {
                self.run_line(&line, out)?;
                self.editor.prompt(out)
            }
            Input::Cancelled => self.editor.prompt(out),
        }
    }

    /// Parse and run one command line.
    ///
    /// # Errors
    ///
    /// Output errors from `out`. Command errors are printed, not returned.
    pub fn run_line<W: Write>(&mut self, line: &str, out: &mut W) -> ConsoleResult<W::Error> {
        match Command::parse(line) {
            Ok(command) => self.execute(&command, out),
            Err(err) => write!(out, "{err}\r\n{HELP_HINT}\r\n"),
        }
    }

    /// # Errors
    ///
    /// Output errors from `out`.
    pub fn execute<W: Write>(
        &mut self,
        command: &Command,
        out: &mut W,
    ) -> ConsoleResult<W::Error> {
        match command {
            Command::Empty => Ok(()),
            Command::Read { slave, count } => {
                self.buffer.fill(0xFF);
                self.read_into_buffer(*slave, *count);
                self.print_results(out, Some(*count))?;
                self.trace_if_enabled(out)
            }
            Command::Write { slave, data } => {
                // Bus failures are reported through the status below.
                let _ = self.master.blocking_write(*slave, data, false);
                self.print_results(out, None)?;
                self.trace_if_enabled(out)
            }
            Command::Scan => self.scan(out),
            Command::Dump { slave, reg, count } => {
                self.dump_registers(out, *slave, *reg, *count, false)
            }
            Command::Get { slave, reg, count } => {
                self.dump_registers(out, *slave, *reg, *count, true)
            }
            Command::Trace => self.print_trace(out),
            Command::Help => write!(out, "\r\n{HELP_SCREEN}\r\n"),
        }
    }

    fn read_into_buffer(&mut self, slave: u8, count: usize) {
        if let Some(buffer) = self.buffer.get_mut(..count) {
            let _ = self.master.blocking_read(slave, buffer);
        }
    }

    fn dump_registers<W: Write>(
        &mut self,
        out: &mut W,
        slave: u8,
        reg: u8,
        count: usize,
        repeated_start: bool,
    ) -> ConsoleResult<W::Error> {
        self.buffer.fill(0xFF);
        let _ = self.master.blocking_write(slave, &[reg], repeated_start);
        write!(out, "Write: ")?;
        self.print_results(out, None)?;
        self.read_into_buffer(slave, count);
        write!(out, "Read:  ")?;
        self.print_results(out, Some(count))?;
        self.trace_if_enabled(out)
    }

    fn scan<W: Write>(&mut self, out: &mut W) -> ConsoleResult<W::Error> {
        write!(out, "Addr: Result\r\n")?;
        let mut responses = 0u32;
        for slave in 0..=0x7F {
            let mut probe = [0u8; 1];
            let _ = self.master.blocking_read(slave, &mut probe);
            let status = self.master.status();
            if status == Status::NoSlaveAck {
                continue;
            }
            write!(out, "{slave:02X}  : {}\r\n", status.name())?;
            responses += 1;
        }
        write!(out, "{responses} responses\r\n\r\n")?;
        self.trace_if_enabled(out)
    }

    /// `<STATUS> (<code>)`, then the buffer for reads that completed.
    fn print_results<W: Write>(
        &self,
        out: &mut W,
        read_count: Option<usize>,
    ) -> ConsoleResult<W::Error> {
        let status = self.master.status();
        write!(out, "{} ({:02X})\r\n", status.name(), status.code())?;
        let Some(count) = read_count else {
            return Ok(());
        };
        if status != Status::Complete {
            return Ok(());
        }
        write!(out, "Data:\r\n")?;
        for (i, byte) in self.buffer.iter().take(count).enumerate() {
            write!(out, "  0x{i:02X}: 0x{byte:02X}  0b{byte:08b}\r\n")?;
        }
        write!(out, "\r\n")
    }

    fn print_trace<W: Write>(&self, out: &mut W) -> ConsoleResult<W::Error> {
        if !self.master.config().trace {
            return write!(out, "Trace disabled\r\n\r\n");
        }
        write!(out, "Dbg: SS AA RR\r\n")?;
        for (i, entry) in self.master.context().trace().iter().enumerate() {
            write!(
                out,
                "{i:3}: {:02X} {:02X} {:02X}\r\n",
                entry.code, entry.target, entry.remaining
            )?;
        }
        write!(out, "\r\n")
    }

    fn trace_if_enabled<W: Write>(&self, out: &mut W) -> ConsoleResult<W::Error> {
        if self.master.config().trace {
            self.print_trace(out)
        } else {
            Ok(())
        }
    }
}
