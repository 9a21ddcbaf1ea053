// Licensed under the Apache-2.0 license

//! Console command grammar.

use core::fmt;

use crate::console::parse::{command_eq, parse_hex, strip_hex_prefix, Tokens};

/// Largest read or write a single console command may request.
pub const MAX_RWBYTES: usize = 0xF0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line.
    Empty,
    Read {
        slave: u8,
        count: usize,
    },
    Write {
        slave: u8,
        data: heapless::Vec<u8, MAX_RWBYTES>,
    },
    Scan,
    /// Set the register pointer with a complete write, then read.
    Dump {
        slave: u8,
        reg: u8,
        count: usize,
    },
    /// Set the register pointer and read in one transaction (repeated start).
    Get {
        slave: u8,
        reg: u8,
        count: usize,
    },
    Trace,
    Help,
}

/// Rejected command line. Tokens are borrowed from the line being parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    BadSlave(&'a str),
    SlaveOutOfRange(u8),
    BadRegister(&'a str),
    BadCount(&'a str),
    CountTooBig(&'a str),
    BadData(&'a str),
    TooMuchData(&'a str),
    Unrecognized(&'a str),
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CommandError::BadSlave(token) => write!(
                f,
                "Unrecognized slave addr ({}), must 2 hex chars.",
                strip_hex_prefix(token)
            ),
            CommandError::SlaveOutOfRange(slave) => {
                write!(f, "Slave addr out of range ({slave:02X}), must <= 7F.")
            }
            CommandError::BadRegister(token) => write!(
                f,
                "Unrecognized reg ({}), must 2 hex chars.",
                strip_hex_prefix(token)
            ),
            CommandError::BadCount(token) => write!(
                f,
                "Unrecognized nBytes ({}), must 2 hex chars.",
                strip_hex_prefix(token)
            ),
            CommandError::CountTooBig(token) => write!(
                f,
                "nBytes too big ({}), must <= {MAX_RWBYTES:02X}.",
                strip_hex_prefix(token)
            ),
            CommandError::BadData(token) => write!(
                f,
                "Unrecognized data ({}), must 2 hex chars.",
                strip_hex_prefix(token)
            ),
            CommandError::TooMuchData(token) => write!(
                f,
                "Too much data ({}), must <= {MAX_RWBYTES:02X}.",
                strip_hex_prefix(token)
            ),
            CommandError::Unrecognized(name) => write!(f, "\x07Unrecognized Command \"{name}\""),
        }
    }
}

impl Command {
    /// Parse one command line.
    ///
    /// # Errors
    ///
    /// A [`CommandError`] naming the first offending token.
    pub fn parse(line: &str) -> Result<Command, CommandError<'_>> {
        let mut tokens = Tokens::new(line);
        let Some(name) = tokens.next() else {
            return Ok(Command::Empty);
        };

        if command_eq(name, "R") {
            let slave = slave(&mut tokens)?;
            let count = count(&mut tokens)?;
            Ok(Command::Read { slave, count })
        } else if command_eq(name, "W") {
            let slave = slave(&mut tokens)?;
            let mut data = heapless::Vec::new();
            for token in tokens {
                let byte = parse_hex(token).ok_or(CommandError::BadData(token))?;
                data.push(byte).map_err(|_| CommandError::TooMuchData(token))?;
            }
            Ok(Command::Write { slave, data })
        } else if command_eq(name, "S") {
            Ok(Command::Scan)
        } else if command_eq(name, "D") || command_eq(name, "G") {
            let slave = slave(&mut tokens)?;
            let token = tokens.next_or_empty();
            let reg = parse_hex(token).ok_or(CommandError::BadRegister(token))?;
            let count = count(&mut tokens)?;
            if command_eq(name, "D") {
                Ok(Command::Dump { slave, reg, count })
            } else {
                Ok(Command::Get { slave, reg, count })
            }
        } else if command_eq(name, "X") {
            Ok(Command::Trace)
        } else if command_eq(name, "H") || command_eq(name, "?") {
            Ok(Command::Help)
        } else {
            Err(CommandError::Unrecognized(name))
        }
    }
}

fn slave<'a>(tokens: &mut Tokens<'a>) -> Result<u8, CommandError<'a>> {
    let token = tokens.next_or_empty();
    let slave = parse_hex(token).ok_or(CommandError::BadSlave(token))?;
    if slave > 0x7F {
        return Err(CommandError::SlaveOutOfRange(slave));
    }
    Ok(slave)
}

fn count<'a>(tokens: &mut Tokens<'a>) -> Result<usize, CommandError<'a>> {
    let token = tokens.next_or_empty();
    let count = usize::from(parse_hex(token).ok_or(CommandError::BadCount(token))?);
    if count > MAX_RWBYTES {
        return Err(CommandError::CountTooBig(token));
    }
    Ok(count)
}
