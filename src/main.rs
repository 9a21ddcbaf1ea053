// Licensed under the Apache-2.0 license

//! Host build of the I2C command console.
//!
//! Runs the console over stdin/stdout against a simulated bus carrying a 24Cxx
//! style EEPROM at 0x50 and a DS1307 style RTC at 0x68.
//!
//! ```text
//! twi-cmd [--trace] [--verbose]
//! ```

use std::io::{self, Read as _, Write as _};

use twi_cmd::common::Logger;
use twi_cmd::console::Console;
use twi_cmd::i2c::{I2cConfigBuilder, I2cSpeed, SimBus, SimDevice, TwiMaster};

const OUR_I2C_ADDR: u8 = 0x31;
const EEPROM_ADDR: u8 = 0x50;
const DS1307_ADDR: u8 = 0x68;

// Polls without a bus event before a blocking call gives up.
const TIMEOUT_POLLS: u32 = 10_000;

/// stdout as an `embedded_io` sink.
struct HostOut(io::Stdout);

#[derive(Debug)]
struct HostError(io::Error);

impl embedded_io::Error for HostError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

impl embedded_io::ErrorType for HostOut {
    type Error = HostError;
}

impl embedded_io::Write for HostOut {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(buf).map_err(HostError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush().map_err(HostError)
    }
}

struct StderrLogger {
    verbose: bool,
}

impl Logger for StderrLogger {
    fn debug(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[debug] {msg}");
        }
    }

    fn error(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[error] {msg}");
        }
    }
}

fn bus() -> SimBus {
    let eeprom = SimDevice::new(EEPROM_ADDR).with_registers(0x00, b"twi-cmd sim eeprom");
    // seconds, minutes, hours, day, date, month, year (BCD)
    let rtc = SimDevice::new(DS1307_ADDR)
        .with_registers(0x00, &[0x30, 0x45, 0x12, 0x06, 0x17, 0x10, 0x26]);
    SimBus::new().with_device(eeprom).with_device(rtc)
}

fn output_error<E: core::fmt::Debug>(err: E) -> io::Error {
    io::Error::other(format!("console output failed: {err:?}"))
}

fn main() -> io::Result<()> {
    let mut trace = false;
    let mut verbose = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--trace" => trace = true,
            "--verbose" => verbose = true,
            other => {
                eprintln!("usage: twi-cmd [--trace] [--verbose]");
                return Err(io::Error::other(format!("unknown argument {other}")));
            }
        }
    }

    let config = I2cConfigBuilder::new()
        .speed(I2cSpeed::Standard)
        .own_address(OUR_I2C_ADDR)
        .internal_pullups(true)
        .trace(trace)
        .timeout_polls(TIMEOUT_POLLS)
        .build();
    let mut master = TwiMaster::with_logger(bus(), config, StderrLogger { verbose });
    master.init().map_err(|e| io::Error::other(e.to_string()))?;

    let mut console = Console::new(master);
    let mut out = HostOut(io::stdout());
    console.start(&mut out).map_err(output_error)?;
    out.0.flush()?;

    for byte in io::stdin().lock().bytes() {
        // Host terminals end lines with LF; the console expects CR.
        let byte = match byte? {
            b'\n' => b'\r',
            b'\r' => continue,
            other => other,
        };
        console.feed(byte, &mut out).map_err(output_error)?;
        if byte == b'\r' {
            out.0.flush()?;
        }
    }
    writeln!(out.0)?;
    Ok(())
}
