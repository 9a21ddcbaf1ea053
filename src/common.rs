// Licensed under the Apache-2.0 license

//! Crate-wide plumbing shared by the TWI engine and the console.

use core::fmt::{self, Write as _};

/// Size of the scratch line used to render formatted log messages.
pub const LOG_LINE_LEN: usize = 96;

/// Minimal logging sink.
///
/// The engine is `no_std` and may run inside an interrupt handler, so it never
/// allocates or blocks on logging. Implementations decide where messages go
/// (a UART, stderr, a test recorder) or drop them entirely.
pub trait Logger {
    fn debug(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Logger that discards everything. Default for the engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn debug(&mut self, msg: &str) {
        (**self).debug(msg);
    }

    fn error(&mut self, msg: &str) {
        (**self).error(msg);
    }
}

/// Render `args` into a fixed-size line. Pieces that do not fit in [`LOG_LINE_LEN`] are dropped.
pub fn format_line(args: fmt::Arguments<'_>) -> heapless::String<LOG_LINE_LEN> {
    let mut line = heapless::String::new();
    // A full line reports fmt::Error; whatever fit is still worth logging.
    let _ = line.write_fmt(args);
    line
}

/// Log a formatted debug message through any [`Logger`].
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $crate::common::Logger::debug(
            &mut $logger,
            $crate::common::format_line(format_args!($($arg)*)).as_str(),
        )
    };
}

/// Log a formatted error message through any [`Logger`].
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $crate::common::Logger::error(
            &mut $logger,
            $crate::common::format_line(format_args!($($arg)*)).as_str(),
        )
    };
}
