//! Operator console port: line output and a "press any key" gate.

use core::fmt::{self, Write};
use core::future::Future;

use heapless::String;

use crate::error::ConsoleError;

/// Longest formatted line [`write_line`] will build.
pub const LINE_CAPACITY: usize = 160;

/// Port for talking to the person running the procedure.
pub trait Console {
    /// Send text as-is.
    fn write_str(&mut self, text: &str) -> impl Future<Output = Result<(), ConsoleError>>;

    /// Block until any key arrives, then throw away whatever else is
    /// buffered so a held key doesn't skip the next prompt too.
    fn wait_for_key(&mut self) -> impl Future<Output = Result<(), ConsoleError>>;
}

/// Format one line and send it, CRLF terminated for serial terminals.
pub async fn write_line<C: Console>(
    console: &mut C,
    args: fmt::Arguments<'_>,
) -> Result<(), ConsoleError> {
    let mut line: String<LINE_CAPACITY> = String::new();
    line.write_fmt(args).map_err(|_| ConsoleError::LineTooLong)?;
    line.push_str("\r\n").map_err(|_| ConsoleError::LineTooLong)?;
    console.write_str(&line).await
}

/// `sayln!(console, "fmt", args..)` formats a line and yields the
/// [`write_line`] future.
#[macro_export]
macro_rules! sayln {
    ($console:expr) => {
        $crate::console::write_line($console, format_args!(""))
    };
    ($console:expr, $($arg:tt)*) => {
        $crate::console::write_line($console, format_args!($($arg)*))
    };
}
