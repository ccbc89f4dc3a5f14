use std::io::Write;

use crate::{Message, Verbosity};

/// Writes a message to the standard error stream.
pub fn write(
    Message {
        file,
        line,
        verbosity,
        message,
        module,
    }: Message,
) {
    let prefix = match verbosity {
        Verbosity::Error => "\x1B[1;31mERROR\x1B[0m  ",
        Verbosity::Warning => "\x1B[1;33mWARNING\x1B[0m",
        Verbosity::Info => "\x1B[1;34mINFO\x1B[0m   ",
        Verbosity::Trace => "\x1B[1;30mTRACE\x1B[0m  ",
    };

    let thread = std::thread::current();
    let thread = thread.name().unwrap_or("?");

    // Holding the lock keeps lines from different threads from interleaving.
    let _ = writeln!(
        std::io::stderr().lock(),
        "{prefix} [{thread}] {message} \x1B[2;90m({module} at {file}:{line})\x1B[0m"
    );
}
