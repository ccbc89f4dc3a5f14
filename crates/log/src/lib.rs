//! A small logging library for the chunk streaming workers and their drivers.
//!
//! Messages carry the location they were emitted from and are written to the standard error
//! stream. A process-wide maximum [`Verbosity`] filters out chatty messages (the generator logs a
//! line per chunk at [`Verbosity::Trace`]).

use std::fmt::Arguments;
use std::sync::atomic::{AtomicU8, Ordering};

mod sink;

/// A verbosity level for a [`Message`].
///
/// # Remarks
///
/// The ordering of the verbosity levels is in *increasing verbosity*, meaning that
/// [`Error`] is the *least verbose*, and [`Trace`] is the *most verbose*.
///
/// [`Error`]: Verbosity::Error
/// [`Trace`]: Verbosity::Trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Verbosity {
    /// Something broke an invariant of the program, or a part of it stopped working.
    Error,
    /// Something failed, but the program recovered by itself (a corrupted chunk file that was
    /// regenerated, for example).
    Warning,
    /// Regular information about what the program is doing.
    #[default]
    Info,
    /// Debugging information, usually one line per processed item.
    Trace,
}

impl Verbosity {
    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Error,
            1 => Self::Warning,
            2 => Self::Info,
            _ => Self::Trace,
        }
    }
}

/// The most verbose level that is still written out.
static MAX_VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Info as u8);

/// Sets the most verbose level that will still be written out.
///
/// Messages that are more verbose than `verbosity` are silently dropped.
pub fn set_max_verbosity(verbosity: Verbosity) {
    MAX_VERBOSITY.store(verbosity as u8, Ordering::Relaxed);
}

/// Returns the most verbose level that is currently written out.
#[inline]
pub fn max_verbosity() -> Verbosity {
    Verbosity::from_u8(MAX_VERBOSITY.load(Ordering::Relaxed))
}

/// Returns whether a message with the provided verbosity would be written out.
#[inline]
pub fn enabled(verbosity: Verbosity) -> bool {
    verbosity <= max_verbosity()
}

/// A message that can be logged.
pub struct Message<'a> {
    /// The name of the file in which the message was logged.
    pub file: &'static str,
    /// The line at which the message was logged.
    pub line: u32,
    /// The verbosity level of the message.
    pub verbosity: Verbosity,
    /// The module in which the message was logged.
    pub module: &'static str,
    /// The message itself.
    pub message: Arguments<'a>,
}

impl<'a> Message<'a> {
    /// Logs this message, unless its verbosity is filtered out.
    pub fn log(self) {
        if enabled(self.verbosity) {
            sink::write(self);
        }
    }
}

/// Builds a [`Message`] tagged with the call site.
#[macro_export]
macro_rules! message {
    ($verbosity:expr, $($args:tt)*) => {
        $crate::Message {
            file: ::core::file!(),
            line: ::core::line!(),
            verbosity: $verbosity,
            module: ::core::module_path!(),
            message: ::core::format_args!($($args)*),
        }
    };
}

/// Logs at `$verbosity` from the call site.
///
/// Nothing is built when the level is filtered out.
#[macro_export]
macro_rules! log {
    ($verbosity:expr, $($args:tt)*) => {{
        let verbosity: $crate::Verbosity = $verbosity;
        if $crate::enabled(verbosity) {
            $crate::Message::log($crate::message!(verbosity, $($args)*));
        }
    }};
}

/// Something broke. See [`Verbosity::Error`].
#[macro_export]
macro_rules! error {
    ($($args:tt)*) => { $crate::log!($crate::Verbosity::Error, $($args)*) };
}

/// Something failed and was recovered from. See [`Verbosity::Warning`].
#[macro_export]
macro_rules! warning {
    ($($args:tt)*) => { $crate::log!($crate::Verbosity::Warning, $($args)*) };
}

/// Regular progress. See [`Verbosity::Info`].
#[macro_export]
macro_rules! info {
    ($($args:tt)*) => { $crate::log!($crate::Verbosity::Info, $($args)*) };
}

/// Per-item detail, off by default. See [`Verbosity::Trace`].
#[macro_export]
macro_rules! trace {
    ($($args:tt)*) => { $crate::log!($crate::Verbosity::Trace, $($args)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_is_ordered_by_chattiness() {
        assert!(Verbosity::Error < Verbosity::Warning);
        assert!(Verbosity::Info < Verbosity::Trace);
    }

    #[test]
    fn filtered_levels_are_disabled() {
        set_max_verbosity(Verbosity::Warning);
        assert!(enabled(Verbosity::Error));
        assert!(!enabled(Verbosity::Info));
        assert_eq!(max_verbosity(), Verbosity::Warning);
        set_max_verbosity(Verbosity::default());
    }

    #[test]
    fn filter_round_trips_through_the_atomic() {
        for v in [
            Verbosity::Error,
            Verbosity::Warning,
            Verbosity::Info,
            Verbosity::Trace,
        ] {
            assert_eq!(Verbosity::from_u8(v as u8), v);
        }
    }
}
