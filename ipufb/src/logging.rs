//! Console logger: one ANSI-coloured line per record, written to a [LogSink].
use core::fmt::Arguments;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, set_logger, set_max_level};
use spin::Once;

#[doc(hidden)]
pub use log as __log;

/// Output device of the [Logger], typically a serial console.
pub trait LogSink: Send + Sync {
    /// Write one complete line. The sink appends the line terminator.
    fn write_line(&self, line: Arguments);
}

pub struct Logger {
    sink: &'static dyn LogSink,
}

/// ANSI SGR colour of each level.
fn level_color(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 93,
        Level::Info => 20,
        Level::Debug => 32,
        Level::Trace => 90,
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.sink.write_line(format_args!(
                "\u{1B}[{}m[{}] {}\u{1B}[0m",
                level_color(record.level()),
                record.level(),
                record.args(),
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: Once<Logger> = Once::new();

/// Install the [Logger] writing to `sink` as the global logger.
///
/// Only the first call installs a logger; later calls return the error of [set_logger].
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink });
    set_logger(logger)?;
    set_max_level(level);
    Ok(())
}

/// Improved debug macro,
/// only compiled in debug mode.
#[macro_export]
macro_rules! debug_ex {
    // debug_ex!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            $crate::logging::__log::log!(
                target: $target,
                $crate::logging::__log::Level::Debug,
                $($arg)+
            )
        }
    };

    // debug_ex!("a {} event", "log")
    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            $crate::logging::__log::log!($crate::logging::__log::Level::Debug, $($arg)+)
        }
    }
}
