//! A daily rotating, append-only line logger
//!
//! Every line is stamped with the local time at submission and queued on a
//! bounded channel. A single writer thread owns the open file, and opens a new
//! one named `<stamp><file_name>.txt` the first time it sees a record whose
//! calendar day differs from the day of the current file.
//!
//! The writer never takes the process down: if a file can't be opened the
//! failure is reported once, both through `tracing` and on standard error,
//! lines are dropped, and the open is retried with the next record.
//!
//! # Example
//!
//! ```no_run
//! use micro_daily_log::{Logger, LoggerOptions};
//!
//! let logger = Logger::start(LoggerOptions::new("log/", "server").file_mode(0o600))
//!     .expect("log directory is writable");
//!
//! logger.println("server starting");
//! logger.stop();
//! ```

mod clock;
mod error;
mod logger;
mod record;
mod writer;

pub use clock::{Clock, SystemClock};
pub use error::LoggerError;
pub use logger::{Logger, LoggerOptions};
