use chrono::{DateTime, Local};

/// Source of the wall-clock time stamped on every record.
///
/// The writer rotates on the calendar day of the record, so swapping the
/// clock is enough to drive rotation from a test.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The local system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
