use std::panic::Location;
use std::path::Path;

use chrono::{DateTime, Local};
use crossbeam::channel::Sender;

/// One formatted log line with the time it was submitted at.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) at: DateTime<Local>,
    pub(crate) line: String,
}

impl Record {
    pub(crate) fn new(at: DateTime<Local>, location: &Location<'_>, msg: &str) -> Self {
        let file = Path::new(location.file()).file_name().and_then(|f| f.to_str()).unwrap_or("???");

        let mut line = format!("{} {}:{}: {}", at.format("%Y/%m/%d %H:%M:%S"), file, location.line(), msg);
        if !line.ends_with('\n') {
            line.push('\n');
        }
        Self { at, line }
    }
}

/// Work items for the writer thread, processed strictly in queue order.
#[derive(Debug)]
pub(crate) enum Command {
    Line(Record),
    /// Write the record, flush, then acknowledge.
    Fatal(Record, Sender<()>),
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let location = Location::caller();
        let record = Record::new(at, location, "hello");

        let expected_prefix = "2024/03/07 09:05:02 record.rs:";
        assert!(record.line.starts_with(expected_prefix), "{}", record.line);
        assert!(record.line.ends_with(": hello\n"));
    }

    #[test]
    fn test_trailing_newline_not_doubled() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let record = Record::new(at, Location::caller(), "done\n");
        assert!(record.line.ends_with(": done\n"));
        assert!(!record.line.ends_with("\n\n"));
    }
}
