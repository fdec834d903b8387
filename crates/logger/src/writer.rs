use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use crossbeam::channel::Receiver;
use tracing::{error, info};

use crate::record::{Command, Record};

struct DayFile {
    day: NaiveDate,
    path: PathBuf,
    out: BufWriter<File>,
}

/// Owns the current day file. Runs on its own thread, fed by the logger queue.
pub(crate) struct DailyWriter {
    directory: PathBuf,
    file_name: String,
    file_mode: u32,
    current: Option<DayFile>,
    // set while opens keep failing, so the failure is reported once per streak
    failing: bool,
    // where open failures go besides tracing; standard error outside tests
    fallback: Box<dyn Write + Send>,
}

impl DailyWriter {
    pub(crate) fn new(directory: PathBuf, file_name: String, file_mode: u32) -> Self {
        Self::with_fallback(directory, file_name, file_mode, Box::new(io::stderr()))
    }

    fn with_fallback(directory: PathBuf, file_name: String, file_mode: u32, fallback: Box<dyn Write + Send>) -> Self {
        Self { directory, file_name, file_mode, current: None, failing: false, fallback }
    }

    pub(crate) fn run(mut self, receiver: &Receiver<Command>) {
        while let Ok(command) = receiver.recv() {
            match command {
                Command::Line(record) => self.write(&record),
                Command::Fatal(record, ack) => {
                    self.write(&record);
                    self.flush();
                    let _ = ack.send(());
                }
                Command::Stop => break,
            }

            if receiver.is_empty() {
                self.flush();
            }
        }

        self.close();
    }

    fn write(&mut self, record: &Record) {
        if self.current.as_ref().is_none_or(|f| f.day != record.at.date_naive()) {
            self.rotate(record.at);
        }

        let Some(file) = self.current.as_mut() else {
            return;
        };

        if let Err(e) = file.out.write_all(record.line.as_bytes()) {
            error!(cause = %e, path = ?file.path, "failed to write log line, reopening on next record");
            self.current = None;
        }
    }

    fn rotate(&mut self, at: DateTime<Local>) {
        self.close();

        let path = self.directory.join(format!("{}{}.txt", file_stamp(at), self.file_name));
        match self.open(&path) {
            Ok(file) => {
                if self.failing {
                    info!(path = ?path, "log file opened again after failures");
                }
                self.failing = false;
                self.current = Some(DayFile { day: at.date_naive(), path, out: BufWriter::new(file) });
            }
            Err(e) => {
                if !self.failing {
                    error!(cause = %e, path = ?path, "failed to open log file, dropping lines");
                    let _ = writeln!(self.fallback, "can't open log file {}: {e}, dropping lines", path.display());
                }
                self.failing = true;
            }
        }
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.append(true).create(true).read(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.file_mode);
        }

        options.open(path)
    }

    fn flush(&mut self) {
        if let Some(file) = self.current.as_mut()
            && let Err(e) = file.out.flush()
        {
            error!(cause = %e, path = ?file.path, "failed to flush log file");
        }
    }

    fn close(&mut self) {
        self.flush();
        self.current = None;
    }
}

/// `Oct 19 23:59:58` rendered as `Oct_19_23-59-58`; single digit days keep the
/// padding blank, hence `Jan__5_...`.
pub(crate) fn file_stamp(at: DateTime<Local>) -> String {
    at.format("%b %e %H:%M:%S").to_string().replace(' ', "_").replace(':', "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::panic::Location;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_open_failure_reported_once_per_streak() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let fallback = SharedBuf::default();
        let mut writer = DailyWriter::with_fallback(missing.clone(), "server".into(), 0o644, Box::new(fallback.clone()));

        let at = Local.with_ymd_and_hms(2024, 10, 19, 12, 0, 0).unwrap();
        writer.write(&Record::new(at, Location::caller(), "first"));
        writer.write(&Record::new(at, Location::caller(), "second"));
        assert_eq!(fallback.text().matches("can't open log file").count(), 1);
        assert!(fallback.text().contains("gone"));

        std::fs::create_dir(&missing).unwrap();
        writer.write(&Record::new(at, Location::caller(), "third"));
        writer.close();
        assert_eq!(fallback.text().lines().count(), 1);

        let files: Vec<_> = std::fs::read_dir(&missing).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_file_stamp() {
        let at = Local.with_ymd_and_hms(2024, 10, 19, 23, 59, 58).unwrap();
        assert_eq!(file_stamp(at), "Oct_19_23-59-58");

        let at = Local.with_ymd_and_hms(2024, 1, 5, 7, 3, 0).unwrap();
        assert_eq!(file_stamp(at), "Jan__5_07-03-00");
    }
}
