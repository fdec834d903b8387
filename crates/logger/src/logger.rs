use std::fmt;
use std::fs::DirBuilder;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::error::LoggerError;
use crate::record::{Command, Record};
use crate::writer::DailyWriter;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Where and how the day files are written.
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    /// Suffix of every day file, `<stamp><file_name>.txt`.
    pub file_name: String,
    pub directory: PathBuf,
    pub file_mode: u32,
    pub dir_mode: u32,
    pub queue_capacity: usize,
}

impl LoggerOptions {
    pub fn new(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self { directory: directory.into(), file_name: file_name.into(), ..Self::default() }
    }

    #[must_use]
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    #[must_use]
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            file_name: "server".into(),
            directory: PathBuf::from("log"),
            file_mode: 0o644,
            dir_mode: 0o755,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Handle to a daily rotating log.
///
/// Cloning is cheap; all clones feed the same writer thread. Lines are
/// written in submission order. The writer stops when [`Logger::stop`] is
/// called or the last handle is dropped, after draining queued lines.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    sender: Sender<Command>,
    clock: Arc<dyn Clock>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Logger {
    pub fn start(options: LoggerOptions) -> Result<Self, LoggerError> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: LoggerOptions, clock: Arc<dyn Clock>) -> Result<Self, LoggerError> {
        let LoggerOptions { file_name, directory, file_mode, dir_mode, queue_capacity } = options;

        create_dir(&directory, dir_mode)?;

        let (sender, receiver) = channel::bounded(queue_capacity.max(1));
        let writer = DailyWriter::new(directory, file_name, file_mode);

        let handle = thread::Builder::new()
            .name("micro-daily-log".into())
            .spawn(move || writer.run(&receiver))
            .map_err(LoggerError::Spawn)?;

        Ok(Self { inner: Arc::new(Inner { sender, clock, writer: Mutex::new(Some(handle)) }) })
    }

    /// Queue one line. Blocks only while the queue is full.
    #[track_caller]
    pub fn println(&self, msg: impl AsRef<str>) {
        let record = Record::new(self.inner.clock.now(), Location::caller(), msg.as_ref());
        if self.inner.sender.send(Command::Line(record)).is_err() {
            warn!(msg = msg.as_ref(), "log writer stopped, line dropped");
        }
    }

    /// Write the line, wait until it is flushed, then exit the process with status 1.
    #[track_caller]
    pub fn fatal(&self, msg: impl AsRef<str>) -> ! {
        let record = Record::new(self.inner.clock.now(), Location::caller(), msg.as_ref());
        let (ack_tx, ack_rx) = channel::bounded(1);

        if self.inner.sender.send(Command::Fatal(record, ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        } else {
            warn!(msg = msg.as_ref(), "log writer stopped before fatal line");
        }

        std::process::exit(1)
    }

    /// Drain queued lines, close the current file and join the writer.
    ///
    /// Calling it again, from any clone, does nothing.
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl Inner {
    fn stop(&self) {
        let handle = match self.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let Some(handle) = handle else {
            return;
        };

        let _ = self.sender.send(Command::Stop);
        if handle.join().is_err() {
            warn!("log writer thread panicked");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("queued", &self.inner.sender.len()).finish_non_exhaustive()
    }
}

fn create_dir(directory: &Path, mode: u32) -> Result<(), LoggerError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }

    builder.create(directory).map_err(|e| LoggerError::create_dir(directory, e))
}
