use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced while starting a [`Logger`](crate::Logger).
///
/// Once the logger runs, failures to open a day file are never surfaced: the
/// writer reports them through `tracing` and drops lines until a later open
/// succeeds.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("can't create log directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("can't spawn log writer thread: {0}")]
    Spawn(#[source] io::Error),
}

impl LoggerError {
    pub(crate) fn create_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CreateDir { path: path.into(), source }
    }
}
