//! Errors that end a download.
//!
//! Every variant is terminal: the first one recorded becomes the result of
//! `NfsDownload::start` and later failures are only logged. Short replies are
//! not represented here, they are written as received and logged.

use std::io;
use std::path::PathBuf;

use tokio::task::JoinError;

use crate::client::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("lookup of {path} failed: {source}")]
    Lookup {
        path: String,
        #[source]
        source: ClientError,
    },

    #[error("read at offset {offset} failed: {source}")]
    Read {
        offset: u64,
        #[source]
        source: ClientError,
    },

    #[error("transfer stalled waiting for offset {offset} ({attempts} stall checks)")]
    Stalled { offset: u64, attempts: u32 },

    #[error("output file already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("output file {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download cancelled")]
    Cancelled,

    #[error("download already started")]
    AlreadyStarted,

    #[error("invalid download configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("read task aborted: {0}")]
    Task(#[from] JoinError),
}
