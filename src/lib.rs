//! NFS Fetch - pipelined file downloads from NFS servers without a kernel mount
//!
//! This library downloads single files from NFSv2/v3 exports, as offered by DJ
//! media players sharing their USB and SD storage. It sits on top of an RPC
//! client supplied by the caller and turns LOOKUP and READ calls into one
//! ordered byte stream.
//!
//! ## Supported Features
//!
//! - Several READ calls outstanding at once, bounded per download
//! - Reassembly of replies arriving in any order
//! - Output into memory or into a newly created file
//! - Progress callbacks at the write frontier
//! - Detection of transfers whose frontier stopped moving
//! - Cancellation from another task
//!
//! ## Main Components
//!
//! - `client`: The `NfsClient` trait through which the engine issues LOOKUP
//!   and READ calls. Wire encoding, portmap and MOUNT live behind it.
//!
//! - `download`: `NfsDownload`, one instance per file, driving the transfer
//!   from lookup to the final result.
//!
//! - `config`: Tunables such as chunk size, concurrency and stall timeout.
//!
//! - `status`: NFS status codes a server may answer with.
//!
//! ## Usage
//!
//! Implement `NfsClient` for the RPC stack in use, create an `NfsDownload`
//! for each file and await `NfsDownload::start`.

pub mod client;
mod completion;
pub mod config;
pub mod download;
pub mod error;
mod progress;
pub mod sink;
mod stall;
pub mod status;

pub use client::{ClientError, FileHandle, LookupResult, NfsClient};
pub use config::DownloadConfig;
pub use download::{DownloadState, NfsDownload};
pub use error::DownloadError;
pub use progress::{ProgressCallback, PROGRESS_STEP};
pub use sink::DownloadOutput;
pub use status::NfsStatus;
