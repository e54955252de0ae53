//! Pipelined download of a single remote file.
//!
//! `NfsDownload` resolves the remote path, then keeps up to `max_in_flight`
//! READ calls outstanding. Every READ runs as its own task in a `JoinSet`;
//! replies are fanned back into one loop which owns all transfer state, so no
//! locking is needed:
//!
//! - `read_offset` is the next byte not yet requested, `write_offset` the next
//!   byte not yet written (`write_offset <= read_offset <= size`)
//! - replies that arrive ahead of `write_offset` wait in `blocks` until the gap
//!   before them is filled, so the sink always sees the file in order
//! - a timer re-runs the stall check while no reply arrives
//!
//! Any single failed READ is fatal to the download; retransmission of a single
//! request is the job of the `NfsClient` implementation. All terminal paths
//! go through `finish` or `fail`, which settle the result exactly once and
//! close the sink.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tracing_attributes::instrument;

use crate::client::{ClientError, FileHandle, LookupResult, NfsClient};
use crate::completion::Completion;
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::sink::{exists_no_traverse, DownloadOutput, FileSink, Sink};
use crate::stall::{StallCheck, StallDetector};

type ReadReply = (u64, Result<Vec<u8>, ClientError>);

/// Lifecycle of a download
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DownloadState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// One remote file being fetched
///
/// A download is configured, started once, and discarded. Callers fetching
/// several files run one `NfsDownload` per file; each has its own concurrency
/// budget.
pub struct NfsDownload {
    client: Arc<dyn NfsClient>,
    host: SocketAddr,
    mount_handle: FileHandle,
    src_path: String,
    dst_path: Option<PathBuf>,
    config: DownloadConfig,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<DownloadState>>,
}

/// Marks a download as failed if `start` is dropped before it resolves
struct RunningGuard(Arc<watch::Sender<DownloadState>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if *state != DownloadState::Running {
                return false;
            }
            warn!("download dropped while running");
            *state = DownloadState::Failed;
            true
        });
    }
}

impl NfsDownload {
    /// Creates a download of `src_path` into memory
    ///
    /// # Arguments
    ///
    /// * `client` - RPC client used for LOOKUP and READ calls
    /// * `host` - Address of the player's NFS service
    /// * `mount_handle` - Export root handle from the MOUNT call
    /// * `src_path` - Path of the file relative to the export root
    pub fn new(
        client: Arc<dyn NfsClient>,
        host: SocketAddr,
        mount_handle: FileHandle,
        src_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            host,
            mount_handle,
            src_path: src_path.into(),
            dst_path: None,
            config: DownloadConfig::default(),
            progress: None,
            cancel: CancellationToken::new(),
            state: Arc::new(watch::channel(DownloadState::Created).0),
        }
    }

    pub fn with_config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Writes the download to `path` instead of memory
    ///
    /// Existing files are never overwritten. Missing parent directories are
    /// created when the download starts.
    pub fn set_output_file(&mut self, path: impl Into<PathBuf>) -> Result<(), DownloadError> {
        if self.state() != DownloadState::Created {
            return Err(DownloadError::AlreadyStarted);
        }
        let path = path.into();
        if exists_no_traverse(&path) {
            return Err(DownloadError::DestinationExists(path));
        }
        self.dst_path = Some(path);
        Ok(())
    }

    /// Registers a callback receiving `(bytes_done, total_bytes)`
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    /// Aborts the download; `start` resolves to `DownloadError::Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this download, usable while `start` is awaited
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    /// Receiver that observes state changes while `start` is awaited elsewhere
    pub fn watch_state(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub fn src_path(&self) -> &str {
        &self.src_path
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.dst_path.as_deref()
    }

    /// Runs the download to completion
    ///
    /// Resolves only once the transfer is terminal, with either the file
    /// contents (or output path) or the first fatal error.
    #[instrument(skip(self), fields(path = %self.src_path))]
    pub async fn start(&mut self) -> Result<DownloadOutput, DownloadError> {
        if self.state() != DownloadState::Created {
            return Err(DownloadError::AlreadyStarted);
        }
        self.state.send_replace(DownloadState::Running);
        let _guard = RunningGuard(Arc::clone(&self.state));
        let result = self.run().await;
        self.state.send_replace(match result {
            Ok(_) => DownloadState::Succeeded,
            Err(_) => DownloadState::Failed,
        });
        result
    }

    async fn run(&mut self) -> Result<DownloadOutput, DownloadError> {
        self.config.validate()?;
        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let mut sink = match &self.dst_path {
            Some(path) => Sink::File(FileSink::create(path).await?),
            None => Sink::buffer(),
        };

        let lookup = tokio::select! {
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            res = self.client.lookup_path(self.host, &self.mount_handle, &self.src_path) => {
                res.map_err(|source| DownloadError::Lookup { path: self.src_path.clone(), source })
            }
        };
        let LookupResult { handle, size } = match lookup {
            Ok(found) => found,
            Err(e) => {
                error!("download failed: {}", e);
                sink.abandon().await;
                return Err(e);
            }
        };
        debug!("resolved {} to {:?}, {} bytes", self.src_path, handle, size);
        sink.reserve(size);

        let transfer = Transfer {
            client: Arc::clone(&self.client),
            host: self.host,
            handle,
            size,
            chunk_size: self.config.chunk_size,
            max_in_flight: self.config.max_in_flight,
            read_offset: 0,
            write_offset: 0,
            blocks: BTreeMap::new(),
            in_flight: JoinSet::new(),
            sink,
            stall: StallDetector::new(
                self.config.single_request_timeout,
                self.config.max_stall_retries,
            ),
            progress: ProgressReporter::new(self.progress.take(), size),
            completion: Completion::new(),
        };
        transfer.run(self.cancel.clone(), self.config.stall_check_interval()).await
    }
}

/// State of a running transfer, owned by the reassembly loop
struct Transfer {
    client: Arc<dyn NfsClient>,
    host: SocketAddr,
    handle: FileHandle,
    size: u64,
    chunk_size: u32,
    max_in_flight: usize,
    read_offset: u64,
    write_offset: u64,
    /// Received blocks ahead of `write_offset`, keyed by requested offset
    blocks: BTreeMap<u64, Vec<u8>>,
    in_flight: JoinSet<ReadReply>,
    sink: Sink,
    stall: StallDetector,
    progress: ProgressReporter,
    completion: Completion<DownloadOutput, DownloadError>,
}

impl Transfer {
    async fn run(
        mut self,
        cancel: CancellationToken,
        check_interval: Duration,
    ) -> Result<DownloadOutput, DownloadError> {
        info!("downloading {} bytes", self.size);
        if self.size == 0 {
            self.finish().await;
        } else {
            self.fill_pipeline().await;
        }

        let mut ticker = time::interval_at(Instant::now() + check_interval, check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if let Some(result) = self.completion.take() {
                return result;
            }
            tokio::select! {
                _ = cancel.cancelled() => self.fail(DownloadError::Cancelled).await,
                Some(joined) = self.in_flight.join_next() => match joined {
                    Ok((offset, reply)) => self.on_read_complete(offset, reply).await,
                    Err(e) if e.is_cancelled() => debug!("read task cancelled"),
                    Err(e) => self.fail(DownloadError::Task(e)).await,
                },
                _ = ticker.tick() => self.fill_pipeline().await,
            }
        }
    }

    /// Issues READs until the pipeline is full or the whole file is requested
    async fn fill_pipeline(&mut self) {
        if self.completion.is_settled() {
            return;
        }
        let waiting =
            self.write_offset < self.size && !self.blocks.contains_key(&self.write_offset);
        match self.stall.check(self.write_offset, waiting) {
            StallCheck::Progressing => {}
            StallCheck::Backoff { .. } => return,
            StallCheck::Exhausted { attempts } => {
                let offset = self.write_offset;
                self.fail(DownloadError::Stalled { offset, attempts }).await;
                return;
            }
        }

        while self.in_flight.len() < self.max_in_flight && self.read_offset < self.size {
            let count = (self.size - self.read_offset).min(u64::from(self.chunk_size)) as u32;
            self.send_read_request(self.read_offset, count);
            self.read_offset += u64::from(count);
        }
    }

    fn send_read_request(&mut self, offset: u64, count: u32) {
        trace!(
            "sending read request @ {} for {} bytes [{} in flight]",
            offset,
            count,
            self.in_flight.len()
        );
        let client = Arc::clone(&self.client);
        let handle = self.handle.clone();
        let host = self.host;
        self.in_flight.spawn(async move {
            let reply = client.read_data(host, &handle, offset, count).await;
            (offset, reply)
        });
    }

    async fn on_read_complete(&mut self, offset: u64, reply: Result<Vec<u8>, ClientError>) {
        if self.completion.is_settled() {
            debug!("discarding reply @ {} after download ended", offset);
            return;
        }
        let data = match reply {
            Ok(data) => data,
            Err(source) => {
                warn!("read request for offset {} failed: {}", offset, source);
                self.fail(DownloadError::Read { offset, source }).await;
                return;
            }
        };

        if offset < self.write_offset {
            debug!(
                "offset {} received but already written up to {}, ignoring",
                offset, self.write_offset
            );
        } else if self.blocks.contains_key(&offset) {
            warn!("offset {} received twice, ignoring", offset);
        } else {
            self.blocks.insert(offset, data);
        }

        self.write_blocks().await;
        if self.completion.is_settled() {
            return;
        }

        if self.write_offset == self.size {
            if self.in_flight.is_empty() {
                self.finish().await;
            } else {
                debug!(
                    "all {} bytes written, waiting for {} outstanding requests",
                    self.size,
                    self.in_flight.len()
                );
            }
        } else {
            self.fill_pipeline().await;
        }
    }

    /// Writes every block that is contiguous with the frontier
    async fn write_blocks(&mut self) {
        while let Some(mut data) = self.blocks.remove(&self.write_offset) {
            let remaining = self.size - self.write_offset;
            let expected = remaining.min(u64::from(self.chunk_size));
            if data.len() as u64 != expected {
                warn!(
                    "received {} bytes instead of {} as requested, try decreasing the chunk size",
                    data.len(),
                    expected
                );
            }
            // never write past the requested range, the next block starts there
            data.truncate(expected as usize);
            if data.is_empty() {
                break;
            }
            if let Err(e) = self.sink.write(&data).await {
                self.fail(e).await;
                return;
            }
            self.write_offset += data.len() as u64;
            self.stall.record_progress();
            self.progress.update(self.write_offset);
        }

        if !self.blocks.is_empty() {
            debug!(
                "{} blocks still queued, next expected is {}",
                self.blocks.len(),
                self.write_offset
            );
        }
    }

    async fn finish(&mut self) {
        if self.completion.is_settled() {
            warn!("finish called after download ended");
            return;
        }
        if !self.in_flight.is_empty() {
            error!("finishing download with {} requests still in flight", self.in_flight.len());
        }
        if let Err(e) = self.sink.close().await {
            self.fail(e).await;
            return;
        }
        info!(
            "finished download, {} bytes, {:.2} MiB/s",
            self.write_offset,
            self.progress.speed_mib(self.write_offset)
        );
        self.completion.settle(Ok(self.sink.take_output()));
    }

    async fn fail(&mut self, err: DownloadError) {
        if !self.completion.is_settled() {
            error!("download failed: {}", err);
            self.in_flight.abort_all();
            self.sink.abandon().await;
        }
        self.completion.settle(Err(err));
    }
}
