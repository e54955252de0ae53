//! Output sinks for downloaded bytes.
//!
//! Blocks reach the sink strictly in file order, so both sinks are append-only:
//! an in-memory buffer or a buffered file that was created by this download.
//!
//! Existing files are never overwritten. The existence check in
//! `exists_no_traverse` gives an early answer when the destination is chosen,
//! the authoritative check is the `create_new` open in `FileSink::create`.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error};

use crate::error::DownloadError;

/// Buffers larger than this are grown on demand instead of reserved up front
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Successful result of a download
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutput {
    /// Whole file contents
    Buffer(Vec<u8>),
    /// Path of the completed output file
    File(PathBuf),
}

impl DownloadOutput {
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            DownloadOutput::Buffer(buffer) => Some(buffer),
            DownloadOutput::File(_) => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            DownloadOutput::Buffer(_) => None,
            DownloadOutput::File(path) => Some(path),
        }
    }
}

/// Checks if a path exists without traversing symlinks
///
/// A dangling symlink at the destination still counts as existing.
pub fn exists_no_traverse(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

pub(crate) struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Creates the destination file and any missing parent directories
    pub async fn create(path: &Path) -> Result<Self, DownloadError> {
        let sink_error =
            |source: io::Error| DownloadError::Sink { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(sink_error)?;
        }
        let opened = OpenOptions::new().write(true).create_new(true).open(path).await;
        let file = opened.map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => DownloadError::DestinationExists(path.to_path_buf()),
            _ => sink_error(e),
        })?;
        debug!("opened output file {:?}", path);
        Ok(Self { path: path.to_path_buf(), writer: Some(BufWriter::new(file)) })
    }
}

pub(crate) enum Sink {
    Buffer(Vec<u8>),
    File(FileSink),
}

impl Sink {
    pub fn buffer() -> Self {
        Sink::Buffer(Vec::new())
    }

    /// Reserves buffer space once the file size is known
    pub fn reserve(&mut self, size: u64) {
        if let Sink::Buffer(buffer) = self {
            buffer.reserve(size.min(MAX_PREALLOCATION) as usize);
        }
    }

    /// Appends `data` at the end of the output
    pub async fn write(&mut self, data: &[u8]) -> Result<(), DownloadError> {
        match self {
            Sink::Buffer(buffer) => {
                buffer.extend_from_slice(data);
                Ok(())
            }
            Sink::File(sink) => {
                let Some(writer) = sink.writer.as_mut() else {
                    return Err(DownloadError::Sink {
                        path: sink.path.clone(),
                        source: io::Error::new(io::ErrorKind::BrokenPipe, "output file closed"),
                    });
                };
                writer
                    .write_all(data)
                    .await
                    .map_err(|source| DownloadError::Sink { path: sink.path.clone(), source })
            }
        }
    }

    /// Flushes and closes the output file; a no-op for buffers and closed files
    pub async fn close(&mut self) -> Result<(), DownloadError> {
        let Sink::File(sink) = self else {
            return Ok(());
        };
        let Some(mut writer) = sink.writer.take() else {
            return Ok(());
        };
        let closed = match writer.flush().await {
            Ok(()) => writer.shutdown().await,
            Err(e) => Err(e),
        };
        closed.map_err(|source| DownloadError::Sink { path: sink.path.clone(), source })
    }

    /// Closes the sink on a failure path, where a close error is only logged
    pub async fn abandon(&mut self) {
        if let Err(e) = self.close().await {
            error!("error closing output after failure: {}", e);
        }
    }

    /// Hands out the finished output, leaving an empty buffer behind
    pub fn take_output(&mut self) -> DownloadOutput {
        match self {
            Sink::Buffer(buffer) => DownloadOutput::Buffer(std::mem::take(buffer)),
            Sink::File(sink) => DownloadOutput::File(sink.path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffer_appends_in_order() {
        let mut sink = Sink::buffer();
        sink.reserve(6);
        sink.write(b"abc").await.unwrap();
        sink.write(b"def").await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(sink.take_output(), DownloadOutput::Buffer(b"abcdef".to_vec()));
    }

    #[tokio::test]
    async fn file_sink_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb/PIONEER/track.mp3");
        let mut sink = Sink::File(FileSink::create(&path).await.unwrap());
        sink.write(b"hello ").await.unwrap();
        sink.write(b"player").await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(sink.take_output(), DownloadOutput::File(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello player");
    }

    #[tokio::test]
    async fn file_sink_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.bin");
        std::fs::write(&path, b"keep me").unwrap();
        assert!(exists_no_traverse(&path));

        let err = FileSink::create(&path).await.err().unwrap();
        assert!(matches!(err, DownloadError::DestinationExists(p) if p == path));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Sink::File(FileSink::create(&dir.path().join("f")).await.unwrap());
        sink.close().await.unwrap();
        assert!(matches!(sink.write(b"x").await, Err(DownloadError::Sink { .. })));
    }
}
