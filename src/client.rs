//! Client module defines the boundary between the download engine and the RPC
//! layer that actually talks to the player.
//!
//! This module provides:
//! - The `NfsClient` trait that an RPC implementation must provide (path lookup
//!   relative to a mount handle, and single-chunk reads)
//! - `FileHandle`, the opaque token returned by MOUNT and LOOKUP
//! - `LookupResult` and `ClientError`, the values the engine consumes
//!
//! XDR encoding, portmap queries and the MOUNT call itself all live behind this
//! trait. The engine only ever sees resolved handles and raw file bytes.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use smallvec::SmallVec;

use crate::status::NfsStatus;

/// Largest file handle defined by NFS version 3 (`NFS3_FHSIZE`)
pub const MAX_FHSIZE: usize = 64;

/// Opaque server-issued file handle
///
/// NFSv2 handles are a fixed 32 bytes and NFSv3 handles are at most 64 bytes,
/// so both are stored inline. A handle is cloned into every read task.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FileHandle(SmallVec<[u8; MAX_FHSIZE]>);

impl FileHandle {
    /// Wraps raw handle bytes
    ///
    /// # Returns
    ///
    /// `None` if `bytes` is longer than `MAX_FHSIZE`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_FHSIZE {
            return None;
        }
        Some(Self(SmallVec::from_slice(bytes)))
    }

    /// Raw handle bytes as they go on the wire
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHandle(")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Outcome of resolving a remote path
#[derive(Clone, Debug)]
pub struct LookupResult {
    /// Handle used for every subsequent READ
    pub handle: FileHandle,
    /// File length in bytes from the returned attributes
    pub size: u64,
}

/// Failure reported by the RPC layer for a single call
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server replied {0}")]
    Status(NfsStatus),

    #[error("server replied with unknown status {0}")]
    UnknownStatus(u32),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// Maps a raw non-OK status word from a reply
    pub fn from_status(raw: u32) -> Self {
        match NfsStatus::from_wire(raw) {
            Some(status) => ClientError::Status(status),
            None => ClientError::UnknownStatus(raw),
        }
    }
}

/// The RPC operations a download needs from the client stack
///
/// Implementations are shared between concurrently running read tasks, so
/// every method takes `&self` and must tolerate being called while other calls
/// on the same client are still outstanding. Per-request retransmission and
/// timeouts belong here: a read that gives up should return
/// `ClientError::Timeout` rather than never completing.
#[async_trait]
pub trait NfsClient: Send + Sync {
    /// Resolves `path` below the export identified by `mount_handle`
    ///
    /// # Arguments
    /// * `host` - Address of the player's NFS service
    /// * `mount_handle` - Root handle obtained from the MOUNT call
    /// * `path` - Slash separated path relative to the export root
    ///
    /// # Returns
    /// * `Result<LookupResult, ClientError>` - Handle and size of the file
    async fn lookup_path(
        &self,
        host: SocketAddr,
        mount_handle: &FileHandle,
        path: &str,
    ) -> Result<LookupResult, ClientError>;

    /// Reads up to `count` bytes at `offset`
    ///
    /// The reply is expected to hold exactly `count` bytes unless the range
    /// touches the end of the file.
    async fn read_data(
        &self,
        host: SocketAddr,
        handle: &FileHandle,
        offset: u64,
        count: u32,
    ) -> Result<Vec<u8>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_handle_rejects_oversized_bytes() {
        assert!(FileHandle::from_bytes(&[0u8; MAX_FHSIZE]).is_some());
        assert!(FileHandle::from_bytes(&[0u8; MAX_FHSIZE + 1]).is_none());
    }

    #[test]
    fn file_handle_debug_is_hex() {
        let fh = FileHandle::from_bytes(&[0x01, 0xab]).unwrap();
        assert_eq!(format!("{fh:?}"), "FileHandle(01ab)");
    }

    #[test]
    fn maps_raw_status() {
        assert!(matches!(ClientError::from_status(70), ClientError::Status(NfsStatus::Stale)));
        assert!(matches!(ClientError::from_status(4242), ClientError::UnknownStatus(4242)));
    }
}
