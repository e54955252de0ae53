use std::io::{ErrorKind, SeekFrom};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

use nfs_fetch::{ClientError, FileHandle, LookupResult, NfsClient, NfsStatus};

/// An `NfsClient` that serves a local directory instead of a player
///
/// File handles are indices into the list of looked up paths. READ replies
/// are delayed by a few milliseconds depending on the offset so that they
/// arrive out of order.
#[derive(Debug)]
pub struct LocalClient {
    root: PathBuf,
    handles: Mutex<Vec<PathBuf>>,
}

impl LocalClient {
    pub fn new(root: PathBuf) -> Self {
        Self { root, handles: Mutex::new(Vec::new()) }
    }

    async fn resolve(&self, handle: &FileHandle) -> Result<PathBuf, ClientError> {
        let bytes: [u8; 8] =
            handle.as_bytes().try_into().map_err(|_| ClientError::Status(NfsStatus::BadHandle))?;
        let index = u64::from_be_bytes(bytes) as usize;
        self.handles.lock().await.get(index).cloned().ok_or(ClientError::Status(NfsStatus::Stale))
    }
}

fn jitter(offset: u64, count: u32) -> Duration {
    let chunk = offset / u64::from(count.max(1));
    Duration::from_millis((chunk * 7919) % 13)
}

#[async_trait]
impl NfsClient for LocalClient {
    async fn lookup_path(
        &self,
        _host: SocketAddr,
        _mount_handle: &FileHandle,
        path: &str,
    ) -> Result<LookupResult, ClientError> {
        let full = self.root.join(path.trim_start_matches('/'));
        let meta = tokio::fs::metadata(&full).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ClientError::Status(NfsStatus::NoEnt),
            ErrorKind::PermissionDenied => ClientError::Status(NfsStatus::Acces),
            _ => ClientError::Io(e),
        })?;
        if meta.is_dir() {
            return Err(ClientError::Status(NfsStatus::IsDir));
        }
        let mut handles = self.handles.lock().await;
        let index = handles.len() as u64;
        handles.push(full);
        debug!("lookup {} -> handle {}", path, index);
        let handle = FileHandle::from_bytes(&index.to_be_bytes())
            .ok_or(ClientError::Status(NfsStatus::ServerFault))?;
        Ok(LookupResult { handle, size: meta.len() })
    }

    async fn read_data(
        &self,
        _host: SocketAddr,
        handle: &FileHandle,
        offset: u64,
        count: u32,
    ) -> Result<Vec<u8>, ClientError> {
        let path = self.resolve(handle).await?;
        tokio::time::sleep(jitter(offset, count)).await;

        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut data = Vec::with_capacity(count as usize);
        file.take(u64::from(count)).read_to_end(&mut data).await?;
        Ok(data)
    }
}
