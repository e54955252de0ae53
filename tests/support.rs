use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use nfs_fetch::{ClientError, FileHandle, LookupResult, NfsClient, NfsStatus};

pub const PLAYER: &str = "169.254.45.12:2049";

pub fn host() -> SocketAddr {
    PLAYER.parse().unwrap()
}

pub fn mount_handle() -> FileHandle {
    FileHandle::from_bytes(&[0x01; 32]).unwrap()
}

/// Deterministic file contents that differ at every chunk boundary
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// How the mock answers a READ at a given offset
#[derive(Clone, Debug)]
pub enum ReadBehavior {
    /// Reply with the requested range after the delay
    Reply(Duration),
    /// Reply with at most this many bytes of the requested range after the delay
    Short(Duration, u32),
    /// Fail with a timeout after the delay
    Fail(Duration),
    /// Never answer
    Hang,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory player serving one file with scripted READ behavior
pub struct ScriptedClient {
    data: Vec<u8>,
    lookup_status: Option<NfsStatus>,
    default_behavior: ReadBehavior,
    behaviors: HashMap<u64, ReadBehavior>,
    lookups: AtomicUsize,
    requests: Mutex<Vec<(u64, u32)>>,
    replies: Mutex<Vec<u64>>,
    active: AtomicUsize,
    high_water: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            lookup_status: None,
            default_behavior: ReadBehavior::Reply(Duration::ZERO),
            behaviors: HashMap::new(),
            lookups: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn with_lookup_status(mut self, status: NfsStatus) -> Self {
        self.lookup_status = Some(status);
        self
    }

    pub fn with_default(mut self, behavior: ReadBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    pub fn with_read(mut self, offset: u64, behavior: ReadBehavior) -> Self {
        self.behaviors.insert(offset, behavior);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// `(offset, count)` of every READ issued, in issue order
    pub fn requests(&self) -> Vec<(u64, u32)> {
        self.requests.lock().unwrap().clone()
    }

    /// Offsets of successful replies, in the order they were returned
    pub fn replies(&self) -> Vec<u64> {
        self.replies.lock().unwrap().clone()
    }

    fn reply(&self, offset: u64, count: u32) -> Vec<u8> {
        let start = (offset as usize).min(self.data.len());
        let end = (start + count as usize).min(self.data.len());
        self.replies.lock().unwrap().push(offset);
        self.data[start..end].to_vec()
    }

    /// Largest number of READs that were outstanding at the same time
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NfsClient for ScriptedClient {
    async fn lookup_path(
        &self,
        _host: SocketAddr,
        _mount_handle: &FileHandle,
        _path: &str,
    ) -> Result<LookupResult, ClientError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.lookup_status {
            return Err(ClientError::Status(status));
        }
        Ok(LookupResult {
            handle: FileHandle::from_bytes(&[0xfe; 32]).unwrap(),
            size: self.data.len() as u64,
        })
    }

    async fn read_data(
        &self,
        _host: SocketAddr,
        _handle: &FileHandle,
        offset: u64,
        count: u32,
    ) -> Result<Vec<u8>, ClientError> {
        self.requests.lock().unwrap().push((offset, count));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let behavior = self.behaviors.get(&offset).unwrap_or(&self.default_behavior).clone();
        match behavior {
            ReadBehavior::Reply(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.reply(offset, count))
            }
            ReadBehavior::Short(delay, limit) => {
                tokio::time::sleep(delay).await;
                Ok(self.reply(offset, count.min(limit)))
            }
            ReadBehavior::Fail(delay) => {
                tokio::time::sleep(delay).await;
                Err(ClientError::Timeout(Duration::from_secs(2)))
            }
            ReadBehavior::Hang => futures::future::pending().await,
        }
    }
}

pub fn shared(client: ScriptedClient) -> Arc<ScriptedClient> {
    Arc::new(client)
}
