use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use s3_provisioner::communicator::Communicator;
use s3_provisioner::config::AccessConfig;
use s3_provisioner::storage::{ObjectBody, SessionFactory, StaticSessionFactory, StorageSession};
use s3_provisioner::ui::Ui;
use serde_yaml::Value;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Parses a YAML snippet into a raw configuration map.
#[allow(dead_code)]
pub fn raw(yaml: &str) -> Value {
    serde_yaml::from_str(yaml).expect("test yaml should parse")
}

/// Minimal valid configuration pointing at `my-bucket/path/to/file.txt`.
#[allow(dead_code)]
pub fn valid_raw() -> Value {
    raw("bucket: my-bucket\nkey: path/to/file.txt\nlocal_path: /tmp/file.txt\n")
}

/// Builds a session factory backed by an in-memory bucket holding one object.
#[allow(dead_code)]
pub async fn memory_sessions(bucket: &str, key: &str, data: &'static [u8]) -> StaticSessionFactory {
    let store = Arc::new(InMemory::new());
    store
        .put(&Path::from(key), PutPayload::from_static(data))
        .await
        .expect("in-memory put should succeed");
    StaticSessionFactory::new().with_bucket(bucket, store as Arc<dyn ObjectStore>)
}

/// Ui that records status lines and error lines separately.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingUi {
    pub lines: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingUi {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn message(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

type Uploads = Mutex<Vec<(Utf8PathBuf, Vec<u8>)>>;

/// Communicator that reads the whole stream and records it.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingCommunicator {
    pub uploads: Uploads,
    pub calls: AtomicUsize,
    /// When set, the upload fails with this message after reading the stream.
    pub fail_with: Option<String>,
}

#[allow(dead_code)]
impl RecordingCommunicator {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<(Utf8PathBuf, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Communicator for RecordingCommunicator {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn upload(
        &self,
        dst: &Utf8Path,
        src: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut data = Vec::new();
        src.read_to_end(&mut data).await?;
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }
        let written = data.len() as u64;
        self.uploads.lock().unwrap().push((dst.to_owned(), data));
        Ok(written)
    }
}

/// Session factory that refuses to establish a session.
#[allow(dead_code)]
#[derive(Default)]
pub struct FailingSessionFactory {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl SessionFactory for FailingSessionFactory {
    async fn session(&self, _access: &AccessConfig, _bucket: &str) -> Result<Box<dyn StorageSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("no valid credential sources found")
    }
}

/// Session factory whose session setup never completes.
#[allow(dead_code)]
#[derive(Default)]
pub struct HangingSessionFactory {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl SessionFactory for HangingSessionFactory {
    async fn session(&self, _access: &AccessConfig, _bucket: &str) -> Result<Box<dyn StorageSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Session factory whose `get_object` waits before answering.
#[allow(dead_code)]
pub struct SlowSessionFactory {
    pub delay: Duration,
}

#[allow(dead_code)]
struct SlowSession {
    delay: Duration,
}

#[async_trait]
impl SessionFactory for SlowSessionFactory {
    async fn session(&self, _access: &AccessConfig, _bucket: &str) -> Result<Box<dyn StorageSession>> {
        Ok(Box::new(SlowSession { delay: self.delay }))
    }
}

#[async_trait]
impl StorageSession for SlowSession {
    async fn get_object(&self, _key: &str) -> Result<ObjectBody> {
        tokio::time::sleep(self.delay).await;
        Ok(ObjectBody::from_bytes(&b"late"[..]))
    }
}

/// Reader that flags when it is dropped.
#[allow(dead_code)]
pub struct DropFlagReader<R> {
    inner: R,
    released: Arc<AtomicBool>,
}

impl<R> Drop for DropFlagReader<R> {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DropFlagReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Session factory whose object body reports when it is released.
#[allow(dead_code)]
pub struct TrackedSessionFactory {
    pub data: &'static [u8],
    pub released: Arc<AtomicBool>,
    pub gets: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl TrackedSessionFactory {
    pub fn new(data: &'static [u8]) -> Self {
        Self {
            data,
            released: Arc::new(AtomicBool::new(false)),
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
struct TrackedSession {
    data: &'static [u8],
    released: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionFactory for TrackedSessionFactory {
    async fn session(&self, _access: &AccessConfig, _bucket: &str) -> Result<Box<dyn StorageSession>> {
        Ok(Box::new(TrackedSession {
            data: self.data,
            released: Arc::clone(&self.released),
            gets: Arc::clone(&self.gets),
        }))
    }
}

#[async_trait]
impl StorageSession for TrackedSession {
    async fn get_object(&self, _key: &str) -> Result<ObjectBody> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let reader = DropFlagReader {
            inner: self.data,
            released: Arc::clone(&self.released),
        };
        Ok(ObjectBody::new(reader, Some(self.data.len() as u64)))
    }
}

/// Session factory whose object body never yields any data.
#[allow(dead_code)]
#[derive(Default)]
pub struct StallingSessionFactory {
    pub released: Arc<AtomicBool>,
}

#[allow(dead_code)]
struct StallingSession {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl SessionFactory for StallingSessionFactory {
    async fn session(&self, _access: &AccessConfig, _bucket: &str) -> Result<Box<dyn StorageSession>> {
        Ok(Box::new(StallingSession {
            released: Arc::clone(&self.released),
        }))
    }
}

#[async_trait]
impl StorageSession for StallingSession {
    async fn get_object(&self, _key: &str) -> Result<ObjectBody> {
        let (writer, reader) = tokio::io::duplex(64);
        // Keep the writer alive for as long as the body exists.
        let reader = DropFlagReader {
            inner: KeepAlive { reader, _writer: writer },
            released: Arc::clone(&self.released),
        };
        Ok(ObjectBody::new(reader, None))
    }
}

#[allow(dead_code)]
struct KeepAlive {
    reader: tokio::io::DuplexStream,
    _writer: tokio::io::DuplexStream,
}

impl AsyncRead for KeepAlive {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}
