//! Shared fixtures for in-process server/client testing.
//!
//! Every fixture serves a fresh temporary directory through a
//! `SafeFilesystem`, either over an in-memory channel pair or a WebSocket
//! bound to an ephemeral localhost port.

// Allow dead code - these utilities are used by different test files
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use sftp_pipe::server::{serve_channel, LocalFilesystem, SafeFilesystem, ServerConfig, SessionOptions};
use sftp_pipe::transport::{memory, Channel, Connector, TransportError};
use sftp_pipe::{ClientOptions, SftpClient, SftpServer};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Target name for fixture logs (consistent with library naming)
const TARGET: &str = "sftp-pipe::fixture";

pub type ServedFs = SafeFilesystem<LocalFilesystem>;

/// Initialize tracing once for the test process.
static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Confined filesystem over `dir`.
pub fn served_fs(dir: &Path, options: SessionOptions) -> Arc<ServedFs> {
    Arc::new(SafeFilesystem::new(LocalFilesystem::new(), dir, options).expect("serve root"))
}

/// A client connected to a session over an in-memory channel.
pub struct MemoryFixture {
    pub dir: TempDir,
    pub fs: Arc<ServedFs>,
    pub client: SftpClient,
    pub server: JoinHandle<anyhow::Result<()>>,
}

impl MemoryFixture {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default(), SessionOptions::default()).await
    }

    pub async fn with_config(config: ServerConfig, options: SessionOptions) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = served_fs(dir.path(), options);
        let (client_side, server_side) = memory::pair(64);
        let server = tokio::spawn(serve_channel(Arc::clone(&fs), server_side, config));
        let client = SftpClient::connect(client_side, ClientOptions::default())
            .await
            .expect("handshake");
        tracing::debug!(target: TARGET, root = %dir.path().display(), "memory fixture ready");
        Self {
            dir,
            fs,
            client,
            server,
        }
    }

    pub fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

/// Start a WebSocket server on 127.0.0.1 and return its URL.
pub async fn start_websocket_server(dir: &Path, options: SessionOptions) -> String {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let fs = SafeFilesystem::new(LocalFilesystem::new(), dir, options).expect("serve root");
    tokio::spawn(SftpServer::new(fs).serve_listener(listener));
    format!("ws://{}/", addr)
}

/// Connector that opens in-memory sessions against one directory and can
/// sever the current connection or refuse new ones on demand.
pub struct ServedConnector {
    fs: Arc<ServedFs>,
    sessions: Mutex<Vec<JoinHandle<anyhow::Result<()>>>>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl ServedConnector {
    pub fn new(dir: &Path) -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            fs: served_fs(dir, SessionOptions::default()),
            sessions: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        })
    }

    /// Abort every running session; clients see their channel close.
    pub fn drop_connections(&self) {
        for session in self.sessions.lock().unwrap().drain(..) {
            session.abort();
        }
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Shared handle so a test keeps control after the adapter takes ownership.
pub struct SharedConnector(pub Arc<ServedConnector>);

#[async_trait::async_trait]
impl Connector for SharedConnector {
    async fn connect(&self) -> Result<Channel, TransportError> {
        let this = &self.0;
        this.attempts.fetch_add(1, Ordering::SeqCst);
        if this.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionRefused);
        }
        let (client_side, server_side) = memory::pair(64);
        let session = tokio::spawn(serve_channel(
            Arc::clone(&this.fs),
            server_side,
            ServerConfig::default(),
        ));
        this.sessions.lock().unwrap().push(session);
        Ok(client_side)
    }
}
