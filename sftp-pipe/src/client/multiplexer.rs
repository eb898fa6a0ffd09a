//! Request multiplexer sharing one channel among concurrent callers.
//!
//! Uses an mpsc queue for request submission and DashMap for response
//! routing:
//! - Callers submit pre-encoded requests to a writer task
//! - The writer registers each request's completion before sending it
//! - A reader task routes responses to completions by request id
//! - When the channel closes every pending request fails with
//!   [`SftpError::ConnectionClosed`]

use super::error::SftpError;
use super::handle::{Handle, HandleKind};
use crate::protocol::{
    extension, FileAttrs, Item, OpenFlags, Packet, PacketType, Request, Response, StatusCode,
    VfsStats, DEFAULT_MAX_PACKET_SIZE, MAX_READ_BLOCK_LENGTH, MAX_WRITE_BLOCK_LENGTH,
    PROTOCOL_VERSION,
};
use crate::transport::{Channel, MessageSink, MessageStream};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

type Completion = oneshot::Sender<Result<Response, SftpError>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Largest frame the client will produce.
    pub max_packet_size: usize,

    /// Capacity of the request submission queue.
    pub request_channel_size: usize,

    /// Span that client log events and tasks are attached to.
    pub span: tracing::Span,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            request_channel_size: 256,
            span: tracing::Span::none(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn request_channel_size(mut self, size: usize) -> Self {
        self.request_channel_size = size;
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

/// A pending request with its response channel.
struct PendingRequest {
    /// Encoded frame
    data: Vec<u8>,
    response_tx: Completion,
    id: u32,
}

enum Command {
    Send(PendingRequest),
    Close,
}

/// State shared between callers and the I/O tasks.
struct Shared {
    pending: DashMap<u32, Completion>,
    open_handles: DashMap<u32, HandleKind>,
    closed_flag: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed_flag.store(true, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// SFTP client over one channel.
pub struct SftpClient {
    request_tx: mpsc::Sender<Command>,
    next_id: AtomicU32,
    shared: Arc<Shared>,
    extensions: Vec<(String, String)>,
    options: ClientOptions,
}

impl SftpClient {
    /// Perform the INIT/VERSION handshake and start the I/O tasks.
    pub async fn connect(channel: Channel, options: ClientOptions) -> Result<Self, SftpError> {
        let (mut sink, mut stream) = channel.into_split();

        let init = Request::Init {
            version: PROTOCOL_VERSION,
        }
        .encode(0, options.max_packet_size)
        .map_err(|e| SftpError::Protocol(e.to_string()))?;
        sink.send(init)
            .await
            .map_err(|_| SftpError::ConnectionClosed)?;

        let reply = match stream.recv().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                tracing::warn!(target: "sftp-pipe::mux", parent: &options.span, error = %e, "handshake: receive failed");
                return Err(SftpError::ConnectionClosed);
            }
            None => return Err(SftpError::ConnectionClosed),
        };
        let packet = Packet::parse(reply)?;
        let extensions = match Response::decode(&packet)? {
            Response::Version {
                version,
                extensions,
            } if version == PROTOCOL_VERSION => extensions,
            Response::Version { version, .. } => {
                return Err(SftpError::Protocol(format!(
                    "unsupported protocol version {}",
                    version
                )))
            }
            other => {
                return Err(SftpError::Protocol(format!(
                    "expected VERSION, got {:?}",
                    other.packet_type()
                )))
            }
        };

        tracing::debug!(
            target: "sftp-pipe::mux",
            parent: &options.span,
            extensions = extensions.len(),
            "handshake complete"
        );

        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            open_handles: DashMap::new(),
            closed_flag: AtomicBool::new(false),
            closed,
        });

        let (request_tx, request_rx) = mpsc::channel(options.request_channel_size);

        tokio::spawn(
            writer_loop(sink, request_rx, Arc::clone(&shared)).instrument(options.span.clone()),
        );
        tokio::spawn(reader_loop(stream, Arc::clone(&shared)).instrument(options.span.clone()));

        Ok(Self {
            request_tx,
            next_id: AtomicU32::new(1),
            shared,
            extensions,
            options,
        })
    }

    /// Extension pairs advertised by the server.
    pub fn extensions(&self) -> &[(String, String)] {
        &self.extensions
    }

    pub fn supports(&self, name: &str) -> bool {
        self.extensions.iter().any(|(n, _)| n == name)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolve once the channel has closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the channel. Pending requests fail with `ConnectionClosed`.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(Command::Close).await;
        self.closed().await;
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, request: Request) -> Result<Response, SftpError> {
        if self.shared.is_closed() {
            return Err(SftpError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = request.op_name();
        let data = request
            .encode(id, self.options.max_packet_size)
            .map_err(|e| SftpError::Protocol(e.to_string()))?;

        let (response_tx, response_rx) = oneshot::channel();
        let pending = PendingRequest {
            data,
            response_tx,
            id,
        };
        self.request_tx
            .send(Command::Send(pending))
            .await
            .map_err(|_| SftpError::ConnectionClosed)?;

        let result = response_rx
            .await
            .unwrap_or(Err(SftpError::ConnectionClosed));
        tracing::trace!(target: "sftp-pipe::mux", parent: &self.options.span, id, op, ok = result.is_ok(), "request complete");
        result
    }

    fn check_handle(&self, handle: &Handle) -> Result<(), SftpError> {
        match self.shared.open_handles.get(&handle.raw()) {
            Some(kind) if *kind == handle.kind() => Ok(()),
            _ => Err(SftpError::InvalidHandle),
        }
    }

    async fn open_handle(&self, request: Request, kind: HandleKind) -> Result<Handle, SftpError> {
        match self.request(request).await? {
            Response::Handle(raw) => {
                self.shared.open_handles.insert(raw, kind);
                Ok(Handle::new(raw, kind))
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: Option<FileAttrs>,
    ) -> Result<Handle, SftpError> {
        let request = Request::Open {
            path: path.to_string(),
            flags,
            attrs: attrs.unwrap_or_default(),
        };
        self.open_handle(request, HandleKind::File).await
    }

    pub async fn close(&self, handle: &Handle) -> Result<(), SftpError> {
        if self.shared.open_handles.remove(&handle.raw()).is_none() {
            return Err(SftpError::InvalidHandle);
        }
        expect_ok(
            self.request(Request::Close {
                handle: handle.raw(),
            })
            .await?,
        )
    }

    /// Read up to `len` bytes at `offset`.
    ///
    /// Requests larger than [`MAX_READ_BLOCK_LENGTH`] are split into
    /// sequential block reads. A short block or EOF ends the read, so the
    /// result is shorter than `len` only at end of file.
    pub async fn read(&self, handle: &Handle, offset: u64, len: usize) -> Result<Vec<u8>, SftpError> {
        self.check_handle(handle)?;

        let mut out = Vec::with_capacity(len.min(4 * MAX_READ_BLOCK_LENGTH as usize));
        while out.len() < len {
            let want = (len - out.len()).min(MAX_READ_BLOCK_LENGTH as usize);
            let response = self
                .request(Request::Read {
                    handle: handle.raw(),
                    offset: offset + out.len() as u64,
                    len: want as u32,
                })
                .await?;
            match response {
                Response::Data(data) => {
                    let got = data.len();
                    if got > want {
                        return Err(SftpError::Protocol(format!(
                            "asked for {} bytes, received {}",
                            want, got
                        )));
                    }
                    out.extend_from_slice(&data);
                    if got < want {
                        break;
                    }
                }
                Response::Status {
                    code: StatusCode::Eof,
                    ..
                } => break,
                other => return Err(unexpected(other)),
            }
        }
        Ok(out)
    }

    /// Write all of `data` at `offset`, in blocks of at most
    /// [`MAX_WRITE_BLOCK_LENGTH`].
    pub async fn write(&self, handle: &Handle, offset: u64, data: &[u8]) -> Result<(), SftpError> {
        self.check_handle(handle)?;

        let mut written = 0;
        loop {
            let end = (written + MAX_WRITE_BLOCK_LENGTH as usize).min(data.len());
            expect_ok(
                self.request(Request::Write {
                    handle: handle.raw(),
                    offset: offset + written as u64,
                    data: data[written..end].to_vec(),
                })
                .await?,
            )?;
            written = end;
            if written >= data.len() {
                return Ok(());
            }
        }
    }

    pub async fn lstat(&self, path: &str) -> Result<FileAttrs, SftpError> {
        expect_attrs(
            self.request(Request::Lstat {
                path: path.to_string(),
            })
            .await?,
        )
    }

    pub async fn stat(&self, path: &str) -> Result<FileAttrs, SftpError> {
        expect_attrs(
            self.request(Request::Stat {
                path: path.to_string(),
            })
            .await?,
        )
    }

    pub async fn fstat(&self, handle: &Handle) -> Result<FileAttrs, SftpError> {
        self.check_handle(handle)?;
        expect_attrs(
            self.request(Request::Fstat {
                handle: handle.raw(),
            })
            .await?,
        )
    }

    pub async fn setstat(&self, path: &str, attrs: FileAttrs) -> Result<(), SftpError> {
        expect_ok(
            self.request(Request::Setstat {
                path: path.to_string(),
                attrs,
            })
            .await?,
        )
    }

    pub async fn fsetstat(&self, handle: &Handle, attrs: FileAttrs) -> Result<(), SftpError> {
        self.check_handle(handle)?;
        expect_ok(
            self.request(Request::Fsetstat {
                handle: handle.raw(),
                attrs,
            })
            .await?,
        )
    }

    pub async fn opendir(&self, path: &str) -> Result<Handle, SftpError> {
        let request = Request::Opendir {
            path: path.to_string(),
        };
        self.open_handle(request, HandleKind::Directory).await
    }

    /// Next batch of entries, or `None` once the listing is exhausted.
    pub async fn readdir(&self, handle: &Handle) -> Result<Option<Vec<Item>>, SftpError> {
        self.check_handle(handle)?;
        match self
            .request(Request::Readdir {
                handle: handle.raw(),
            })
            .await?
        {
            Response::Name(items) => Ok(Some(items)),
            Response::Status {
                code: StatusCode::Eof,
                ..
            } => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// Full listing of `path`. The directory handle is closed on every path.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<Item>, SftpError> {
        let handle = self.opendir(path).await?;
        let mut items = Vec::new();
        let listed = loop {
            match self.readdir(&handle).await {
                Ok(Some(batch)) => items.extend(batch),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close(&handle).await;
        listed?;
        closed?;
        Ok(items)
    }

    /// Remove a file.
    pub async fn unlink(&self, path: &str) -> Result<(), SftpError> {
        expect_ok(
            self.request(Request::Remove {
                path: path.to_string(),
            })
            .await?,
        )
    }

    pub async fn mkdir(&self, path: &str, attrs: Option<FileAttrs>) -> Result<(), SftpError> {
        expect_ok(
            self.request(Request::Mkdir {
                path: path.to_string(),
                attrs: attrs.unwrap_or_default(),
            })
            .await?,
        )
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), SftpError> {
        expect_ok(
            self.request(Request::Rmdir {
                path: path.to_string(),
            })
            .await?,
        )
    }

    pub async fn realpath(&self, path: &str) -> Result<String, SftpError> {
        expect_path(
            self.request(Request::Realpath {
                path: path.to_string(),
            })
            .await?,
        )
    }

    /// Rename `old_path` to `new_path`. With `overwrite` an existing target is
    /// replaced (POSIX semantics); without it the rename fails instead.
    pub async fn rename(&self, old_path: &str, new_path: &str, overwrite: bool) -> Result<(), SftpError> {
        let (old_path, new_path) = (old_path.to_string(), new_path.to_string());
        let request = if overwrite {
            Request::PosixRename { old_path, new_path }
        } else {
            Request::Rename { old_path, new_path }
        };
        expect_ok(self.request(request).await?)
    }

    pub async fn readlink(&self, path: &str) -> Result<String, SftpError> {
        expect_path(
            self.request(Request::Readlink {
                path: path.to_string(),
            })
            .await?,
        )
    }

    /// Create a symlink at `link_path` pointing to `target`.
    pub async fn symlink(&self, target: &str, link_path: &str) -> Result<(), SftpError> {
        expect_ok(
            self.request(Request::Symlink {
                link_path: link_path.to_string(),
                target_path: target.to_string(),
            })
            .await?,
        )
    }

    /// Create a hard link at `new_path` to `old_path`.
    pub async fn link(&self, old_path: &str, new_path: &str) -> Result<(), SftpError> {
        self.require(extension::HARDLINK)?;
        expect_ok(
            self.request(Request::Link {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
            })
            .await?,
        )
    }

    /// Copy `len` bytes between two open files on the server side.
    pub async fn fcopy(
        &self,
        from: &Handle,
        from_offset: u64,
        len: u64,
        to: &Handle,
        to_offset: u64,
    ) -> Result<(), SftpError> {
        self.require(extension::COPY_DATA)?;
        self.check_handle(from)?;
        self.check_handle(to)?;
        expect_ok(
            self.request(Request::CopyData {
                from_handle: from.raw(),
                from_offset,
                len,
                to_handle: to.raw(),
                to_offset,
            })
            .await?,
        )
    }

    /// Hash file contents on the server. `algorithms` is a comma-separated
    /// preference list; returns the algorithm used and the concatenated
    /// per-block hashes.
    pub async fn fhash(
        &self,
        handle: &Handle,
        algorithms: &str,
        offset: u64,
        len: u64,
        block_size: u32,
    ) -> Result<(String, Vec<u8>), SftpError> {
        self.require(extension::CHECK_FILE_HANDLE)?;
        self.check_handle(handle)?;
        match self
            .request(Request::CheckFileHandle {
                handle: handle.raw(),
                algorithms: algorithms.to_string(),
                offset,
                len,
                block_size,
            })
            .await?
        {
            Response::Hashes { algorithm, hashes } => Ok((algorithm, hashes)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn statvfs(&self, path: &str) -> Result<VfsStats, SftpError> {
        self.require(extension::STATVFS)?;
        match self
            .request(Request::Statvfs {
                path: path.to_string(),
            })
            .await?
        {
            Response::VfsStats(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    fn require(&self, name: &str) -> Result<(), SftpError> {
        if self.supports(name) {
            Ok(())
        } else {
            Err(SftpError::status(
                StatusCode::OpUnsupported,
                format!("Server does not support {}", name),
            ))
        }
    }
}

impl Drop for SftpClient {
    fn drop(&mut self) {
        let _ = self.request_tx.try_send(Command::Close);
    }
}

fn status_error(code: StatusCode, message: String) -> SftpError {
    SftpError::Status {
        status: code,
        message,
    }
}

/// Error for a response that is not what the request calls for.
fn unexpected(response: Response) -> SftpError {
    match response {
        Response::Status { code, message } if code != StatusCode::Ok => status_error(code, message),
        other => SftpError::Protocol(format!("unexpected {:?} response", other.packet_type())),
    }
}

fn expect_ok(response: Response) -> Result<(), SftpError> {
    match response {
        Response::Status {
            code: StatusCode::Ok,
            ..
        } => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn expect_attrs(response: Response) -> Result<FileAttrs, SftpError> {
    match response {
        Response::Attrs(attrs) => Ok(attrs),
        other => Err(unexpected(other)),
    }
}

fn expect_path(response: Response) -> Result<String, SftpError> {
    match response {
        Response::Name(mut items) if items.len() == 1 => Ok(items.remove(0).filename),
        Response::Name(items) => Err(SftpError::Protocol(format!(
            "expected one name, got {}",
            items.len()
        ))),
        other => Err(unexpected(other)),
    }
}

/// Writer task: receives requests from callers, writes them to the channel.
async fn writer_loop(
    mut sink: Box<dyn MessageSink>,
    mut request_rx: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
) {
    let mut closed_rx = shared.closed.subscribe();
    let mut count = 0u64;

    loop {
        let command = tokio::select! {
            command = request_rx.recv() => command,
            _ = closed_rx.wait_for(|closed| *closed) => break,
        };
        let req = match command {
            Some(Command::Send(req)) => req,
            Some(Command::Close) | None => break,
        };
        count += 1;

        // Register the completion BEFORE writing so a fast response finds it.
        shared.pending.insert(req.id, req.response_tx);
        if shared.is_closed() {
            // The reader already drained the table; fail this one ourselves.
            if let Some((_, tx)) = shared.pending.remove(&req.id) {
                let _ = tx.send(Err(SftpError::ConnectionClosed));
            }
            break;
        }

        if let Err(e) = sink.send(req.data).await {
            tracing::warn!(target: "sftp-pipe::mux", id = req.id, error = %e, "writer: send failed");
            if let Some((_, tx)) = shared.pending.remove(&req.id) {
                let _ = tx.send(Err(SftpError::ConnectionClosed));
            }
            break;
        }
    }

    let _ = sink.close().await;
    shared.mark_closed();
    fail_all_pending(&shared.pending);
    tracing::debug!(target: "sftp-pipe::mux", count, "writer: exiting");
}

/// Reader task: receives responses, routes them to waiting callers.
async fn reader_loop(mut stream: Box<dyn MessageStream>, shared: Arc<Shared>) {
    let mut count = 0u64;

    loop {
        let bytes = match stream.recv().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                tracing::warn!(target: "sftp-pipe::mux", count, error = %e, "reader: receive failed");
                break;
            }
            None => {
                tracing::debug!(target: "sftp-pipe::mux", count, "reader: channel closed");
                break;
            }
        };
        count += 1;

        let packet = match Packet::parse(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::error!(target: "sftp-pipe::mux", count, error = %e, "reader: invalid frame");
                break;
            }
        };
        let Some(id) = packet.id else {
            tracing::error!(target: "sftp-pipe::mux", opcode = ?packet.opcode(), "reader: response without request id");
            break;
        };
        if packet.opcode() == PacketType::Version {
            tracing::error!(target: "sftp-pipe::mux", "reader: unexpected VERSION");
            break;
        }

        match shared.pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(Response::decode(&packet).map_err(SftpError::from));
            }
            None => {
                tracing::error!(target: "sftp-pipe::mux", id, "reader: response for unknown request id");
                break;
            }
        }
    }

    shared.mark_closed();
    fail_all_pending(&shared.pending);
}

/// Fail all pending requests on disconnect.
fn fail_all_pending(pending: &DashMap<u32, Completion>) {
    // Collect keys first to avoid holding shard locks during send
    let keys: Vec<u32> = pending.iter().map(|r| *r.key()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            let _ = tx.send(Err(SftpError::ConnectionClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketKind;
    use crate::transport::memory;
    use std::time::Duration;

    /// Scripted peer: answers the handshake, then hands back its channel halves.
    async fn handshake(
        server: Channel,
    ) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let (mut tx, mut rx) = server.into_split();
        let init = Packet::parse(rx.recv().await.unwrap().unwrap()).unwrap();
        assert_eq!(init.opcode(), PacketType::Init);
        let version = Response::Version {
            version: PROTOCOL_VERSION,
            extensions: vec![(extension::HARDLINK.into(), "1".into())],
        };
        tx.send(version.encode(0, 1024).unwrap()).await.unwrap();
        (tx, rx)
    }

    async fn next_request(rx: &mut Box<dyn MessageStream>) -> (u32, Request) {
        let packet = Packet::parse(rx.recv().await.unwrap().unwrap()).unwrap();
        (packet.id.unwrap(), Request::decode(&packet).unwrap())
    }

    #[tokio::test]
    async fn test_handshake_records_extensions() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = SftpClient::connect(client_side, ClientOptions::default())
            .await
            .unwrap();
        let _peer = server.await.unwrap();
        assert!(client.supports(extension::HARDLINK));
        assert!(!client.supports(extension::STATVFS));
    }

    #[tokio::test]
    async fn test_routing_out_of_order() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = Arc::new(
            SftpClient::connect(client_side, ClientOptions::default())
                .await
                .unwrap(),
        );
        let (mut tx, mut rx) = server.await.unwrap();

        let c1 = Arc::clone(&client);
        let a = tokio::spawn(async move { c1.realpath("a").await });
        let (id_a, _) = next_request(&mut rx).await;
        let c2 = Arc::clone(&client);
        let b = tokio::spawn(async move { c2.realpath("b").await });
        let (id_b, _) = next_request(&mut rx).await;
        assert!(id_b > id_a);

        // Answer the second request first.
        tx.send(Response::path("/b").encode(id_b, 1024).unwrap())
            .await
            .unwrap();
        tx.send(Response::path("/a").encode(id_a, 1024).unwrap())
            .await
            .unwrap();

        assert_eq!(b.await.unwrap().unwrap(), "/b");
        assert_eq!(a.await.unwrap().unwrap(), "/a");
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_request() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = Arc::new(
            SftpClient::connect(client_side, ClientOptions::default())
                .await
                .unwrap(),
        );
        let (tx, mut rx) = server.await.unwrap();

        let c = Arc::clone(&client);
        let pending = tokio::spawn(async move { c.stat("/x").await });
        let _ = next_request(&mut rx).await;

        // Drop the server end without answering.
        drop(tx);
        drop(rx);

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(SftpError::ConnectionClosed));
        assert!(client.is_closed());
        assert_eq!(client.stat("/x").await, Err(SftpError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_fatal() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = Arc::new(
            SftpClient::connect(client_side, ClientOptions::default())
                .await
                .unwrap(),
        );
        let (mut tx, mut rx) = server.await.unwrap();

        let c = Arc::clone(&client);
        let pending = tokio::spawn(async move { c.lstat("/x").await });
        let (id, _) = next_request(&mut rx).await;

        tx.send(Response::ok().encode(id + 1000, 1024).unwrap())
            .await
            .unwrap();

        assert_eq!(pending.await.unwrap(), Err(SftpError::ConnectionClosed));
        tokio::time::timeout(Duration::from_secs(1), client.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chunked_read_stops_at_short_block() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = Arc::new(
            SftpClient::connect(client_side, ClientOptions::default())
                .await
                .unwrap(),
        );
        let (mut tx, mut rx) = server.await.unwrap();

        let c = Arc::clone(&client);
        let reader = tokio::spawn(async move {
            let handle = c.open("/f", OpenFlags::READ, None).await?;
            c.read(&handle, 0, 3 * MAX_READ_BLOCK_LENGTH as usize).await
        });

        let (id, _) = next_request(&mut rx).await;
        tx.send(Response::Handle(5).encode(id, 1024).unwrap())
            .await
            .unwrap();

        // First block full, second block short: no third request.
        let block = MAX_READ_BLOCK_LENGTH as usize;
        let (id, req) = next_request(&mut rx).await;
        assert_eq!(
            req,
            Request::Read {
                handle: 5,
                offset: 0,
                len: MAX_READ_BLOCK_LENGTH
            }
        );
        tx.send(Response::Data(vec![1; block]).encode(id, 64 * 1024).unwrap())
            .await
            .unwrap();
        let (id, req) = next_request(&mut rx).await;
        assert!(matches!(req, Request::Read { offset, .. } if offset == block as u64));
        tx.send(Response::Data(vec![2; 10]).encode(id, 64 * 1024).unwrap())
            .await
            .unwrap();

        let data = reader.await.unwrap().unwrap();
        assert_eq!(data.len(), block + 10);
        assert_eq!(data[block], 2);
    }

    #[tokio::test]
    async fn test_closed_handle_fails_locally() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = Arc::new(
            SftpClient::connect(client_side, ClientOptions::default())
                .await
                .unwrap(),
        );
        let (mut tx, mut rx) = server.await.unwrap();

        let c = Arc::clone(&client);
        let task = tokio::spawn(async move {
            let handle = c.opendir("/").await?;
            c.close(&handle).await?;
            let after = c.readdir(&handle).await;
            Ok::<_, SftpError>(after)
        });

        let (id, _) = next_request(&mut rx).await;
        tx.send(Response::Handle(1).encode(id, 1024).unwrap())
            .await
            .unwrap();
        let (id, req) = next_request(&mut rx).await;
        assert_eq!(req, Request::Close { handle: 1 });
        tx.send(Response::ok().encode(id, 1024).unwrap()).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), Err(SftpError::InvalidHandle));
    }

    #[tokio::test]
    async fn test_extension_request_names() {
        let (client_side, server_side) = memory::pair(8);
        let server = tokio::spawn(handshake(server_side));
        let client = Arc::new(
            SftpClient::connect(client_side, ClientOptions::default())
                .await
                .unwrap(),
        );
        let (mut tx, mut rx) = server.await.unwrap();

        // statvfs was not advertised.
        assert_eq!(client.statvfs("/").await.unwrap_err().errno(), libc::ENOSYS);

        let c = Arc::clone(&client);
        let task = tokio::spawn(async move { c.link("a", "b").await });
        let packet = Packet::parse(rx.recv().await.unwrap().unwrap()).unwrap();
        assert_eq!(packet.kind, PacketKind::Extended(extension::HARDLINK.into()));
        tx.send(Response::error(libc::EEXIST).encode(packet.id.unwrap(), 1024).unwrap())
            .await
            .unwrap();
        assert_eq!(task.await.unwrap().unwrap_err().errno(), libc::EEXIST);
    }
}
