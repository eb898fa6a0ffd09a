//! Per-connection request dispatch.
//!
//! # Architecture
//!
//! - One reader loop decodes frames and spawns a task per request
//! - Responses go through a channel to a single writer task
//! - Completion order is whatever the filesystem gives; ids route them
//! - Protocol handles come from a counter and are never reused
//! - When the channel ends, every handle still open is released

use super::handler::{BackendHandle, Filesystem};
use super::ServerConfig;
use crate::protocol::{
    extension, DecodeError, FileAttrs, Item, OpenFlags, OpenMode, Packet, PacketKind, PacketType,
    Request, Response, StatusCode, INTERNAL_ERROR_MESSAGE, PROTOCOL_VERSION,
};
use crate::transport::{Channel, MessageSink, MessageStream};

use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Length, type, id and count fields ahead of the entries of a NAME frame.
const NAME_HEADER_LEN: usize = 13;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for INIT.
    Handshaking,
    /// Serving requests.
    Active,
    /// Channel gone; handles released.
    Ended,
}

/// Directory listing buffered between READDIR calls.
#[derive(Debug, Default)]
struct DirCursor {
    buffered: VecDeque<Item>,
    exhausted: bool,
}

impl DirCursor {
    /// Pop entries totalling at most `budget` encoded bytes, but always at
    /// least one. Never exceeds `limit`; an entry larger than `limit` on its
    /// own can never be sent and is skipped.
    fn take_batch(&mut self, budget: usize, limit: usize) -> Vec<Item> {
        let mut batch = Vec::new();
        let mut used = 0;
        while let Some(item) = self.buffered.pop_front() {
            let size = item.wire_len();
            if size > limit {
                tracing::warn!(target: "sftp-pipe::session", name = %item.filename, size, "entry exceeds packet size, skipped");
                continue;
            }
            if !batch.is_empty() && (used + size > budget || used + size > limit) {
                self.buffered.push_front(item);
                break;
            }
            used += size;
            batch.push(item);
        }
        batch
    }
}

#[derive(Debug)]
enum SlotKind {
    File,
    Dir(DirCursor),
}

#[derive(Debug)]
struct Slot {
    backend: BackendHandle,
    kind: SlotKind,
}

/// Open handles of one session. Numbers start at 1 and are never reused.
#[derive(Debug, Default)]
struct HandleTable {
    slots: HashMap<u32, Slot>,
    last: u32,
    closed: bool,
}

impl HandleTable {
    fn insert(&mut self, slot: Slot) -> io::Result<u32> {
        if self.closed {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let handle = self
            .last
            .checked_add(1)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EMFILE))?;
        self.last = handle;
        self.slots.insert(handle, slot);
        Ok(handle)
    }

    fn get(&self, handle: u32) -> Option<&Slot> {
        self.slots.get(&handle)
    }

    fn get_mut(&mut self, handle: u32) -> Option<&mut Slot> {
        self.slots.get_mut(&handle)
    }

    fn remove(&mut self, handle: u32) -> Option<Slot> {
        self.slots.remove(&handle)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Take every live slot and refuse further inserts.
    fn close_all(&mut self) -> Vec<Slot> {
        self.closed = true;
        self.slots.drain().map(|(_, slot)| slot).collect()
    }
}

/// Protocol state for one connection.
pub struct Session<F> {
    fs: Arc<F>,
    config: ServerConfig,
    state: Mutex<SessionState>,
    handles: Mutex<HandleTable>,
}

impl<F: Filesystem> Session<F> {
    pub fn new(fs: Arc<F>, config: ServerConfig) -> Self {
        Self {
            fs,
            config,
            state: Mutex::new(SessionState::Handshaking),
            handles: Mutex::new(HandleTable::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn table(&self) -> MutexGuard<'_, HandleTable> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.table().len()
    }

    /// Answer INIT. Returns `None` once the handshake is already done.
    pub fn handle_init(&self, client_version: u32) -> Option<Response> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Handshaking {
            tracing::warn!(target: "sftp-pipe::session", client_version, "duplicate INIT ignored");
            return None;
        }
        *state = SessionState::Active;
        tracing::debug!(target: "sftp-pipe::session", client_version, "handshake complete");
        Some(Response::Version {
            version: PROTOCOL_VERSION,
            extensions: extension::ADVERTISED
                .iter()
                .map(|name| (name.to_string(), "1".to_string()))
                .collect(),
        })
    }

    /// Execute one request and produce its response.
    pub async fn dispatch(&self, request: Request) -> Response {
        if self.state() != SessionState::Active {
            return Response::status(StatusCode::Failure, "Session not initialized");
        }
        let op = request.op_name();
        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(target: "sftp-pipe::session", op, error = %e, "operation failed");
                Response::from(e)
            }
        }
    }

    /// Frame a response, falling back to a FAILURE status if it does not fit.
    pub fn encode_response(&self, id: u32, response: &Response) -> Option<Vec<u8>> {
        match response.encode(id, self.config.max_packet_size) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(target: "sftp-pipe::session", id, error = %e, "response does not fit");
                Response::status(StatusCode::Failure, INTERNAL_ERROR_MESSAGE)
                    .encode(id, self.config.max_packet_size)
                    .ok()
            }
        }
    }

    /// Release every open handle. Requests still in flight that try to
    /// open a handle afterwards fail.
    pub async fn end(&self) {
        self.set_state(SessionState::Ended);
        let slots = self.table().close_all();
        let released = slots.len();
        for slot in slots {
            if let Err(e) = self.fs.close(slot.backend).await {
                tracing::debug!(target: "sftp-pipe::session", error = %e, "release failed");
            }
        }
        tracing::debug!(target: "sftp-pipe::session", released, "session ended");
    }

    async fn execute(&self, request: Request) -> io::Result<Response> {
        let fs = &*self.fs;
        match request {
            Request::Init { .. } => Ok(Response::status(StatusCode::Failure, "Already initialized")),
            Request::Open { path, flags, attrs } => self.open(&path, flags, &attrs).await,
            Request::Close { handle } => {
                let Some(slot) = self.table().remove(handle) else {
                    return Ok(Response::invalid_handle());
                };
                fs.close(slot.backend).await?;
                Ok(Response::ok())
            }
            Request::Read { handle, offset, len } => {
                let Some(backend) = self.file(handle) else {
                    return Ok(Response::invalid_handle());
                };
                let data = fs.read(backend, offset, len.min(self.config.max_read_len)).await?;
                if data.is_empty() {
                    Ok(Response::eof())
                } else {
                    Ok(Response::Data(data))
                }
            }
            Request::Write { handle, offset, data } => {
                let Some(backend) = self.file(handle) else {
                    return Ok(Response::invalid_handle());
                };
                fs.write(backend, offset, data).await?;
                Ok(Response::ok())
            }
            Request::Lstat { path } => Ok(Response::Attrs(fs.lstat(&path).await?)),
            Request::Stat { path } => Ok(Response::Attrs(fs.stat(&path).await?)),
            Request::Fstat { handle } => {
                let Some(backend) = self.any(handle) else {
                    return Ok(Response::invalid_handle());
                };
                Ok(Response::Attrs(fs.fstat(backend).await?))
            }
            Request::Setstat { path, attrs } => {
                fs.setstat(&path, &attrs).await?;
                Ok(Response::ok())
            }
            Request::Fsetstat { handle, attrs } => {
                let Some(backend) = self.any(handle) else {
                    return Ok(Response::invalid_handle());
                };
                fs.fsetstat(backend, &attrs).await?;
                Ok(Response::ok())
            }
            Request::Opendir { path } => {
                let backend = fs.opendir(&path).await?;
                self.register(backend, SlotKind::Dir(DirCursor::default())).await
            }
            Request::Readdir { handle } => self.readdir(handle).await,
            Request::Remove { path } => {
                fs.unlink(&path).await?;
                Ok(Response::ok())
            }
            Request::Mkdir { path, attrs } => {
                fs.mkdir(&path, &attrs).await?;
                Ok(Response::ok())
            }
            Request::Rmdir { path } => {
                fs.rmdir(&path).await?;
                Ok(Response::ok())
            }
            Request::Realpath { path } => Ok(Response::path(fs.realpath(&path).await?)),
            Request::Rename { old_path, new_path } => {
                fs.rename(&old_path, &new_path, false).await?;
                Ok(Response::ok())
            }
            Request::PosixRename { old_path, new_path } => {
                fs.rename(&old_path, &new_path, true).await?;
                Ok(Response::ok())
            }
            Request::Readlink { path } => Ok(Response::path(fs.readlink(&path).await?)),
            Request::Symlink {
                link_path,
                target_path,
            } => {
                fs.symlink(&target_path, &link_path).await?;
                Ok(Response::ok())
            }
            Request::Link { old_path, new_path } => {
                fs.link(&old_path, &new_path).await?;
                Ok(Response::ok())
            }
            Request::Statvfs { path } => Ok(Response::VfsStats(fs.statvfs(&path).await?)),
            Request::CopyData {
                from_handle,
                from_offset,
                len,
                to_handle,
                to_offset,
            } => {
                let (Some(from), Some(to)) = (self.file(from_handle), self.file(to_handle)) else {
                    return Ok(Response::invalid_handle());
                };
                fs.fcopy(from, from_offset, len, to, to_offset).await?;
                Ok(Response::ok())
            }
            Request::CheckFileHandle {
                handle,
                algorithms,
                offset,
                len,
                block_size,
            } => {
                let Some(backend) = self.file(handle) else {
                    return Ok(Response::invalid_handle());
                };
                let (algorithm, hashes) = fs.fhash(backend, &algorithms, offset, len, block_size).await?;
                Ok(Response::Hashes { algorithm, hashes })
            }
            Request::Unsupported { name } => {
                tracing::debug!(target: "sftp-pipe::session", name = %name, "unsupported extension");
                Ok(Response::status(
                    StatusCode::OpUnsupported,
                    StatusCode::OpUnsupported.message(),
                ))
            }
        }
    }

    /// Try each candidate mode in turn; all but the last only probe.
    async fn open(&self, path: &str, flags: OpenFlags, attrs: &FileAttrs) -> io::Result<Response> {
        let modes = OpenMode::candidates(flags);
        let Some((last, probes)) = modes.split_last() else {
            return Ok(Response::status(StatusCode::Failure, "Unsupported flags"));
        };
        for mode in probes {
            let probe = self.fs.open(path, *mode, attrs).await?;
            self.fs.close(probe).await?;
        }
        let backend = self.fs.open(path, *last, attrs).await?;
        self.register(backend, SlotKind::File).await
    }

    async fn register(&self, backend: BackendHandle, kind: SlotKind) -> io::Result<Response> {
        let inserted = self.table().insert(Slot { backend, kind });
        match inserted {
            Ok(handle) => Ok(Response::Handle(handle)),
            Err(e) => {
                let _ = self.fs.close(backend).await;
                Err(e)
            }
        }
    }

    fn file(&self, handle: u32) -> Option<BackendHandle> {
        match self.table().get(handle)? {
            Slot {
                backend,
                kind: SlotKind::File,
            } => Some(*backend),
            _ => None,
        }
    }

    fn any(&self, handle: u32) -> Option<BackendHandle> {
        self.table().get(handle).map(|slot| slot.backend)
    }

    async fn readdir(&self, handle: u32) -> io::Result<Response> {
        let budget = self.config.readdir_budget;
        let limit = self.config.max_packet_size.saturating_sub(NAME_HEADER_LEN);
        loop {
            let backend = {
                let mut table = self.table();
                let Some(slot) = table.get_mut(handle) else {
                    return Ok(Response::invalid_handle());
                };
                let SlotKind::Dir(cursor) = &mut slot.kind else {
                    return Ok(Response::invalid_handle());
                };
                let batch = cursor.take_batch(budget, limit);
                if !batch.is_empty() {
                    return Ok(Response::Name(batch));
                }
                if cursor.exhausted {
                    return Ok(Response::eof());
                }
                slot.backend
            };

            let items = self.fs.readdir(backend).await?;

            let mut table = self.table();
            let Some(Slot {
                kind: SlotKind::Dir(cursor),
                ..
            }) = table.get_mut(handle)
            else {
                return Ok(Response::invalid_handle());
            };
            if items.is_empty() {
                cursor.exhausted = true;
            } else {
                cursor.buffered.extend(items);
            }
        }
    }
}

/// Serve one session over `channel` until the peer goes away.
pub async fn serve_channel<F: Filesystem + 'static>(
    fs: Arc<F>,
    channel: Channel,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let span = config.span.clone();
    run_session(fs, channel, config).instrument(span).await
}

async fn run_session<F: Filesystem + 'static>(
    fs: Arc<F>,
    channel: Channel,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let (sink, stream) = channel.into_split();
    let (tx, rx) = mpsc::channel::<Vec<u8>>(config.response_channel_size);
    let session = Arc::new(Session::new(fs, config));

    let writer_handle = tokio::spawn(response_writer(sink, rx).in_current_span());

    let reader_result = request_reader(&session, stream, tx).await;

    // The writer finishes once every in-flight request has answered.
    let _ = writer_handle.await;
    session.end().await;

    reader_result
}

/// Decode frames and spawn a handler task for each request.
async fn request_reader<F: Filesystem + 'static>(
    session: &Arc<Session<F>>,
    mut stream: Box<dyn MessageStream>,
    tx: mpsc::Sender<Vec<u8>>,
) -> anyhow::Result<()> {
    loop {
        let message = match stream.recv().await {
            None => break,
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::warn!(target: "sftp-pipe::session", error = %e, "receive failed");
                return Err(e.into());
            }
        };

        let packet = match Packet::parse(message) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(target: "sftp-pipe::session", error = %e, "malformed frame, ending session");
                return Err(e.into());
            }
        };

        if packet.kind == PacketKind::Builtin(PacketType::Init) {
            let Request::Init { version } = Request::decode(&packet)? else {
                anyhow::bail!("INIT frame did not decode as INIT");
            };
            if let Some(response) = session.handle_init(version) {
                if let Some(bytes) = session.encode_response(0, &response) {
                    if tx.send(bytes).await.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        let Some(id) = packet.id else {
            tracing::warn!(target: "sftp-pipe::session", opcode = ?packet.opcode(), "frame without request id");
            anyhow::bail!("unexpected {:?} frame", packet.opcode());
        };

        let session = Arc::clone(session);
        let tx = tx.clone();
        tokio::spawn(
            async move {
                let response = match Request::decode(&packet) {
                    Ok(request) => run_request(&session, request).await,
                    Err(e) => decode_failure(id, &e),
                };
                if let Some(bytes) = session.encode_response(id, &response) {
                    let _ = tx.send(bytes).await;
                }
            }
            .in_current_span(),
        );
    }

    Ok(())
}

async fn run_request<F: Filesystem>(session: &Session<F>, request: Request) -> Response {
    let op = request.op_name();
    AssertUnwindSafe(session.dispatch(request))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            tracing::error!(target: "sftp-pipe::session", op, "handler panicked");
            Response::status(StatusCode::Failure, INTERNAL_ERROR_MESSAGE)
        })
}

fn decode_failure(id: u32, err: &DecodeError) -> Response {
    tracing::warn!(target: "sftp-pipe::session", id, error = %err, "undecodable request");
    Response::status(StatusCode::Failure, INTERNAL_ERROR_MESSAGE)
}

/// Write responses in completion order.
async fn response_writer(mut sink: Box<dyn MessageSink>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let mut broken = false;
    while let Some(bytes) = rx.recv().await {
        if broken {
            // Keep draining so handler tasks never block on a dead channel.
            continue;
        }
        if let Err(e) = sink.send(bytes).await {
            tracing::debug!(target: "sftp-pipe::session", error = %e, "send failed");
            broken = true;
        }
    }
    let _ = sink.close().await;
}
