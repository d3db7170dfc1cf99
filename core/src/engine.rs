//! Request/response correlation over one SFTP stream.
//!
//! Encoded requests go through a channel to a writer task that owns the
//! write half, so a caller dropped mid-request can never leave a partial
//! frame on the wire. Responses complete through a `oneshot` slot registered
//! by request id. A single dispatch task owns the read half and resolves
//! slots as responses arrive, in any order. When the stream ends, fails to
//! decode or write, or the engine is closed, every pending slot fails with a
//! connection error and later submissions fail immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::errors::SftpError;
use crate::protocol::codec::{read_frame, write_frame};
use crate::protocol::{Init, Request, Response, Version, SFTP_VERSION};

type Slot = oneshot::Sender<Result<Response, SftpError>>;

const CLOSED_REASON: &str = "Session closed";

#[derive(Default)]
struct PendingTable {
    /// Set once the engine can no longer deliver responses.
    closed: Option<String>,
    slots: HashMap<u32, Slot>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<PendingTable>,
}

impl Shared {
    fn table(&self) -> std::sync::MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, id: u32, slot: Slot) -> Result<(), SftpError> {
        let mut table = self.table();
        if let Some(reason) = &table.closed {
            return Err(SftpError::Connection(reason.clone()));
        }
        table.slots.insert(id, slot);
        Ok(())
    }

    fn take(&self, id: u32) -> Option<Slot> {
        self.table().slots.remove(&id)
    }

    /// Mark the table closed and fail every pending slot with `reason`.
    /// Only the first reason is kept.
    fn fail_all(&self, reason: &str) {
        let drained: Vec<Slot> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.slots.drain().map(|(_, slot)| slot).collect()
        };
        if !drained.is_empty() {
            debug!("Failing {} pending request(s): {}", drained.len(), reason);
        }
        for slot in drained {
            let _ = slot.send(Err(SftpError::Connection(reason.to_string())));
        }
    }

    fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }
}

/// A submitted request whose response has not been awaited yet.
///
/// Dropping it unregisters the request; a late response is then discarded.
pub struct PendingResponse {
    id: u32,
    rx: oneshot::Receiver<Result<Response, SftpError>>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl PendingResponse {
    /// Wait for the response to this request.
    pub async fn wait(mut self) -> Result<Response, SftpError> {
        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(SftpError::Connection(format!(
                        "Request timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => (&mut self.rx).await,
        };
        received.unwrap_or_else(|_| {
            Err(SftpError::Connection(
                "response channel dropped".to_string(),
            ))
        })
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.shared.take(self.id);
    }
}

/// Owns the writer task for one SFTP stream and the dispatch task reading
/// the other half.
pub struct RequestEngine {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    shared: Arc<Shared>,
    next_id: AtomicU32,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    timeout: Option<Duration>,
    version: Version,
}

impl RequestEngine {
    /// Perform the INIT/VERSION exchange on `stream` and start dispatching.
    pub async fn start<S>(stream: S, config: &SessionConfig) -> Result<Self, SftpError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let timeout = config.request_timeout_secs.map(Duration::from_secs);

        let handshake = async {
            write_frame(&mut writer, &Init { version: SFTP_VERSION }.encode()).await?;
            let payload = read_frame(&mut reader, config.max_packet_len).await?;
            Version::decode(&payload)
        };
        let version = match timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| SftpError::Connection("Version exchange timed out".to_string()))??,
            None => handshake.await?,
        };

        if version.version < SFTP_VERSION {
            return Err(SftpError::Protocol(format!(
                "server speaks SFTP version {}, {} required",
                version.version, SFTP_VERSION
            )));
        }
        info!(
            "SFTP version {} negotiated ({} extension(s))",
            version.version,
            version.extensions.len()
        );

        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();
        let (outgoing, frames) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_loop(
            reader,
            shared.clone(),
            config.max_packet_len,
            shutdown.clone(),
        ));
        let write = tokio::spawn(write_loop(writer, frames, shared.clone(), shutdown.clone()));

        Ok(Self {
            outgoing,
            shared,
            next_id: AtomicU32::new(1),
            shutdown,
            tasks: Mutex::new(vec![dispatch, write]),
            timeout,
            version,
        })
    }

    pub fn server_version(&self) -> u32 {
        self.version.version
    }

    pub fn extensions(&self) -> &[(String, String)] {
        &self.version.extensions
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Queue `request` for the writer task and return a handle to its
    /// response.
    ///
    /// The slot is registered before the frame is queued, so a fast reply
    /// can never be missed.
    pub fn submit(&self, request: Request) -> Result<PendingResponse, SftpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.register(id, tx)?;
        let pending = PendingResponse {
            id,
            rx,
            shared: self.shared.clone(),
            timeout: self.timeout,
        };

        debug!("-> #{} {:?} {}", id, request.packet_type(), request.path().unwrap_or(""));
        if self.outgoing.send(request.encode(id)).is_err() {
            return Err(SftpError::Connection(CLOSED_REASON.to_string()));
        }
        Ok(pending)
    }

    /// Submit `request` and wait for its response.
    pub async fn request(&self, request: Request) -> Result<Response, SftpError> {
        self.submit(request)?.wait().await
    }

    /// Stop both tasks, fail everything still pending and shut the writer.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.shared.fail_all(CLOSED_REASON);

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for RequestEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn reason_of(e: SftpError) -> String {
    match e {
        SftpError::Connection(msg) => msg,
        other => other.to_string(),
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break,
            payload = frames.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        // A frame is written whole even if its submitter has gone away.
        let written = tokio::select! {
            _ = shutdown.cancelled() => break,
            written = write_frame(&mut writer, &payload) => written,
        };
        if let Err(e) = written {
            let reason = reason_of(e);
            warn!("SFTP writer stopped: {}", reason);
            shared.fail_all(&reason);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Writer shutdown failed: {}", e);
    }
}

async fn dispatch_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    max_len: u32,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break CLOSED_REASON.to_string(),
            frame = read_frame(&mut reader, max_len) => frame,
        };

        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => break reason_of(e),
        };

        match Response::decode(&payload) {
            Ok((id, response)) => match shared.take(id) {
                Some(slot) => {
                    debug!("<- #{} {:?}", id, response.packet_type());
                    let _ = slot.send(Ok(response));
                }
                None => debug!("Dropping response for abandoned request id {}", id),
            },
            Err(e) => break format!("undecodable packet: {e}"),
        }
    };

    if reason != CLOSED_REASON {
        warn!("SFTP dispatch loop stopped: {}", reason);
    }
    shared.fail_all(&reason);
}
