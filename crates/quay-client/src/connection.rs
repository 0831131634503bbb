//! The persistent sync connection.
//!
//! One reader task pulls bytes, recovers frames, and dispatches envelopes by
//! correlation id; one writer task drains the outbound queue in strict
//! enqueue order. Callers of [`Connection::send`] and the `watch_*` methods
//! register their id and return — they are resumed when the matching
//! envelope arrives, never blocking socket I/O on application logic.
//!
//! Transport specifics stay outside: anything that splits into an ordered,
//! reliable `AsyncRead`/`AsyncWrite` pair works, [`Connection::tcp`] being
//! the plain-socket convenience.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use quay_core::{ModelKind, SubscriptionId, SyncError};
use quay_wire::{Envelope, EnvelopeEvent, FrameDecoder, FrameError, ListPath, Request};

use crate::config::ClientConfig;
use crate::routes::{Route, RouteTable};
use crate::session::{SubscriptionKind, SubscriptionSession};
use crate::wire::Wire;

/// Handle to a live sync connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    wire: Wire,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Connection {
    /// Start a connection over an already-established duplex byte stream.
    ///
    /// Spawns the reader and writer tasks; [`Connection::shutdown`] awaits
    /// both.
    pub fn new<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let routes = RouteTable::new();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let wire = Wire::new(routes.clone(), write_tx, config.unwatch_timeout());
        let cancel = CancellationToken::new();

        let reader_task = tokio::spawn(run_reader(reader, routes, cancel.clone()));
        let writer_task = tokio::spawn(run_writer(writer, write_rx, cancel.clone()));

        Self {
            wire,
            cancel,
            tasks: Arc::new(Mutex::new(vec![reader_task, writer_task])),
        }
    }

    /// Connect over plain TCP.
    pub async fn tcp(addr: impl ToSocketAddrs, config: ClientConfig) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, config))
    }

    /// One-shot request/response.
    ///
    /// Suspends until the correlated envelope arrives or the connection
    /// closes. A server rejection (`event = "error"` or
    /// `success = false`) resolves as [`SyncError::Rejected`].
    pub async fn send(&self, request: Request) -> Result<Value, SyncError> {
        self.wire.send(request).await
    }

    /// Open an object subscription to a single entity.
    ///
    /// Never suspends: the watch request is queued for the writer task and
    /// the session is returned immediately, already registered.
    pub fn watch_model(
        &self,
        model: ModelKind,
        entity_id: &str,
    ) -> Result<Arc<SubscriptionSession>, SyncError> {
        let request = Request::watch_model(model, entity_id);
        self.watch(request, SubscriptionKind::Object)
    }

    /// Open a list subscription.
    ///
    /// `path = None` watches the entire collection; otherwise the
    /// sub-document array addressed by `path`. Never suspends.
    pub fn watch_list(
        &self,
        model: ModelKind,
        path: Option<&ListPath>,
    ) -> Result<Arc<SubscriptionSession>, SyncError> {
        let request = Request::watch_list(model, path);
        self.watch(request, SubscriptionKind::List)
    }

    fn watch(
        &self,
        request: Request,
        kind: SubscriptionKind,
    ) -> Result<Arc<SubscriptionSession>, SyncError> {
        let id = SubscriptionId::from(request.id.clone());
        let session = SubscriptionSession::new(id.clone(), kind, self.wire.clone());
        // Register before the write: the first push may beat the caller
        // back to the scheduler.
        self.wire
            .routes
            .insert_subscription(id.as_str(), Arc::clone(&session));
        if let Err(e) = self.wire.enqueue(&request) {
            let _ = self.wire.routes.remove(id.as_str());
            return Err(e);
        }
        Ok(session)
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of outstanding correlation ids (pending requests plus live
    /// subscriptions).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.wire.routes.len()
    }

    /// Tear the connection down.
    ///
    /// Cancels both tasks, fails every outstanding route with a transport
    /// error, and awaits task exit. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let _ = join_all(handles).await;
        // The reader fails all routes on cancellation; repeat here in case
        // it had already exited.
        self.wire.routes.fail_all(&shutdown_error());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

fn shutdown_error() -> SyncError {
    SyncError::Transport {
        reason: "shutdown".to_owned(),
        description: "connection shut down".to_owned(),
    }
}

/// Resolve a one-shot request from its reply envelope.
fn resolve_one_shot(envelope: &Envelope) -> Result<Value, SyncError> {
    match envelope.event {
        EnvelopeEvent::Response => match envelope.response_body() {
            Ok(body) if body.success => Ok(body.data.unwrap_or(Value::Null)),
            Ok(body) => Err(SyncError::Rejected {
                message: "request failed".to_owned(),
                data: body.data,
            }),
            Err(e) => Err(e),
        },
        EnvelopeEvent::Error => Err(envelope.rejection()),
        EnvelopeEvent::SocketClosed => Err(match envelope.socket_closed_body() {
            Ok(body) => SyncError::Transport {
                reason: body.reason,
                description: body.description,
            },
            Err(_) => SyncError::io("socket closed"),
        }),
        EnvelopeEvent::Update => Err(SyncError::decode(
            "update envelope for a one-shot request",
        )),
    }
}

/// Dispatch one recovered frame to whatever owns its id.
#[instrument(skip_all, fields(id))]
fn dispatch(routes: &RouteTable, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Isolated to this frame; the scanner and every route live on.
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };
    let _ = tracing::Span::current().record("id", envelope.id.as_str());

    if let Some(slot) = routes.take_one_shot(&envelope.id) {
        let _ = slot.send(resolve_one_shot(&envelope));
        return;
    }
    match envelope.event {
        // A per-id socket_closed ends that subscription for good.
        EnvelopeEvent::SocketClosed => match routes.remove(&envelope.id) {
            Some(Route::Subscription(session)) => session.apply_envelope(&envelope),
            _ => debug!(id = %envelope.id, "orphaned envelope dropped"),
        },
        _ => match routes.subscription(&envelope.id) {
            Some(session) => session.apply_envelope(&envelope),
            // Legitimate for pushes that raced an in-flight unwatch.
            None => debug!(id = %envelope.id, "orphaned envelope dropped"),
        },
    }
}

async fn run_reader<R>(source: R, routes: RouteTable, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut frames = FramedRead::new(source, FrameDecoder::new());
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                routes.fail_all(&shutdown_error());
                return;
            }
            frame = frames.next() => match frame {
                Some(Ok(text)) => dispatch(&routes, &text),
                Some(Err(FrameError::Utf8)) => {
                    // One bad frame; framing state is already clean.
                    warn!("dropping frame with invalid UTF-8");
                }
                Some(Err(error)) => {
                    warn!(error = %error, "transport read failed");
                    routes.fail_all(&SyncError::io(error.to_string()));
                    cancel.cancel();
                    return;
                }
                None => {
                    debug!("server closed the stream");
                    routes.fail_all(&SyncError::Transport {
                        reason: "eof".to_owned(),
                        description: "server closed the stream".to_owned(),
                    });
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

async fn run_writer<W>(
    mut sink: W,
    mut queue: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
)
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            message = queue.recv() => {
                let Some(mut line) = message else { return };
                line.push('\n');
                if let Err(error) = sink.write_all(line.as_bytes()).await {
                    warn!(error = %error, "write failed; tearing down connection");
                    cancel.cancel();
                    return;
                }
                if let Err(error) = sink.flush().await {
                    warn!(error = %error, "flush failed; tearing down connection");
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
