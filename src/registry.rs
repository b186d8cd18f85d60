use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::envelope::{Envelope, ErrorResponse, Kind, RegisterRequest, RegisterResponse};
use crate::session::{self, Keepalive, SessionHandle, SessionQueue};

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("invalid registration request: {0}")]
    Handshake(String),
    #[error("connection closed before registration")]
    Disconnected,
    #[error("no registration request received within {0:?}")]
    Timeout(Duration),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("failed to encode registration response: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("client {0:?} isn't registered")]
    NotRegistered(String),
    #[error("client {0:?} is not keeping up, message dropped")]
    QueueFull(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

struct RegistryInner {
    sessions: HashMap<String, SessionHandle>,
    next_id: u64,
    shutting_down: bool,
}

/// Directory of connected players, keyed by their assigned name.
///
/// Cloning is cheap and every clone refers to the same directory. All
/// mutations go through one write lock; lookups for [`send`](Self::send) and
/// [`list`](Self::list) share the read lock. The lock is never held across
/// network I/O: each session's write loop drains its own queue.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
    keepalive: Keepalive,
    queue_capacity: usize,
    tasks: TaskTracker,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Frames a single player may have waiting before sends to it fail.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_settings(Keepalive::default(), Self::DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_settings(keepalive: Keepalive, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                next_id: 0,
                shutting_down: false,
            })),
            keepalive,
            queue_capacity,
            tasks: TaskTracker::new(),
        }
    }

    pub fn keepalive(&self) -> Keepalive {
        self.keepalive
    }

    /// Perform the registration handshake on a fresh connection and start
    /// its session.
    ///
    /// The first frame must be a [`RegisterRequest`]. An empty or already
    /// used name is replaced by a random UUID; a live session is never
    /// evicted. The [`RegisterResponse`] is queued as the session's first
    /// frame, ahead of anything routed to the new name.
    ///
    /// On failure an [`ErrorResponse`] and a close frame are written and no
    /// session is created.
    pub async fn register<W, E, R, F>(&self, mut sink: W, mut stream: R) -> Result<String, RegisterError>
    where
        W: Sink<Message, Error = E> + Unpin + Send + 'static,
        E: Display + Send + 'static,
        R: Stream<Item = Result<Message, F>> + Unpin + Send + 'static,
        F: Display + Send + 'static,
    {
        let pong_wait = self.keepalive.pong_wait;
        let request = match tokio::time::timeout(pong_wait, read_request(&mut stream)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return Err(reject(&mut sink, e).await),
            Err(_) => return Err(reject(&mut sink, RegisterError::Timeout(pong_wait)).await),
        };

        let (name, id, queue) = match self.insert(&request.name) {
            Ok(inserted) => inserted,
            Err(e) => return Err(reject(&mut sink, e).await),
        };
        tracing::info!(client = %name, requested = %request.name, "registering new client");

        let registry = self.clone();
        let cleanup_name = name.clone();
        session::run(
            name.clone(),
            queue,
            sink,
            stream,
            self.keepalive,
            &self.tasks,
            move || registry.remove_session(&cleanup_name, id),
        );

        Ok(name)
    }

    fn insert(&self, requested: &str) -> Result<(String, u64, SessionQueue), RegisterError> {
        let mut inner = self.inner.write();
        if inner.shutting_down {
            return Err(RegisterError::ShuttingDown);
        }

        let name = if requested.is_empty() || inner.sessions.contains_key(requested) {
            loop {
                let candidate = Uuid::new_v4().to_string();
                if !inner.sessions.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            requested.to_string()
        };

        let response = serde_json::to_string(&RegisterResponse {
            name: name.clone(),
            ping_period_seconds: self.keepalive.ping_period().as_secs().max(1),
        })?;

        let id = inner.next_id;
        inner.next_id += 1;
        let (handle, queue) = session::channel(id, self.queue_capacity);
        // The queue is empty and has room for at least one frame.
        let _ = handle.try_enqueue(response);
        inner.sessions.insert(name.clone(), handle);

        Ok((name, id, queue))
    }

    /// Remove a player by name and ask its session to close. Removing an
    /// unknown name is a no-op. Returns true if an entry was removed.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.inner.write().sessions.remove(name);
        match removed {
            Some(handle) => {
                handle.request_close();
                tracing::info!(client = %name, "client removed");
                true
            }
            None => false,
        }
    }

    /// Cleanup path of a session's read loop. Only removes the entry if it
    /// still belongs to session `id`, so a late cleanup never evicts a newer
    /// session that reused the name.
    fn remove_session(&self, name: &str, id: u64) {
        let mut inner = self.inner.write();
        if inner.sessions.get(name).is_some_and(|h| h.id() == id) {
            inner.sessions.remove(name);
            tracing::info!(client = %name, "client unregistered");
        }
    }

    /// Sorted snapshot of registered names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().sessions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue an envelope for `destination`. Never waits on the network.
    pub fn send(&self, destination: &str, kind: Kind, data: &str) -> Result<(), SendError> {
        let frame = Envelope::new(kind, data).encode()?;
        let inner = self.inner.read();
        let handle = inner
            .sessions
            .get(destination)
            .ok_or_else(|| SendError::NotRegistered(destination.to_string()))?;

        handle.try_enqueue(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull(destination.to_string()),
            TrySendError::Closed(_) => SendError::NotRegistered(destination.to_string()),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.read().shutting_down
    }

    /// Refuse further registrations and hand back every live session.
    pub(crate) fn drain(&self) -> Vec<(String, SessionHandle)> {
        let mut inner = self.inner.write();
        inner.shutting_down = true;
        let mut drained: Vec<_> = inner.sessions.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }
}

async fn read_request<R, F>(stream: &mut R) -> Result<RegisterRequest, RegisterError>
where
    R: Stream<Item = Result<Message, F>> + Unpin,
    F: Display,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return RegisterRequest::decode(text.as_str())
                    .map_err(|e| RegisterError::Handshake(e.to_string()));
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(RegisterError::Handshake("expected a JSON text frame".into()));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(RegisterError::Disconnected),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "read failed during registration");
                return Err(RegisterError::Disconnected);
            }
        }
    }
}

/// Report a failed handshake to the peer and close the connection.
async fn reject<W, E>(sink: &mut W, err: RegisterError) -> RegisterError
where
    W: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    tracing::warn!(error = %err, "client registration failed");
    if matches!(err, RegisterError::Disconnected) {
        return err;
    }

    if let Ok(body) = serde_json::to_string(&ErrorResponse {
        error: err.to_string(),
    }) {
        let _ = sink.send(Message::Text(body.into())).await;
    }
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "registration failed".into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
    let _ = sink.close().await;
    err
}
