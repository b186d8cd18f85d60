//! One live connection to a remote player.
//!
//! A session is split into two tasks that only talk through a bounded queue
//! and two cancellation tokens:
//!
//! - the **read loop** owns the inbound half. It enforces the keepalive read
//!   deadline and is the task that reports the session as gone.
//! - the **write loop** owns the outbound half. It drains the queue, pings
//!   the peer periodically and sends the close frame when asked to.
//!
//! The registry keeps a [`SessionHandle`]; nothing else about the session is
//! shared.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Keepalive timing for player connections.
///
/// The server pings every [`ping_period`](Self::ping_period) and drops a peer
/// that sends nothing (not even a pong) for `pong_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub pong_wait: Duration,
}

impl Keepalive {
    pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(5);

    pub fn new(pong_wait: Duration) -> Self {
        Self { pong_wait }
    }

    /// Nine tenths of `pong_wait`, so a ping always lands before the peer's
    /// deadline on our side expires.
    pub fn ping_period(&self) -> Duration {
        (self.pong_wait * 9 / 10).max(Duration::from_millis(1))
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PONG_WAIT)
    }
}

/// Registry-side handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    outbound: mpsc::Sender<String>,
    closing: CancellationToken,
    done: CancellationToken,
}

impl SessionHandle {
    /// Process-unique id, distinct even when a name is reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a serialized frame without waiting.
    pub fn try_enqueue(&self, frame: String) -> Result<(), mpsc::error::TrySendError<String>> {
        self.outbound.try_send(frame)
    }

    /// Ask the write loop to send a close frame and stop.
    pub fn request_close(&self) {
        self.closing.cancel();
    }

    /// True once either loop has terminated.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }
}

/// The halves of a session that [`run`] consumes.
pub struct SessionQueue {
    outbound: mpsc::Receiver<String>,
    closing: CancellationToken,
    done: CancellationToken,
}

/// Create the handle/queue pair for a new session.
pub fn channel(id: u64, capacity: usize) -> (SessionHandle, SessionQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closing = CancellationToken::new();
    let done = CancellationToken::new();
    (
        SessionHandle {
            id,
            outbound: tx,
            closing: closing.clone(),
            done: done.clone(),
        },
        SessionQueue {
            outbound: rx,
            closing,
            done,
        },
    )
}

/// Spawn the read and write loops of a session onto `tasks`.
///
/// `on_close` runs exactly once, after the read loop has stopped.
pub fn run<W, E, R, F, C>(
    name: String,
    queue: SessionQueue,
    sink: W,
    stream: R,
    keepalive: Keepalive,
    tasks: &TaskTracker,
    on_close: C,
) where
    W: Sink<Message, Error = E> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    R: Stream<Item = Result<Message, F>> + Unpin + Send + 'static,
    F: Display + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let SessionQueue {
        outbound,
        closing,
        done,
    } = queue;

    tasks.spawn(write_loop(
        name.clone(),
        sink,
        outbound,
        keepalive.ping_period(),
        closing,
        done.clone(),
    ));

    tasks.spawn(async move {
        read_loop(&name, stream, keepalive.pong_wait, &done).await;
        done.cancel();
        on_close();
    });
}

async fn read_loop<R, F>(name: &str, mut stream: R, pong_wait: Duration, done: &CancellationToken)
where
    R: Stream<Item = Result<Message, F>> + Unpin,
    F: Display,
{
    loop {
        tokio::select! {
            biased;

            _ = done.cancelled() => break,

            next = tokio::time::timeout(pong_wait, stream.next()) => {
                match next {
                    Err(_) => {
                        tracing::warn!(client = %name, ?pong_wait, "no traffic from client, dropping it");
                        break;
                    }
                    Ok(None) => {
                        tracing::debug!(client = %name, "client stream ended");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!(client = %name, error = %e, "client read failed");
                        break;
                    }
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        tracing::info!(client = %name, ?frame, "client closed the connection");
                        break;
                    }
                    Ok(Some(Ok(Message::Pong(_)))) => {
                        tracing::trace!(client = %name, "pong");
                    }
                    Ok(Some(Ok(other))) => {
                        tracing::debug!(client = %name, ?other, "ignoring inbound frame");
                    }
                }
            }
        }
    }
}

async fn write_loop<W, E>(
    name: String,
    mut sink: W,
    mut outbound: mpsc::Receiver<String>,
    ping_period: Duration,
    closing: CancellationToken,
    done: CancellationToken,
) where
    W: Sink<Message, Error = E> + Unpin,
    E: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = done.cancelled() => break,

            _ = closing.cancelled() => {
                tracing::info!(client = %name, "closing connection");
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: "server shutting down".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::warn!(client = %name, error = %e, "failed to send close frame");
                }
                break;
            }

            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(client = %name, error = %e, "failed to send message to client");
                    break;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    tracing::warn!(client = %name, error = %e, "failed to send ping to client");
                    break;
                }
            }
        }
    }

    done.cancel();
    let _ = sink.close().await;
}
