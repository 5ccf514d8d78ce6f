//! Client Connection
//!
//! Two loops per socket. The reader consumes inbound frames and enforces the
//! liveness deadline; the writer drains the outbound queue one frame per
//! message and pings on a timer. Either loop ending tears the connection
//! down and unregisters it from the hub. When the hub drops the connection
//! the writer sends a close frame at once and abandons the backlog.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::{ConnectionScope, Hub, Registration};

/// Deadline for a single outbound write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Connection is dead if nothing arrives for this long
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Must be shorter than `PONG_WAIT`
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Largest inbound message accepted
pub const MAX_MESSAGE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Hub dropped the connection (overflow, unregister or shutdown)
    Evicted,
    /// Outbound queue closed without a close signal
    QueueClosed,
    WriteFailed,
    ClientClosed,
    ReadFailed,
    ReadTimeout,
    Oversized,
}

/// Drive one upgraded socket until either side gives up
pub async fn serve(socket: WebSocket, hub: Hub, scope: ConnectionScope) {
    let Registration { id, outbound, closed } = match hub.register(scope).await {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting connection");
            return;
        }
    };

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound, closed));
    let mut reader = tokio::spawn(read_loop(stream));

    let reason = tokio::select! {
        result = &mut reader => {
            // Unregistering fires the close signal, which lets the writer send a close frame
            hub.unregister(id).await;
            let _ = timeout(WRITE_WAIT, &mut writer).await;
            writer.abort();
            result.unwrap_or(Disconnect::ReadFailed)
        }
        result = &mut writer => {
            reader.abort();
            hub.unregister(id).await;
            result.unwrap_or(Disconnect::WriteFailed)
        }
    };

    tracing::debug!(connection_id = %id, reason = ?reason, "Connection closed");
}

pub(crate) async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
) -> Disconnect
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                let _ = write(&mut sink, Message::Close(None)).await;
                return Disconnect::Evicted;
            }
            message = outbound.recv() => {
                let Some(payload) = message else {
                    let _ = write(&mut sink, Message::Close(None)).await;
                    return Disconnect::QueueClosed;
                };
                if !write(&mut sink, Message::Text(payload.to_string())).await {
                    return Disconnect::WriteFailed;
                }
            }
            _ = ping.tick() => {
                if !write(&mut sink, Message::Ping(Vec::new())).await {
                    return Disconnect::WriteFailed;
                }
            }
        }
    }
}

async fn write<S>(sink: &mut S, message: Message) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Write failed");
            false
        }
        Err(_) => {
            tracing::debug!("Write deadline exceeded");
            false
        }
    }
}

/// Any inbound frame, pongs included, resets the liveness deadline.
/// Inbound text is accepted but not acted on.
pub(crate) async fn read_loop<St, E>(mut stream: St) -> Disconnect
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = match timeout(PONG_WAIT, stream.next()).await {
            Ok(frame) => frame,
            Err(_) => return Disconnect::ReadTimeout,
        };

        match frame {
            None | Some(Ok(Message::Close(_))) => return Disconnect::ClientClosed,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Read failed");
                return Disconnect::ReadFailed;
            }
            Some(Ok(Message::Text(text))) if text.len() > MAX_MESSAGE_SIZE => return Disconnect::Oversized,
            Some(Ok(Message::Binary(data))) if data.len() > MAX_MESSAGE_SIZE => return Disconnect::Oversized,
            Some(Ok(Message::Text(text))) => {
                tracing::trace!(len = text.len(), "Ignoring client message");
            }
            Some(Ok(_)) => {}
        }
    }
}
