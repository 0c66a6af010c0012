//! Connection handling - one request/response exchange per connection
//!
//! `handle_connection` is generic over any stream implementing
//! `AsyncRead + AsyncWrite + Unpin + Send`, so tests can drive it with an
//! in-memory duplex pipe.
//!
//! The task reads until its [`ProtocolSession`] yields a request, then waits on
//! the shared stack. While waiting it keeps reading the socket so that a
//! client hang-up abandons the wait. Eviction and the halt flag abandon it
//! too, in which case no response is written.

use super::state::AppState;
use lifo_core::protocol::{ADMISSION_REJECTED, PUSH_ACK, encode_pop_response};
use lifo_core::{
    ConnectionId, DisconnectHandle, LifoError, Payload, ProtocolSession, Result, SessionEvent,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// A request is at most 128 bytes; anything past it is dropped anyway.
const READ_BUFFER_SIZE: usize = 256;

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Push stored and acknowledged
    Pushed,
    /// Pop answered with a payload
    Popped,
    /// Client closed before a response was due
    ClientClosed,
    /// Force-closed by admission control
    Evicted,
    /// Abandoned because the server is halting
    Halted,
}

/// Per-connection identity and shared state
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub sequence: u64,
    pub handle: DisconnectHandle,
    pub state: Arc<AppState>,
}

enum Request {
    Push(Payload),
    Pop,
}

enum StackWait<T> {
    Completed(T),
    Abandoned(ConnectionOutcome),
}

/// Drive one client connection to completion.
pub async fn handle_connection<S>(mut stream: S, ctx: ConnectionContext) -> Result<ConnectionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut session = ProtocolSession::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    let request = tokio::select! {
        biased;
        () = ctx.handle.requested() => {
            session.mark_disconnecting();
            return Ok(ConnectionOutcome::Evicted);
        }
        () = ctx.state.halt.halted() => {
            session.mark_disconnecting();
            return Ok(ConnectionOutcome::Halted);
        }
        request = read_request(&mut stream, &mut session, &mut buffer, ctx.state.idle_timeout) => request,
    };

    let request = match request {
        Ok(Some(request)) => request,
        Ok(None) => {
            session.mark_disconnecting();
            return Ok(ConnectionOutcome::ClientClosed);
        },
        Err(e) => {
            session.mark_disconnecting();
            return Err(e);
        },
    };

    match request {
        Request::Push(payload) => {
            let len = payload.len();
            trace!(target: "lifo::connection", conn_id = %ctx.id, len, "Push request");

            let wait = wait_on_stack(
                &mut stream,
                &mut session,
                &mut buffer,
                &ctx.handle,
                ctx.state.stack.push(payload),
            )
            .await?;

            match wait {
                StackWait::Completed(()) => {
                    stream.write_all(&[PUSH_ACK]).await?;
                    stream.shutdown().await?;
                    debug!(
                        target: "lifo::connection",
                        conn_id = %ctx.id,
                        seq = ctx.sequence,
                        len,
                        "Push acknowledged"
                    );
                    Ok(ConnectionOutcome::Pushed)
                },
                StackWait::Abandoned(outcome) => {
                    session.mark_disconnecting();
                    log_abandoned(&ctx, outcome);
                    Ok(outcome)
                },
            }
        },
        Request::Pop => {
            trace!(target: "lifo::connection", conn_id = %ctx.id, "Pop request");

            let wait = wait_on_stack(
                &mut stream,
                &mut session,
                &mut buffer,
                &ctx.handle,
                ctx.state.stack.pop(),
            )
            .await?;

            match wait {
                StackWait::Completed(payload) => {
                    stream.write_all(&encode_pop_response(&payload)).await?;
                    stream.shutdown().await?;
                    debug!(
                        target: "lifo::connection",
                        conn_id = %ctx.id,
                        seq = ctx.sequence,
                        len = payload.len(),
                        "Pop answered"
                    );
                    Ok(ConnectionOutcome::Popped)
                },
                StackWait::Abandoned(outcome) => {
                    session.mark_disconnecting();
                    log_abandoned(&ctx, outcome);
                    Ok(outcome)
                },
            }
        },
    }
}

/// Answer a connection refused by admission control.
pub async fn reject_connection<S>(mut stream: S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[ADMISSION_REJECTED]).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read until the session yields a request. `None` means the client closed
/// the connection first.
async fn read_request<S>(
    stream: &mut S,
    session: &mut ProtocolSession,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<Option<Request>>
where
    S: AsyncRead + Unpin,
{
    loop {
        let n = read_with_timeout(stream, buffer, idle_timeout).await?;
        if n == 0 {
            return Ok(None);
        }

        match session.on_data(&buffer[..n]) {
            SessionEvent::Push(payload) => return Ok(Some(Request::Push(payload))),
            SessionEvent::Pop => return Ok(Some(Request::Pop)),
            SessionEvent::NeedMore | SessionEvent::Ignored | SessionEvent::Anomaly(_) => {},
        }
    }
}

async fn read_with_timeout<S>(
    stream: &mut S,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.read(buffer)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(LifoError::IdleTimeout(limit.as_secs())),
        },
        None => Ok(stream.read(buffer).await?),
    }
}

/// Wait for `op` while watching for eviction and client hang-up.
async fn wait_on_stack<S, F, T>(
    stream: &mut S,
    session: &mut ProtocolSession,
    buffer: &mut [u8],
    handle: &DisconnectHandle,
    op: F,
) -> Result<StackWait<T>>
where
    S: AsyncRead + Unpin,
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = handle.requested() => Ok(StackWait::Abandoned(ConnectionOutcome::Evicted)),
        closed = watch_transport(stream, session, buffer) => {
            closed.map(|()| StackWait::Abandoned(ConnectionOutcome::ClientClosed))
        }
        result = op => match result {
            Ok(value) => Ok(StackWait::Completed(value)),
            Err(LifoError::Halted) => Ok(StackWait::Abandoned(ConnectionOutcome::Halted)),
            Err(e) => Err(e),
        },
    }
}

/// Consume inbound bytes until the client closes. Anything read here arrives
/// after the request was complete and is dropped by the session.
async fn watch_transport<S>(
    stream: &mut S,
    session: &mut ProtocolSession,
    buffer: &mut [u8],
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        let n = stream.read(buffer).await?;
        if n == 0 {
            return Ok(());
        }
        session.on_data(&buffer[..n]);
    }
}

fn log_abandoned(ctx: &ConnectionContext, outcome: ConnectionOutcome) {
    debug!(
        target: "lifo::connection",
        conn_id = %ctx.id,
        seq = ctx.sequence,
        outcome = ?outcome,
        "Stack operation abandoned without response"
    );
}
