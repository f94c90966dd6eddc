//! One task per accepted TCP connection.
//!
//! The read loop owns the session and the inbound half; a writer task owns
//! the outbound half so spawned handlers and the loop share one ordered
//! path to the socket. Dropping the handler `JoinSet` on disconnect aborts
//! anything still running for that connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use vigil_protocol::codec::FrameCodec;
use vigil_protocol::envelope::{make_error, make_hello, parse_envelope, Envelope, EnvelopeType, HelloLimits};
use vigil_protocol::{ErrorCode, ProtocolError};

use crate::config::AgentConfig;
use crate::pipeline::Pipeline;
use crate::session::ConnectionSession;

/// Connection-scoped knobs, copied out of the config at bind time.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_frame_bytes: usize,
    pub max_in_flight: u32,
    pub idle_timeout: Duration,
    pub auth_grace: Duration,
    pub rate_capacity: u32,
    pub rate_refill_per_sec: f64,
}

impl ConnectionSettings {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            max_frame_bytes: cfg.protocol.max_frame_bytes,
            max_in_flight: cfg.limits.max_in_flight,
            idle_timeout: Duration::from_secs(cfg.limits.idle_timeout_secs),
            auth_grace: Duration::from_secs(cfg.limits.auth_grace_secs),
            rate_capacity: cfg.limits.rate_capacity,
            rate_refill_per_sec: cfg.limits.rate_refill_per_sec,
        }
    }
}

/// Why the read loop stopped; logged at close.
enum CloseReason {
    PeerClosed,
    IdleTimeout,
    AuthGraceExpired,
    FrameTooLarge,
    IoError,
    Shutdown,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::AuthGraceExpired => "auth grace expired",
            CloseReason::FrameTooLarge => "frame too large",
            CloseReason::IoError => "io error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    conn_id: u64,
    pipeline: Arc<Pipeline>,
    settings: ConnectionSettings,
    mut shutdown: broadcast::Receiver<()>,
) {
    let remote_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(conn_id, error = %e, "peer address unavailable");
            return;
        }
    };
    info!(conn_id, remote = %remote_addr, "connection accepted");

    let (read_half, write_half) = stream.into_split();
    let mut inbound =
        tokio_util::codec::FramedRead::new(read_half, FrameCodec::new(settings.max_frame_bytes));
    let mut outbound =
        tokio_util::codec::FramedWrite::new(write_half, FrameCodec::new(settings.max_frame_bytes));

    // All replies funnel through one writer so frames never interleave.
    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);
    let writer = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            if let Err(e) = outbound.send(envelope).await {
                debug!(error = %e, "write failed, stopping writer");
                break;
            }
        }
        let _ = outbound.flush().await;
    });

    let hello = make_hello(HelloLimits {
        max_frame: settings.max_frame_bytes,
        heartbeat_secs: settings.idle_timeout.as_secs(),
        max_in_flight: settings.max_in_flight,
    });
    let _ = out_tx.send(hello).await;

    let mut session = ConnectionSession::new(
        conn_id,
        remote_addr,
        settings.rate_capacity,
        settings.rate_refill_per_sec,
    );
    let mut tasks: JoinSet<()> = JoinSet::new();

    let reason = loop {
        // Unauthenticated connections live under the shorter of the idle
        // timeout and the auth grace window.
        let idle_deadline = session.last_activity + settings.idle_timeout;
        let grace_deadline = session.connected_at + settings.auth_grace;
        let deadline = if session.authenticated {
            idle_deadline
        } else {
            idle_deadline.min(grace_deadline)
        };

        tokio::select! {
            frame = inbound.next() => match frame {
                None => break CloseReason::PeerClosed,
                Some(Err(ProtocolError::FrameTooLarge { size, max })) => {
                    warn!(conn_id, size, max, "oversized frame");
                    let _ = out_tx
                        .send(make_error(
                            None,
                            None,
                            ErrorCode::PayloadTooLarge,
                            &format!("frame of {size} bytes exceeds limit of {max}"),
                            None,
                        ))
                        .await;
                    break CloseReason::FrameTooLarge;
                }
                Some(Err(e)) => {
                    debug!(conn_id, error = %e, "read failed");
                    break CloseReason::IoError;
                }
                Some(Ok(raw)) => {
                    session.touch();
                    match parse_envelope(&raw) {
                        Ok(envelope) if envelope.t == EnvelopeType::Req => {
                            pipeline.handle(envelope, &mut session, &out_tx, &mut tasks).await;
                        }
                        Ok(envelope) => {
                            // Clients only send requests; anything else is a
                            // per-message rejection, not a disconnect.
                            let _ = out_tx
                                .send(make_error(
                                    envelope.id.as_deref(),
                                    None,
                                    ErrorCode::BadRequest,
                                    &format!("unexpected envelope type: {}", envelope.t.as_str()),
                                    None,
                                ))
                                .await;
                        }
                        Err(e) => {
                            let _ = out_tx
                                .send(make_error(None, None, ErrorCode::BadRequest, &e.to_string(), None))
                                .await;
                        }
                    }
                }
            },
            _ = tokio::time::sleep_until(deadline.into()) => {
                let (code_msg, reason) = if !session.authenticated
                    && grace_deadline <= idle_deadline
                {
                    ("authentication timeout", CloseReason::AuthGraceExpired)
                } else {
                    ("idle timeout", CloseReason::IdleTimeout)
                };
                // Best-effort notice before close.
                let _ = out_tx
                    .send(make_error(None, None, ErrorCode::Connection, code_msg, None))
                    .await;
                break reason;
            },
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        tracing::error!(conn_id, error = %e, "command task panicked");
                    }
                }
            },
            _ = shutdown.recv() => break CloseReason::Shutdown,
        }
    };

    // Cancel anything still running; their reply channel is about to close.
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    // Let the writer drain queued envelopes, then close.
    drop(out_tx);
    let _ = writer.await;

    info!(
        conn_id,
        remote = %remote_addr,
        reason = reason.as_str(),
        authenticated = session.authenticated,
        "connection closed"
    );
}
