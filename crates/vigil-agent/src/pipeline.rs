//! Request dispatch pipeline.
//!
//! Every request envelope that reaches `handle` produces exactly one
//! correlated response or error envelope on the outbound channel. Check
//! order for non-AUTH requests: known action, rate limit, authentication,
//! scopes, payload validation, admission, then the handler itself.
//!
//! AUTH is processed inline on the connection task because it mutates the
//! session; everything else runs as a spawned task so slow handlers do not
//! block the read loop.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use vigil_auth::{authorize, InvalidReason, TokenService, TokenValidation};
use vigil_protocol::envelope::{make_error, make_response, Envelope};
use vigil_protocol::ErrorCode;

use crate::registry::{CommandErrorKind, CommandRegistry};
use crate::session::ConnectionSession;

pub const ACTION_AUTH: &str = "AUTH";

pub struct Pipeline {
    registry: Arc<CommandRegistry>,
    tokens: TokenService,
    max_in_flight: u32,
}

impl Pipeline {
    pub fn new(registry: Arc<CommandRegistry>, tokens: TokenService, max_in_flight: u32) -> Self {
        Self {
            registry,
            tokens,
            max_in_flight,
        }
    }

    /// Process one request envelope. Immediate rejections are sent from
    /// here; accepted commands are spawned into `tasks` and reply through
    /// `out` when they finish.
    ///
    /// `request` must be a validated `req` envelope (non-empty id and act).
    pub async fn handle(
        &self,
        request: Envelope,
        session: &mut ConnectionSession,
        out: &mpsc::Sender<Envelope>,
        tasks: &mut JoinSet<()>,
    ) {
        let started = Instant::now();
        let id = request.id.clone().unwrap_or_default();
        let act = request.act.clone().unwrap_or_default();
        let payload = request.data.unwrap_or(Value::Null);

        if act == ACTION_AUTH {
            let reply = self.authenticate(&id, payload, session, started).await;
            let _ = out.send(reply).await;
            return;
        }

        // Unknown actions are reported before the rate check so a typo'd
        // client sees UNKNOWN_ACTION, not a drained bucket.
        let Some(def) = self.registry.get(&act) else {
            let _ = out
                .send(make_error(
                    Some(&id),
                    Some(&act),
                    ErrorCode::UnknownAction,
                    &format!("unknown action: {act}"),
                    None,
                ))
                .await;
            return;
        };

        if !session.consume_rate(&act) {
            warn!(conn_id = session.conn_id, action = %act, "rate limited");
            let _ = out
                .send(make_error(
                    Some(&id),
                    Some(&act),
                    ErrorCode::RateLimited,
                    "rate limit exceeded",
                    None,
                ))
                .await;
            return;
        }

        if !session.authenticated {
            let _ = out
                .send(make_error(
                    Some(&id),
                    Some(&act),
                    ErrorCode::AuthRequired,
                    "authentication required",
                    None,
                ))
                .await;
            return;
        }

        if !authorize(&session.scopes, &def.required_scopes) {
            warn!(
                conn_id = session.conn_id,
                token_id = session.token_id.as_deref().unwrap_or(""),
                action = %act,
                "scope check failed"
            );
            let _ = out
                .send(make_error(
                    Some(&id),
                    Some(&act),
                    ErrorCode::Forbidden,
                    "insufficient permissions",
                    None,
                ))
                .await;
            return;
        }

        let payload = match &def.validator {
            Some(validator) => match validator(&payload) {
                Ok(normalised) => normalised,
                Err(err) => {
                    let _ = out
                        .send(make_error(
                            Some(&id),
                            Some(&act),
                            err.wire_code(),
                            err.client_message(),
                            err.client_details(),
                        ))
                        .await;
                    return;
                }
            },
            None => payload,
        };

        // Admission control: the in-flight cap is backpressure, reported
        // with the same code as bucket exhaustion.
        let Some(guard) = session.try_admit(self.max_in_flight) else {
            warn!(conn_id = session.conn_id, action = %act, "in-flight cap reached");
            let _ = out
                .send(make_error(
                    Some(&id),
                    Some(&act),
                    ErrorCode::RateLimited,
                    "too many requests in flight",
                    None,
                ))
                .await;
            return;
        };

        debug!(conn_id = session.conn_id, id = %id, action = %act, "dispatching");

        // Build the future on the connection task, run it on its own.
        // Aborting the JoinSet on disconnect cancels the handler; the
        // guard's Drop then releases the in-flight slot.
        let fut = (def.handler)(payload, session.context());
        let out = out.clone();
        tasks.spawn(async move {
            let _guard = guard;
            let reply = match fut.await {
                Ok(data) => make_response(&id, &act, Some(data), Some(started)),
                Err(err) => {
                    if err.kind == CommandErrorKind::Internal {
                        tracing::error!(id = %id, action = %act, error = %err.message, "handler failed");
                    }
                    make_error(
                        Some(&id),
                        Some(&act),
                        err.wire_code(),
                        err.client_message(),
                        err.client_details(),
                    )
                }
            };
            let _ = out.send(reply).await;
        });
    }

    /// AUTH: rate-limited like any action, but runs inline because success
    /// mutates the session. Scopes are write-once per connection; a second
    /// AUTH is rejected rather than re-bound.
    async fn authenticate(
        &self,
        id: &str,
        payload: Value,
        session: &mut ConnectionSession,
        started: Instant,
    ) -> Envelope {
        if !session.consume_rate(ACTION_AUTH) {
            return make_error(
                Some(id),
                Some(ACTION_AUTH),
                ErrorCode::RateLimited,
                "rate limit exceeded",
                None,
            );
        }

        if session.authenticated {
            return make_error(
                Some(id),
                Some(ACTION_AUTH),
                ErrorCode::BadRequest,
                "already authenticated",
                None,
            );
        }

        let Some(token) = payload.get("token").and_then(Value::as_str) else {
            return make_error(
                Some(id),
                Some(ACTION_AUTH),
                ErrorCode::BadRequest,
                "missing token",
                None,
            );
        };

        match self.tokens.validate(token).await {
            Ok(TokenValidation::Valid { token_id, scopes }) => {
                debug!(conn_id = session.conn_id, token_id = %token_id, "authenticated");
                session.grant(token_id.clone(), scopes.clone());
                make_response(
                    id,
                    ACTION_AUTH,
                    Some(json!({
                        "authenticated": true,
                        "tokenId": token_id,
                        "scopes": scopes,
                    })),
                    Some(started),
                )
            }
            Ok(TokenValidation::Invalid { reason }) => {
                warn!(conn_id = session.conn_id, reason = %reason, "authentication failed");
                let code = match reason {
                    InvalidReason::Expired => ErrorCode::TokenExpired,
                    _ => ErrorCode::InvalidToken,
                };
                make_error(
                    Some(id),
                    Some(ACTION_AUTH),
                    code,
                    &format!("authentication failed: {reason}"),
                    None,
                )
            }
            Err(err) => {
                tracing::error!(conn_id = session.conn_id, error = %err, "token validation error");
                make_error(
                    Some(id),
                    Some(ACTION_AUTH),
                    ErrorCode::InternalError,
                    "internal error",
                    None,
                )
            }
        }
    }
}
