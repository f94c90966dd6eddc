//! Envelope types, builders and validation.
//!
//! Wire shapes:
//!   HELLO: { v, t:"hello", data: { maxFrame, heartbeatSecs, maxInFlight, serverVersion } }
//!   REQ:   { v, t:"req", id, act, data?, meta:{ clientTs } }
//!   RES:   { v, t:"res", id, act, ok:true, data?, meta:{ serverTs, latencyMs? } }
//!   ERR:   { v, t:"err", id?, act?, ok:false, code, msg, details?, meta:{ serverTs } }

use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::{ErrorCode, PROTOCOL_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Hello,
    Req,
    Res,
    Err,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Hello => "hello",
            EnvelopeType::Req => "req",
            EnvelopeType::Res => "res",
            EnvelopeType::Err => "err",
        }
    }
}

/// Timestamps and latency attached to envelopes. All times are unix millis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u16,
    pub t: EnvelopeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EnvelopeError {
    #[error("envelope is not a JSON object")]
    NotAnObject,
    #[error("unsupported protocol version: {got} (supported: {})", PROTOCOL_VERSION)]
    UnsupportedVersion { got: u64 },
    #[error("unknown envelope type: {got:?}")]
    UnknownType { got: String },
    #[error("request envelope missing or empty field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid json: {0}")]
    Json(String),
}

/// Parse and validate an envelope from raw frame bytes.
///
/// Fail-fast order: JSON object, supported version, known type, then
/// request-specific fields (`id` and `act` present and non-empty).
pub fn parse_envelope(raw: &[u8]) -> Result<Envelope, EnvelopeError> {
    let value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| EnvelopeError::Json(e.to_string()))?;

    let obj = value.as_object().ok_or(EnvelopeError::NotAnObject)?;

    let v = obj.get("v").and_then(|v| v.as_u64()).unwrap_or(0);
    if v != u64::from(PROTOCOL_VERSION) {
        return Err(EnvelopeError::UnsupportedVersion { got: v });
    }

    let t = obj.get("t").and_then(|t| t.as_str()).unwrap_or("");
    if !matches!(t, "hello" | "req" | "res" | "err") {
        return Err(EnvelopeError::UnknownType { got: t.to_string() });
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| EnvelopeError::Json(e.to_string()))?;

    if envelope.t == EnvelopeType::Req {
        if envelope.id.as_deref().unwrap_or("").is_empty() {
            return Err(EnvelopeError::MissingField { field: "id" });
        }
        if envelope.act.as_deref().unwrap_or("").is_empty() {
            return Err(EnvelopeError::MissingField { field: "act" });
        }
    }

    Ok(envelope)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Limits advertised by the server in its post-accept hello.
#[derive(Debug, Clone, Copy)]
pub struct HelloLimits {
    pub max_frame: usize,
    pub heartbeat_secs: u64,
    pub max_in_flight: u32,
}

/// Server hello, sent once immediately after accept.
pub fn make_hello(limits: HelloLimits) -> Envelope {
    Envelope {
        v: PROTOCOL_VERSION,
        t: EnvelopeType::Hello,
        id: None,
        act: None,
        ok: None,
        data: Some(serde_json::json!({
            "maxFrame": limits.max_frame,
            "heartbeatSecs": limits.heartbeat_secs,
            "maxInFlight": limits.max_in_flight,
            "serverVersion": PROTOCOL_VERSION,
        })),
        code: None,
        msg: None,
        details: None,
        meta: None,
    }
}

/// Client request.
pub fn make_request(id: &str, action: &str, data: Option<serde_json::Value>) -> Envelope {
    Envelope {
        v: PROTOCOL_VERSION,
        t: EnvelopeType::Req,
        id: Some(id.to_string()),
        act: Some(action.to_string()),
        ok: None,
        data,
        code: None,
        msg: None,
        details: None,
        meta: Some(Meta {
            client_ts: Some(now_millis()),
            ..Meta::default()
        }),
    }
}

/// Successful response, echoing the request's id and action.
pub fn make_response(
    id: &str,
    action: &str,
    data: Option<serde_json::Value>,
    started_at: Option<Instant>,
) -> Envelope {
    Envelope {
        v: PROTOCOL_VERSION,
        t: EnvelopeType::Res,
        id: Some(id.to_string()),
        act: Some(action.to_string()),
        ok: Some(true),
        data,
        code: None,
        msg: None,
        details: None,
        meta: Some(Meta {
            client_ts: None,
            server_ts: Some(now_millis()),
            latency_ms: started_at.map(|t| t.elapsed().as_millis() as u64),
        }),
    }
}

/// Error response. `id`/`act` echo the request when it could be correlated;
/// they are absent for pre-parse failures. `msg` must be operator-facing
/// text, never raw internal error output.
pub fn make_error(
    id: Option<&str>,
    action: Option<&str>,
    code: ErrorCode,
    msg: &str,
    details: Option<serde_json::Value>,
) -> Envelope {
    Envelope {
        v: PROTOCOL_VERSION,
        t: EnvelopeType::Err,
        id: id.map(str::to_string),
        act: action.map(str::to_string),
        ok: Some(false),
        data: None,
        code: Some(code),
        msg: Some(msg.to_string()),
        details,
        meta: Some(Meta {
            client_ts: None,
            server_ts: Some(now_millis()),
            latency_ms: None,
        }),
    }
}
