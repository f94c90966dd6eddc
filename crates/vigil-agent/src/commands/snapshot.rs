//! SNAPSHOT: capture a still frame from a V4L2 camera device.
//!
//! Payload fields are optional and defaulted from `[snapshot]` config, then
//! range-checked. The actual capture goes through the `CameraService`
//! collaborator; the shipped binary wires `DisabledCamera` and deployments
//! with capture hardware provide their own backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SnapshotSection;
use crate::registry::{CommandDefinition, CommandError};

pub const SCOPE_SNAPSHOT_CREATE: &str = "snapshot:create";

const WIDTH_RANGE: std::ops::RangeInclusive<u64> = 160..=7680;
const HEIGHT_RANGE: std::ops::RangeInclusive<u64> = 120..=4320;
const QUALITY_RANGE: std::ops::RangeInclusive<u64> = 1..=100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotParams {
    pub camera_id: String,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
}

/// A captured frame. `data` is base64-encoded image bytes.
#[derive(Debug, Clone)]
pub struct Capture {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub data: String,
}

pub type CaptureFuture = Pin<Box<dyn Future<Output = Result<Capture, CommandError>> + Send>>;

/// Camera backend seam. Implementations must be safe to call concurrently;
/// serialising access to one physical device is their concern.
pub trait CameraService: Send + Sync {
    fn capture(&self, params: SnapshotParams) -> CaptureFuture;
}

/// Backend for builds without capture support. Always fails; the client
/// sees a masked internal error, the log says why.
pub struct DisabledCamera;

impl CameraService for DisabledCamera {
    fn capture(&self, params: SnapshotParams) -> CaptureFuture {
        Box::pin(async move {
            Err(CommandError::internal(format!(
                "camera capture disabled in this build (requested {})",
                params.camera_id
            )))
        })
    }
}

/// `/dev/video` followed by one or more digits, nothing else.
fn is_camera_device(id: &str) -> bool {
    match id.strip_prefix("/dev/video") {
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn field_error(field: &str, message: &str) -> CommandError {
    CommandError::bad_request_with(format!("{field}: {message}"), json!({ "field": field }))
}

fn ranged_field(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    default: u32,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u32, CommandError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => {
            let n = value
                .as_u64()
                .ok_or_else(|| field_error(field, "must be an integer"))?;
            if !range.contains(&n) {
                return Err(field_error(
                    field,
                    &format!("must be between {} and {}", range.start(), range.end()),
                ));
            }
            Ok(n as u32)
        }
    }
}

/// Apply config defaults, then validate every field. Returns the normalised
/// payload the handler receives.
pub fn validate_payload(payload: &Value, defaults: &SnapshotSection) -> Result<SnapshotParams, CommandError> {
    let empty = serde_json::Map::new();
    let obj = match payload {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => return Err(CommandError::bad_request("payload must be an object")),
    };

    let camera_id = match obj.get("cameraId") {
        None | Some(Value::Null) => defaults.camera_id.clone(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(field_error("cameraId", "must be a string")),
    };
    if !is_camera_device(&camera_id) {
        return Err(field_error("cameraId", "must match /dev/video<N>"));
    }

    Ok(SnapshotParams {
        camera_id,
        width: ranged_field(obj, "width", defaults.width, WIDTH_RANGE)?,
        height: ranged_field(obj, "height", defaults.height, HEIGHT_RANGE)?,
        quality: ranged_field(obj, "quality", defaults.quality, QUALITY_RANGE)?,
    })
}

pub fn definition(defaults: SnapshotSection, camera: Arc<dyn CameraService>) -> CommandDefinition {
    let validator_defaults = defaults.clone();
    CommandDefinition {
        name: "SNAPSHOT",
        required_scopes: vec![SCOPE_SNAPSHOT_CREATE.to_string()],
        validator: Some(Box::new(move |payload| {
            let params = validate_payload(payload, &validator_defaults)?;
            serde_json::to_value(&params)
                .map_err(|e| CommandError::internal(format!("params serialisation: {e}")))
        })),
        handler: Box::new(move |payload, _ctx| {
            let camera = camera.clone();
            Box::pin(async move {
                // The validator already normalised this.
                let params: SnapshotParams = serde_json::from_value(payload)
                    .map_err(|e| CommandError::internal(format!("params deserialisation: {e}")))?;
                let quality = params.quality;
                let camera_id = params.camera_id.clone();

                let capture = camera.capture(params).await?;
                Ok(json!({
                    "cameraId": camera_id,
                    "format": capture.format,
                    "encoding": "base64",
                    "width": capture.width,
                    "height": capture.height,
                    "quality": quality,
                    "size": capture.size,
                    "data": capture.data,
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                }))
            })
        }),
    }
}
