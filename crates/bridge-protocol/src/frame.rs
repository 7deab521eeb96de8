//! The JSON envelope carried inside each length-prefixed frame of the
//! framed-session adapter's wire protocol.
//!
//! Discriminated on `type`, mirroring the `kind`-tagged union used
//! elsewhere in this family of protocols, generalized to the
//! hello/ack/state/heartbeat shape this bridge needs.

use crate::{ProtocolError, UnifiedState};
use serde::{Deserialize, Serialize};

/// Maximum encoded frame size, length prefix excluded. Declaring a
/// larger length in the prefix is itself a protocol violation — the
/// adapter must reject it without reading that many bytes.
pub const MAX_FRAME_BYTES: u32 = 65536;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum FrameMessage {
    Hello {
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdk_version: Option<String>,
    },
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdk_version: Option<String>,
    },
    State {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdk_version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
        data: UnifiedState,
    },
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        timestamp: i64,
    },
}

impl FrameMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameMessage::Hello { .. } => "hello",
            FrameMessage::Ack { .. } => "ack",
            FrameMessage::State { .. } => "state",
            FrameMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Encode to the UTF-8 JSON payload that goes after the length prefix.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON payload, rejecting anything over [`MAX_FRAME_BYTES`]
    /// before attempting to parse it.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() as u64 > MAX_FRAME_BYTES as u64 {
            return Err(ProtocolError::FrameTooLarge {
                declared: bytes.len() as u32,
                max: MAX_FRAME_BYTES,
            });
        }
        let msg: RawEnvelope = serde_json::from_slice(bytes)?;
        msg.try_into()
    }
}

/// Intermediate, loosely-typed form used only to give precise
/// [`ProtocolError`] variants instead of a generic serde parse failure
/// (e.g. distinguishing "unknown type" from "missing device_id").
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    sdk_version: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    data: Option<UnifiedState>,
}

impl TryFrom<RawEnvelope> for FrameMessage {
    type Error = ProtocolError;

    fn try_from(raw: RawEnvelope) -> Result<Self, ProtocolError> {
        match raw.kind.as_str() {
            "hello" => Ok(FrameMessage::Hello {
                device_id: raw.device_id.filter(|d| !d.is_empty()).ok_or(ProtocolError::MissingDeviceId)?,
                sdk_version: raw.sdk_version,
            }),
            "ack" => Ok(FrameMessage::Ack { sdk_version: raw.sdk_version }),
            "state" => Ok(FrameMessage::State {
                device_id: raw.device_id,
                sdk_version: raw.sdk_version,
                timestamp: raw.timestamp,
                data: raw.data.ok_or(ProtocolError::MissingStatePayload)?,
            }),
            "heartbeat" => Ok(FrameMessage::Heartbeat {
                device_id: raw.device_id,
                timestamp: raw.timestamp.ok_or(ProtocolError::MissingHeartbeatTimestamp)?,
            }),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}
