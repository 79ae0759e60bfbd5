//! Inbound messages from page script
//!
//! Two wire forms are accepted. The legacy form is one method per message
//! kind with fields packed as `id|value|error`. The typed form goes through
//! the `message` method as a versioned JSON envelope.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Current version of the JSON envelope
pub const PROTOCOL_VERSION: u32 = 1;

/// A decoded call from page script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboundMessage {
    Ready,
    Token {
        id: String,
        token: String,
        #[serde(default)]
        error: String,
    },
    Callback {
        id: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        error: String,
    },
    Log {
        message: String,
    },
    Select,
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    v: u32,
    #[serde(flatten)]
    message: InboundMessage,
}

impl InboundMessage {
    /// Decode a host-interface call
    pub fn parse(method: &str, args: &str) -> Result<Self> {
        match method {
            "message" => Self::from_json(args),
            "ready" => Ok(InboundMessage::Ready),
            "token" => {
                let (id, token, error) = split_packed(args)?;
                Ok(InboundMessage::Token { id, token, error })
            }
            "callback" => {
                let (id, payload, error) = split_packed(args)?;
                Ok(InboundMessage::Callback { id, payload, error })
            }
            "log" => Ok(InboundMessage::Log {
                message: args.to_string(),
            }),
            "onSelect" => Ok(InboundMessage::Select),
            other => Err(BridgeError::MalformedMessage(format!(
                "unknown method: {}",
                other
            ))),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let version = value
            .get("v")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| BridgeError::MalformedMessage("missing version".to_string()))?;
        if version != u64::from(PROTOCOL_VERSION) {
            return Err(BridgeError::UnsupportedVersion(
                u32::try_from(version).unwrap_or(u32::MAX),
            ));
        }
        let envelope: Envelope = serde_json::from_value(value)?;
        Ok(envelope.message)
    }

    /// Encode in the typed envelope form
    pub fn to_json(&self) -> Result<String> {
        let envelope = Envelope {
            v: PROTOCOL_VERSION,
            message: self.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// Split `id|value|error`. The id ends at the first separator and the error
/// starts after the last one, so the value itself may contain `|`.
fn split_packed(args: &str) -> Result<(String, String, String)> {
    let malformed = || BridgeError::MalformedMessage(format!("expected id|value|error, got {:?}", args));
    let (id, rest) = args.split_once('|').ok_or_else(malformed)?;
    let (value, error) = rest.rsplit_once('|').ok_or_else(malformed)?;
    Ok((id.to_string(), value.to_string(), error.to_string()))
}
