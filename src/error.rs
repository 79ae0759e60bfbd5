//! Error types for the LingVis bridge

use std::time::Duration;

use thiserror::Error;

/// Bridge-wide result type
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error type
///
/// Cloneable so one failure can resolve every waiter of a closed channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The script side answered with a non-empty error string
    #[error("Remote error: {0}")]
    Remote(String),

    /// No reply arrived before the call deadline
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The script context went away while the call was pending
    #[error("Channel closed before a reply arrived")]
    ChannelClosed,

    /// A call was routed to the primary channel before one was attached
    #[error("Primary channel has not been attached")]
    PrimaryChannelMissing,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unsupported message version: {0}")]
    UnsupportedVersion(u32),

    /// The owning-thread dispatcher is no longer running
    #[error("Main thread dispatcher has stopped")]
    MainThreadGone,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::MalformedMessage(err.to_string())
    }
}

impl BridgeError {
    /// Build the failure a pending call resolves to, given the remote error field
    pub fn remote(detail: impl Into<String>) -> Self {
        BridgeError::Remote(detail.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout(_))
    }
}
