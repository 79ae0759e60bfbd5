//! Script context seam
//!
//! The embedding layer (reader views, web views) implements [`ScriptContext`]
//! for each script-execution context it creates, and routes page-script
//! calls on the exposed interface back through [`HostInterface::dispatch`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Name the host interface is exposed under inside page script
pub const HOST_INTERFACE_NAME: &str = "LingVisSDK";

/// Stable identity of one script context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// One embedded script-execution context
///
/// All methods are only called from the owning thread. A destroyed context
/// is expected to ignore them.
pub trait ScriptContext: Send + Sync {
    fn id(&self) -> ContextId;

    /// Run script text inside the context, fire and forget
    fn evaluate(&self, script: &str);

    /// Make `interface` callable from page script as `name`
    fn expose(&self, name: &str, interface: Arc<dyn HostInterface>);

    /// Reload the page so its script starts the readiness handshake again
    fn reload(&self);
}

/// String-based entry point page script calls into
pub trait HostInterface: Send + Sync {
    fn dispatch(&self, method: &str, args: &str);
}

/// Receives UI side effects requested by page script
pub trait ReaderUi: Send + Sync {
    /// The reader selected text; hide system bars
    fn enter_immersive_mode(&self);
}
