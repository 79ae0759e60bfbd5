//! Script channels
//!
//! A channel is one embedded script-execution context. Each attached
//! context gets a [`ChannelHandler`] that correlates outbound calls with
//! the untyped string replies page script sends back.

pub mod context;
pub mod handler;
pub mod message;
pub mod pending;
pub mod script;

pub use context::{ContextId, HostInterface, ReaderUi, ScriptContext, HOST_INTERFACE_NAME};
pub use handler::{ChannelEnv, ChannelHandler, ChannelRole, ReadyOutcome};
pub use message::{InboundMessage, PROTOCOL_VERSION};
pub use pending::{EntryGuard, PendingCalls, Waiter};
pub use script::ScriptCall;
