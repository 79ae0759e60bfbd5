//! LingVis bridge
//!
//! Connects a reader application to the LingVis script SDK running inside
//! its embedded web views. The host calls into page script by injecting
//! `lingVisSdk.*` invocations; page script answers through the exposed
//! `LingVisSDK` interface with string messages correlated by call id.
//!
//! - [`Bridge`] is the entry point: account, settings and publication binding
//! - [`channel`] holds the per-context handler and wire protocol
//! - [`session`] tracks the shared token gate and language switch
//! - [`discovery`] attaches content channels to views as they appear

pub mod bridge;
pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod escape;
pub mod main_thread;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, ReaderSession};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use main_thread::{MainLoop, MainThread};
pub use types::{Publication, Settings};
