//! Session state and the language-change state machine

pub mod language;
pub mod state;

pub use language::{
    ChangeLanguageParams, LanguageHooks, LanguageOutcome, LanguagePhase, LanguageSwitch,
    SettingsWriter,
};
pub use state::{SessionSnapshot, SessionState, UpdateGuard};
