//! Language-change state machine
//!
//! Binding a publication whose language differs from the session language
//! walks `Idle -> AwaitingLanguageDecision -> PersistingLanguage -> Ready`.
//! While persisting, the session gate stays closed so no channel signs in
//! with a token that belongs to the language being replaced.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::state::SessionState;
use crate::error::{BridgeError, Result};
use crate::types::Publication;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguagePhase {
    Idle,
    AwaitingLanguageDecision,
    PersistingLanguage,
    Ready,
}

/// Answer from the decision hook. Empty fields keep the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLanguageParams {
    /// Learning language to switch to
    pub l2: String,
    /// Native language to store alongside it
    pub l1: String,
    pub proceed: bool,
}

impl Default for ChangeLanguageParams {
    fn default() -> Self {
        Self {
            l2: String::new(),
            l1: String::new(),
            proceed: true,
        }
    }
}

impl ChangeLanguageParams {
    pub fn veto() -> Self {
        Self {
            proceed: false,
            ..Default::default()
        }
    }
}

/// Host hooks consulted around a language switch
pub trait LanguageHooks: Send + Sync {
    /// Decide whether and how to switch for this publication
    fn will_change_language(&self, _publication: &Publication) -> ChangeLanguageParams {
        ChangeLanguageParams::default()
    }

    /// Told how the persisted switch ended
    fn did_change_language(&self, _result: &Result<String>) {}
}

/// Writes learning settings through the primary channel
#[async_trait]
pub trait SettingsWriter: Send + Sync {
    async fn update_settings(&self, l2: &str, l1: &str, level: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageOutcome {
    /// Publication language already matches the session
    Unchanged,
    Vetoed,
    Switched(String),
    Failed(BridgeError),
}

impl LanguageOutcome {
    /// Whether channels for the publication should be attached afterwards
    pub fn attaches_channels(&self) -> bool {
        !matches!(self, LanguageOutcome::Failed(_))
    }
}

pub struct LanguageSwitch {
    session: Arc<SessionState>,
    hooks: Option<Arc<dyn LanguageHooks>>,
    default_language: String,
    phase: watch::Sender<LanguagePhase>,
}

impl LanguageSwitch {
    pub fn new(
        session: Arc<SessionState>,
        hooks: Option<Arc<dyn LanguageHooks>>,
        default_language: impl Into<String>,
    ) -> Self {
        let (phase, _) = watch::channel(LanguagePhase::Idle);
        Self {
            session,
            hooks,
            default_language: default_language.into(),
            phase,
        }
    }

    pub fn phase(&self) -> LanguagePhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LanguagePhase> {
        self.phase.subscribe()
    }

    /// Run one cycle for `publication`
    pub async fn bind(&self, publication: &Publication, writer: &dyn SettingsWriter) -> LanguageOutcome {
        self.phase.send_replace(LanguagePhase::Idle);

        let mut target = publication.primary_language(&self.default_language);
        if target.is_empty() || target == self.session.current_language() {
            self.phase.send_replace(LanguagePhase::Ready);
            return LanguageOutcome::Unchanged;
        }

        self.phase.send_replace(LanguagePhase::AwaitingLanguageDecision);
        let params = self
            .hooks
            .as_ref()
            .map(|hooks| hooks.will_change_language(publication))
            .unwrap_or_default();
        if !params.proceed {
            tracing::info!(language = %target, "Language change vetoed by host");
            self.phase.send_replace(LanguagePhase::Ready);
            return LanguageOutcome::Vetoed;
        }
        if !params.l2.is_empty() {
            target = params.l2.clone();
        }

        self.phase.send_replace(LanguagePhase::PersistingLanguage);
        tracing::info!(language = %target, native = %params.l1, "Persisting language change");
        let result = {
            let _updating = self.session.begin_update();
            let result = writer.update_settings(&target, &params.l1, "").await;
            if result.is_ok() {
                // Set before the gate reopens so waiting channels see the new language
                self.session.set_current_language(&target);
            }
            result
        };

        if let Some(hooks) = &self.hooks {
            hooks.did_change_language(&result);
        }
        self.phase.send_replace(LanguagePhase::Ready);

        match result {
            Ok(_) => LanguageOutcome::Switched(target),
            Err(err) => {
                tracing::warn!(language = %target, error = %err, "Language change failed");
                LanguageOutcome::Failed(err)
            }
        }
    }
}
