//! Bridge facade
//!
//! The public surface the reader UI talks to. Account and settings calls go
//! through the primary channel; binding a publication runs the
//! language-change state machine and then starts content discovery.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{script, ChannelEnv, ChannelHandler, ChannelRole, ReaderUi, ScriptContext};
use crate::config::BridgeConfig;
use crate::discovery::{ContextContainer, ContextRegistry, Discovery};
use crate::error::{BridgeError, Result};
use crate::main_thread::MainThread;
use crate::session::{
    LanguageHooks, LanguageOutcome, LanguagePhase, LanguageSwitch, SessionState, SettingsWriter,
};
use crate::types::{Publication, Settings};

/// Shared bridge state
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    env: Arc<ChannelEnv>,
    primary: RwLock<Option<Arc<ChannelHandler>>>,
    /// Discovery of every publication opened so far; dead entries are pruned
    readers: Mutex<Vec<Weak<Discovery>>>,
}

impl Bridge {
    /// Create a bridge; must be called from within a tokio runtime
    pub fn new(config: BridgeConfig, main_thread: MainThread) -> Self {
        Self::build(config, main_thread, None)
    }

    /// Create a bridge that forwards selection events to `ui`
    pub fn with_ui(config: BridgeConfig, main_thread: MainThread, ui: Arc<dyn ReaderUi>) -> Self {
        Self::build(config, main_thread, Some(ui))
    }

    fn build(config: BridgeConfig, main_thread: MainThread, ui: Option<Arc<dyn ReaderUi>>) -> Self {
        let env = Arc::new(ChannelEnv {
            session: Arc::new(SessionState::new()),
            app: config.app.clone(),
            timing: config.timing.clone(),
            main_thread,
            runtime: tokio::runtime::Handle::current(),
            ui,
        });
        tracing::info!(app_id = %config.app.app_id, "LingVis bridge created");
        Self {
            inner: Arc::new(BridgeInner {
                config,
                env,
                primary: RwLock::new(None),
                readers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.inner.env.session
    }

    // ========================================================================
    // Primary channel
    // ========================================================================

    /// Attach the context that owns token acquisition.
    ///
    /// A previously attached primary is closed and replaced.
    pub fn attach_primary(&self, context: Arc<dyn ScriptContext>) -> Result<Arc<ChannelHandler>> {
        let handler = ChannelHandler::new(context, ChannelRole::Primary, self.inner.env.clone());
        let previous = self.inner.primary.write().replace(handler.clone());
        if let Some(previous) = previous {
            tracing::warn!(context_id = %previous.id(), "Replacing primary channel");
            previous.close();
        }
        handler.install()?;
        tracing::info!(context_id = %handler.id(), "Attached primary channel");
        Ok(handler)
    }

    /// The primary handler; reaching this without one is an orchestration bug
    pub fn primary(&self) -> Result<Arc<ChannelHandler>> {
        self.inner.primary.read().clone().ok_or_else(|| {
            tracing::error!("Call issued before the primary channel was attached");
            BridgeError::PrimaryChannelMissing
        })
    }

    // ========================================================================
    // Account and settings
    // ========================================================================

    /// Sign in with credentials, resolving to the new session token
    pub async fn sign_in(&self, email: &str, password: &str, new_account: bool) -> Result<String> {
        self.sign_in_inner(email, password, new_account, false).await
    }

    /// Sign in to an account the host generated on the user's behalf
    pub async fn sign_in_autogenerated(&self, email: &str, password: &str) -> Result<String> {
        self.sign_in_inner(email, password, true, true).await
    }

    async fn sign_in_inner(
        &self,
        email: &str,
        password: &str,
        new_account: bool,
        autogenerated: bool,
    ) -> Result<String> {
        let primary = self.primary()?;
        let app_id = self.inner.config.app.app_id.clone();
        primary
            .call_with(|id| script::user_sign_in(id, email, password, &app_id, new_account, autogenerated))
            .await
    }

    pub async fn sign_out(&self) -> Result<String> {
        self.primary()?.call_with(script::sign_out).await
    }

    /// Raw settings payload: `learning,native,level,email`
    pub async fn get_settings(&self) -> Result<String> {
        self.primary()?.call_with(script::get_settings).await
    }

    pub async fn settings(&self) -> Result<Settings> {
        Settings::parse(&self.get_settings().await?)
    }

    /// Persist learning settings. A non-empty `l2` holds the session gate
    /// closed until the reply arrives.
    pub async fn update_settings(&self, l2: &str, l1: &str, level: &str) -> Result<String> {
        let primary = self.primary()?;
        let _updating = (!l2.is_empty()).then(|| self.inner.env.session.begin_update());
        primary
            .call_with(|id| script::update_settings(id, l2, l1, level))
            .await
    }

    // ========================================================================
    // Reader sessions
    // ========================================================================

    /// Bind a publication: switch the session language if needed, then
    /// attach content channels for its views
    pub fn open_publication(
        &self,
        publication: Publication,
        container: Option<Arc<dyn ContextContainer>>,
        hooks: Option<Arc<dyn LanguageHooks>>,
    ) -> ReaderSession {
        let discovery = Discovery::new(self.inner.env.clone(), publication.book_key());
        self.track_reader(&discovery);
        let switch = LanguageSwitch::new(
            self.inner.env.session.clone(),
            hooks,
            self.inner.config.default_language.clone(),
        );
        let phase = switch.subscribe();
        let (outcome_tx, outcome) = watch::channel(None);

        tracing::info!(book = %publication.book_key(), "Opening publication");
        let task = self.inner.env.runtime.spawn({
            let bridge = self.clone();
            let discovery = discovery.clone();
            let publication = publication.clone();
            async move {
                let result = switch.bind(&publication, &bridge).await;
                if result.attaches_channels() {
                    if matches!(result, LanguageOutcome::Switched(_)) {
                        bridge.refresh_content_channels();
                    }
                    discovery.start(container);
                }
                outcome_tx.send_replace(Some(result));
            }
        });

        ReaderSession {
            publication,
            discovery,
            phase,
            outcome,
            task,
        }
    }

    fn track_reader(&self, discovery: &Arc<Discovery>) {
        let mut readers = self.inner.readers.lock();
        readers.retain(|reader| reader.strong_count() > 0);
        readers.push(Arc::downgrade(discovery));
    }

    /// Reload every content channel of every open publication so each signs
    /// in again past the gate
    pub fn refresh_content_channels(&self) {
        let live: Vec<Arc<Discovery>> = {
            let mut readers = self.inner.readers.lock();
            readers.retain(|reader| reader.strong_count() > 0);
            readers.iter().filter_map(Weak::upgrade).collect()
        };
        let mut refreshed = 0;
        for discovery in live.iter().filter(|discovery| !discovery.is_stopped()) {
            refreshed += discovery.len();
            discovery.refresh_all();
        }
        tracing::debug!(refreshed, "Refreshed content channels after language change");
    }
}

#[async_trait]
impl SettingsWriter for Bridge {
    async fn update_settings(&self, l2: &str, l1: &str, level: &str) -> Result<String> {
        Bridge::update_settings(self, l2, l1, level).await
    }
}

/// One open publication and its content channels
pub struct ReaderSession {
    publication: Publication,
    discovery: Arc<Discovery>,
    phase: watch::Receiver<LanguagePhase>,
    outcome: watch::Receiver<Option<LanguageOutcome>>,
    task: JoinHandle<()>,
}

impl ReaderSession {
    pub fn publication(&self) -> &Publication {
        &self.publication
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    /// Handle for reporting created and destroyed contexts
    pub fn registry(&self) -> ContextRegistry {
        self.discovery.registry()
    }

    pub fn phase(&self) -> LanguagePhase {
        *self.phase.borrow()
    }

    /// Wait for the language step to finish and return how it ended
    pub async fn ready(&mut self) -> Result<LanguageOutcome> {
        let outcome = self
            .outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        outcome.clone().ok_or(BridgeError::ChannelClosed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        // The language task is left to finish; it owns session-wide state
        self.discovery.stop();
    }
}
