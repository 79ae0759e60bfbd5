//! Channel handler
//!
//! Owns the host-interface surface of one script context together with its
//! pending-call table, and runs that context's readiness handshake against
//! the shared session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::context::{ContextId, HostInterface, ReaderUi, ScriptContext, HOST_INTERFACE_NAME};
use super::message::InboundMessage;
use super::pending::PendingCalls;
use super::script::{self, ScriptCall};
use crate::config::{AppRegistration, TimingConfig};
use crate::error::{BridgeError, Result};
use crate::main_thread::MainThread;
use crate::session::SessionState;

/// Everything a handler shares with its siblings
pub struct ChannelEnv {
    pub session: Arc<SessionState>,
    pub app: AppRegistration,
    pub timing: TimingConfig,
    pub main_thread: MainThread,
    /// Runtime deferred handshakes are spawned on; script callbacks may
    /// arrive on threads that are not part of it
    pub runtime: tokio::runtime::Handle,
    pub ui: Option<Arc<dyn ReaderUi>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRole {
    /// Acquires the session token
    Primary,
    /// Per-view channel signing in with the cached token
    Content { book_key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    SignedIn,
    /// Sign-in postponed until the session gate opens
    Deferred,
}

pub struct ChannelHandler {
    context: Arc<dyn ScriptContext>,
    role: ChannelRole,
    pending: PendingCalls,
    env: Arc<ChannelEnv>,
    waiting_ready: AtomicBool,
    this: Weak<ChannelHandler>,
}

impl ChannelHandler {
    pub fn new(context: Arc<dyn ScriptContext>, role: ChannelRole, env: Arc<ChannelEnv>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            context,
            role,
            pending: PendingCalls::new(),
            env,
            waiting_ready: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> ContextId {
        self.context.id()
    }

    pub fn role(&self) -> &ChannelRole {
        &self.role
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.role, ChannelRole::Primary)
    }

    pub fn book_key(&self) -> &str {
        match &self.role {
            ChannelRole::Primary => "",
            ChannelRole::Content { book_key } => book_key,
        }
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Whether a deferred readiness handshake is waiting on the gate
    pub fn is_waiting_ready(&self) -> bool {
        self.waiting_ready.load(Ordering::Acquire)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Expose this handler to page script and reload so the page reports ready
    ///
    /// The context only receives a weak binding, so dropping the handler
    /// frees it even while the context is still alive.
    pub fn install(&self) -> Result<()> {
        let context = self.context.clone();
        let binding = HostBinding {
            handler: self.this.clone(),
        };
        tracing::debug!(context_id = %self.id(), primary = self.is_primary(), "Installing host interface");
        self.env.main_thread.post(move || {
            context.expose(HOST_INTERFACE_NAME, Arc::new(binding));
            context.reload();
        })
    }

    /// Reload the page so it runs the readiness handshake again
    pub fn refresh(&self) -> Result<()> {
        let context = self.context.clone();
        self.env.main_thread.post(move || context.reload())
    }

    /// Fail every outstanding call; used once the context is known to be gone
    pub fn close(&self) -> usize {
        let failed = self.pending.fail_all(BridgeError::ChannelClosed);
        if failed > 0 {
            tracing::info!(context_id = %self.id(), failed, "Channel closed with calls outstanding");
        }
        failed
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Call `lingVisSdk.<method>(id, args...)` and wait for its reply
    pub async fn call(&self, method: &'static str, args: &[&str]) -> Result<String> {
        self.call_with(|id| {
            args.iter()
                .fold(ScriptCall::new(method).arg(id), |call, value| call.arg(value))
        })
        .await
    }

    /// Register a pending call, inject the script `build` produces for its
    /// id, and wait for the matching reply or the configured deadline
    pub async fn call_with(&self, build: impl FnOnce(&str) -> ScriptCall) -> Result<String> {
        let (id, waiter) = self.pending.register();
        let _entry = self.pending.guard(&id);
        let call = build(&id);
        tracing::debug!(
            context_id = %self.id(),
            call_id = %id,
            method = call.method(),
            "Issuing call"
        );

        if let Err(err) = self.inject(&call) {
            self.pending.cancel(&id, err.clone());
            return Err(err);
        }

        let received = match self.env.timing.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.cancel(&id, BridgeError::Timeout(limit));
                    tracing::warn!(call_id = %id, method = call.method(), "Call timed out");
                    return Err(BridgeError::Timeout(limit));
                }
            },
            None => waiter.await,
        };
        received.unwrap_or(Err(BridgeError::ChannelClosed))
    }

    fn inject(&self, call: &ScriptCall) -> Result<()> {
        let context = self.context.clone();
        let source = call.render();
        self.env.main_thread.post(move || context.evaluate(&source))
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Readiness signal from the page
    pub fn on_ready(&self) -> ReadyOutcome {
        let Some(token) = self.env.session.try_begin_sign_in(self.is_primary()) else {
            self.defer_ready();
            return ReadyOutcome::Deferred;
        };

        let call = script::token_sign_in(
            &token,
            &self.env.app.app_id,
            self.book_key(),
            &self.env.app.client_data,
        );
        tracing::debug!(context_id = %self.id(), primary = self.is_primary(), "Signing in channel");
        if let Err(err) = self.inject(&call) {
            tracing::error!(context_id = %self.id(), error = %err, "Failed to inject sign-in");
            if self.is_primary() {
                self.env.session.release_token_gate();
            }
        }
        ReadyOutcome::SignedIn
    }

    fn defer_ready(&self) {
        // One waiter per channel, however often the page repeats ready()
        if self.waiting_ready.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.this.clone();
        let session = self.env.session.clone();
        let limit = self.env.timing.ready_timeout;
        tracing::debug!(context_id = %self.id(), "Session not usable yet, deferring sign-in");

        self.env.runtime.spawn(async move {
            let opened = session.wait_until_open(limit).await;
            // Handler dropped while waiting: the context is gone
            let Some(handler) = this.upgrade() else {
                return;
            };
            handler.waiting_ready.store(false, Ordering::Release);
            if opened {
                handler.on_ready();
            } else {
                tracing::warn!(context_id = %handler.id(), "Gave up waiting for session readiness");
            }
        });
    }

    /// Token reply; only the primary channel updates the session
    pub fn on_token(&self, id: &str, token: &str, error: &str) -> bool {
        if self.is_primary() {
            if error.is_empty() {
                self.env.session.store_token(token);
            } else {
                tracing::warn!(context_id = %self.id(), error, "Token exchange failed");
                self.env.session.release_token_gate();
            }
        }
        self.pending.resolve(id, token, error)
    }

    pub fn on_callback(&self, id: &str, payload: &str, error: &str) -> bool {
        self.pending.resolve(id, payload, error)
    }

    pub fn on_log(&self, message: &str) {
        tracing::debug!(target: "lingvis", context_id = %self.id(), "{}", message);
    }

    pub fn on_select(&self) {
        let Some(ui) = self.env.ui.clone() else {
            return;
        };
        if let Err(err) = self.env.main_thread.post(move || ui.enter_immersive_mode()) {
            tracing::warn!(error = %err, "Could not forward selection to UI");
        }
    }

    pub fn handle(&self, message: InboundMessage) {
        match message {
            InboundMessage::Ready => {
                self.on_ready();
            }
            InboundMessage::Token { id, token, error } => {
                self.on_token(&id, &token, &error);
            }
            InboundMessage::Callback { id, payload, error } => {
                self.on_callback(&id, &payload, &error);
            }
            InboundMessage::Log { message } => self.on_log(&message),
            InboundMessage::Select => self.on_select(),
        }
    }
}

/// What page script holds: forwards to the handler while it is alive
struct HostBinding {
    handler: Weak<ChannelHandler>,
}

impl HostInterface for HostBinding {
    fn dispatch(&self, method: &str, args: &str) {
        match self.handler.upgrade() {
            Some(handler) => handler.dispatch(method, args),
            None => tracing::trace!(method, "Call on a detached host interface dropped"),
        }
    }
}

impl HostInterface for ChannelHandler {
    fn dispatch(&self, method: &str, args: &str) {
        match InboundMessage::parse(method, args) {
            Ok(message) => self.handle(message),
            Err(err) => {
                tracing::warn!(context_id = %self.id(), method, error = %err, "Dropping inbound message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, test_env, test_env_with, RecordingContext};
    use std::time::Duration;

    fn content(ctx: &Arc<RecordingContext>, env: &Arc<ChannelEnv>) -> Arc<ChannelHandler> {
        ChannelHandler::new(
            ctx.clone(),
            ChannelRole::Content {
                book_key: "Title:urn:1".to_string(),
            },
            env.clone(),
        )
    }

    #[tokio::test]
    async fn test_install_exposes_and_reloads() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        handler.install().unwrap();
        ctx.settle(&env.main_thread).await;

        assert_eq!(ctx.exposed_name().as_deref(), Some(HOST_INTERFACE_NAME));
        assert_eq!(ctx.reloads(), 1);
    }

    #[tokio::test]
    async fn test_call_resolves_from_callback() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        let call = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.call(script::GET_SETTINGS, &[]).await })
        };
        let script = ctx.next_script().await;
        let id = RecordingContext::call_id(&script);
        assert_eq!(script, format!("lingVisSdk.polyReadiumGetSettings('{}')", id));
        assert_eq!(handler.pending().len(), 1);

        handler.dispatch("callback", &format!("{}|done|", id));
        assert_eq!(call.await.unwrap(), Ok("done".to_string()));
        assert!(handler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_call_arguments_are_escaped() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        let call = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.call(script::UPDATE_SETTINGS, &["it's", "a\nb", "\\"]).await })
        };
        let script = ctx.next_script().await;
        assert!(script.ends_with(", 'it\\'s', 'a\\nb', '\\\\')"));

        let id = RecordingContext::call_id(&script);
        handler.on_callback(&id, "", "rejected");
        assert_eq!(
            call.await.unwrap(),
            Err(BridgeError::Remote("rejected".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_deadline_cancels_entry() {
        let (env, _main) = test_env(Some(Duration::from_secs(5)));
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        let result = handler.call(script::SIGN_OUT, &[]).await;

        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_secs(5))));
        assert!(handler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_calls() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        let call = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.call(script::SIGN_OUT, &[]).await })
        };
        ctx.next_script().await;

        assert_eq!(handler.close(), 1);
        assert_eq!(call.await.unwrap(), Err(BridgeError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_ready_while_token_unavailable_defers_once() {
        let (env, _main) = test_env(None);
        let primary_ctx = RecordingContext::new(0);
        let primary = ChannelHandler::new(primary_ctx.clone(), ChannelRole::Primary, env.clone());
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        // Primary signs in first and closes the gate until its token arrives
        assert_eq!(primary.on_ready(), ReadyOutcome::SignedIn);
        assert!(!env.session.token_available());

        assert_eq!(handler.on_ready(), ReadyOutcome::Deferred);
        assert_eq!(handler.on_ready(), ReadyOutcome::Deferred);
        assert!(handler.is_waiting_ready());
        ctx.settle(&env.main_thread).await;
        assert!(ctx.scripts().is_empty());

        primary.dispatch("token", "|tok-123|");
        let script = ctx.next_script().await;
        assert_eq!(
            script,
            "lingVisSdk.polyReadiumSignIn('', 'tok-123', '', '', 'test-app', 'Title:urn:1', '', 'test-client')"
        );
        // Exactly one sign-in, despite two ready() calls
        ctx.settle(&env.main_thread).await;
        assert!(ctx.scripts().is_empty());
        assert!(!handler.is_waiting_ready());
    }

    #[tokio::test]
    async fn test_content_waits_while_updating() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);
        env.session.store_token("tok");

        let guard = env.session.begin_update();
        assert_eq!(handler.on_ready(), ReadyOutcome::Deferred);
        ctx.settle(&env.main_thread).await;
        assert!(ctx.scripts().is_empty());

        drop(guard);
        let script = ctx.next_script().await;
        assert!(script.starts_with("lingVisSdk.polyReadiumSignIn('', 'tok'"));
    }

    #[tokio::test]
    async fn test_content_token_does_not_touch_session() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        handler.on_token("", "foreign", "");
        assert_eq!(env.session.token(), None);
    }

    #[tokio::test]
    async fn test_primary_token_error_reopens_gate() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(0);
        let primary = ChannelHandler::new(ctx.clone(), ChannelRole::Primary, env.clone());

        primary.on_ready();
        assert!(!env.session.token_available());
        primary.dispatch("token", "||expired");
        assert!(env.session.token_available());
        assert_eq!(env.session.token(), None);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        handler.dispatch("callback", "no separators");
        handler.dispatch("message", "{not json");
        handler.dispatch("unknown", "");
        handler.dispatch("log", "page says hi");
        ctx.settle(&env.main_thread).await;
        assert!(ctx.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_typed_callback_resolves() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        let call = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.call(script::GET_SETTINGS, &[]).await })
        };
        let id = RecordingContext::call_id(&ctx.next_script().await);
        let message = InboundMessage::Callback {
            id,
            payload: "typed".to_string(),
            error: String::new(),
        };
        handler.dispatch("message", &message.to_json().unwrap());

        assert_eq!(call.await.unwrap(), Ok("typed".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_call_leaves_no_entry() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);

        let call = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.call(script::GET_SETTINGS, &[]).await })
        };
        let id = RecordingContext::call_id(&ctx.next_script().await);
        assert_eq!(handler.pending().len(), 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert!(handler.pending().is_empty());
        assert!(!handler.on_callback(&id, "late", ""));
    }

    #[tokio::test]
    async fn test_context_does_not_keep_handler_alive() {
        let (env, _main) = test_env(None);
        let ctx = RecordingContext::new(7);
        let handler = content(&ctx, &env);
        handler.install().unwrap();
        ctx.settle(&env.main_thread).await;

        let weak = Arc::downgrade(&handler);
        let interface = ctx.interface();
        drop(handler);

        assert!(weak.upgrade().is_none());
        // Late page calls on the stale interface are ignored
        interface.dispatch("ready", "");
        interface.dispatch("callback", "x|y|");
        ctx.settle(&env.main_thread).await;
        assert!(ctx.scripts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_wait_gives_up_after_timeout() {
        let config = test_config(None).with_ready_timeout(Some(Duration::from_secs(2)));
        let (env, _main) = test_env_with(config);
        let ctx = RecordingContext::new(1);
        let handler = content(&ctx, &env);
        env.session.store_token("tok");

        let guard = env.session.begin_update();
        assert_eq!(handler.on_ready(), ReadyOutcome::Deferred);
        assert!(handler.is_waiting_ready());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handler.is_waiting_ready());

        // The abandoned wait does not sign in once the gate opens
        drop(guard);
        ctx.settle(&env.main_thread).await;
        assert!(ctx.scripts().is_empty());

        assert_eq!(handler.on_ready(), ReadyOutcome::SignedIn);
        let script = ctx.next_script().await;
        assert!(script.starts_with("lingVisSdk.polyReadiumSignIn('', 'tok'"));
    }

    #[tokio::test]
    async fn test_one_token_reply_wakes_every_deferred_channel() {
        let (env, _main) = test_env(None);
        let primary_ctx = RecordingContext::new(0);
        let primary = ChannelHandler::new(primary_ctx.clone(), ChannelRole::Primary, env.clone());
        let first_ctx = RecordingContext::new(1);
        let first = content(&first_ctx, &env);
        let second_ctx = RecordingContext::new(2);
        let second = ChannelHandler::new(
            second_ctx.clone(),
            ChannelRole::Content {
                book_key: "Other:urn:2".to_string(),
            },
            env.clone(),
        );

        assert_eq!(primary.on_ready(), ReadyOutcome::SignedIn);
        assert_eq!(first.on_ready(), ReadyOutcome::Deferred);
        assert_eq!(second.on_ready(), ReadyOutcome::Deferred);

        primary.dispatch("token", "|tok-7|");

        assert_eq!(
            first_ctx.next_script().await,
            "lingVisSdk.polyReadiumSignIn('', 'tok-7', '', '', 'test-app', 'Title:urn:1', '', 'test-client')"
        );
        assert_eq!(
            second_ctx.next_script().await,
            "lingVisSdk.polyReadiumSignIn('', 'tok-7', '', '', 'test-app', 'Other:urn:2', '', 'test-client')"
        );
        first_ctx.settle(&env.main_thread).await;
        assert!(first_ctx.scripts().is_empty());
        assert!(second_ctx.scripts().is_empty());
        assert!(!first.is_waiting_ready());
        assert!(!second.is_waiting_ready());
    }
}
