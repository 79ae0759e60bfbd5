//! Content channel discovery
//!
//! Script contexts for document views come and go as the reader pages
//! through a publication. Discovery attaches exactly one content handler to
//! every context it learns about, either by polling a [`ContextContainer`]
//! on a fixed schedule or from [`ContextEvent`]s the view layer sends
//! through a [`ContextRegistry`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::channel::{ChannelEnv, ChannelHandler, ChannelRole, ContextId, ScriptContext};

/// Poll-observable set of live script contexts
#[async_trait]
pub trait ContextContainer: Send + Sync {
    async fn contexts(&self) -> Vec<Arc<dyn ScriptContext>>;
}

pub enum ContextEvent {
    Created(Arc<dyn ScriptContext>),
    Destroyed(ContextId),
}

/// Handle the view layer uses to report context lifecycle
#[derive(Clone)]
pub struct ContextRegistry {
    tx: mpsc::UnboundedSender<ContextEvent>,
}

impl ContextRegistry {
    /// Report a new context; returns false once discovery is gone
    pub fn created(&self, context: Arc<dyn ScriptContext>) -> bool {
        self.tx.send(ContextEvent::Created(context)).is_ok()
    }

    pub fn destroyed(&self, id: ContextId) -> bool {
        self.tx.send(ContextEvent::Destroyed(id)).is_ok()
    }
}

pub struct Discovery {
    env: Arc<ChannelEnv>,
    book_key: String,
    attached: RwLock<HashMap<ContextId, Arc<ChannelHandler>>>,
    registry: ContextRegistry,
    /// Taken on start; events sent earlier stay buffered until then
    events: Mutex<Option<mpsc::UnboundedReceiver<ContextEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Discovery {
    pub fn new(env: Arc<ChannelEnv>, book_key: impl Into<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            env,
            book_key: book_key.into(),
            attached: RwLock::new(HashMap::new()),
            registry: ContextRegistry { tx },
            events: Mutex::new(Some(rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> ContextRegistry {
        self.registry.clone()
    }

    // ========================================================================
    // Attached set
    // ========================================================================

    /// Attach a content handler unless this context already has one
    pub fn attach(&self, context: Arc<dyn ScriptContext>) -> Option<Arc<ChannelHandler>> {
        let id = context.id();
        let handler = {
            let mut attached = self.attached.write();
            if attached.contains_key(&id) {
                return None;
            }
            let handler = ChannelHandler::new(
                context,
                ChannelRole::Content {
                    book_key: self.book_key.clone(),
                },
                self.env.clone(),
            );
            attached.insert(id, handler.clone());
            handler
        };

        if let Err(err) = handler.install() {
            tracing::warn!(context_id = %id, error = %err, "Failed to install content channel");
        }
        tracing::info!(context_id = %id, book = %self.book_key, "Attached content channel");
        Some(handler)
    }

    /// Attach every unseen context, returning how many were new
    pub fn attach_all(&self, contexts: Vec<Arc<dyn ScriptContext>>) -> usize {
        contexts
            .into_iter()
            .filter_map(|context| self.attach(context))
            .count()
    }

    /// Forget a destroyed context and fail its outstanding calls
    pub fn detach(&self, id: ContextId) -> Option<Arc<ChannelHandler>> {
        let handler = self.attached.write().remove(&id)?;
        handler.close();
        tracing::info!(context_id = %id, "Detached content channel");
        Some(handler)
    }

    pub fn handler(&self, id: ContextId) -> Option<Arc<ChannelHandler>> {
        self.attached.read().get(&id).cloned()
    }

    pub fn handlers(&self) -> Vec<Arc<ChannelHandler>> {
        self.attached.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.attached.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.read().is_empty()
    }

    /// Reload every attached context so each repeats its handshake
    pub fn refresh_all(&self) {
        for handler in self.handlers() {
            if let Err(err) = handler.refresh() {
                tracing::warn!(context_id = %handler.id(), error = %err, "Failed to refresh channel");
            }
        }
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Start consuming registry events and, if given, polling `container`.
    /// Later calls are no-ops.
    pub fn start(self: &Arc<Self>, container: Option<Arc<dyn ContextContainer>>) {
        // Checked under the task lock so a concurrent stop sees what is pushed
        let mut tasks = self.tasks.lock();
        if self.stopped.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(events) = self.events.lock().take() {
            tasks.push(
                self.env
                    .runtime
                    .spawn(listen(Arc::downgrade(self), events)),
            );
        }
        if let Some(container) = container {
            tasks.push(self.env.runtime.spawn(poll(Arc::downgrade(self), container)));
        }
        tracing::debug!(book = %self.book_key, "Discovery started");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn poll(discovery: Weak<Discovery>, container: Arc<dyn ContextContainer>) {
    let (delay, period) = match discovery.upgrade() {
        Some(d) => (d.env.timing.discovery_delay, d.env.timing.discovery_period),
        None => return,
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let contexts = container.contexts().await;
        let Some(discovery) = discovery.upgrade() else {
            break;
        };
        let added = discovery.attach_all(contexts);
        if added > 0 {
            tracing::debug!(added, total = discovery.len(), "Discovery scan attached channels");
        }
    }
}

async fn listen(discovery: Weak<Discovery>, mut events: mpsc::UnboundedReceiver<ContextEvent>) {
    while let Some(event) = events.recv().await {
        let Some(discovery) = discovery.upgrade() else {
            break;
        };
        match event {
            ContextEvent::Created(context) => {
                discovery.attach(context);
            }
            ContextEvent::Destroyed(id) => {
                discovery.detach(id);
            }
        }
    }
}
