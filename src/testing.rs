//! Test doubles for script contexts and containers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::{ChannelEnv, ContextId, HostInterface, ReaderUi, ScriptContext};
use crate::config::BridgeConfig;
use crate::discovery::ContextContainer;
use crate::main_thread::MainThread;
use crate::session::SessionState;

pub const TEST_APP_ID: &str = "test-app";
pub const TEST_CLIENT_DATA: &str = "test-client";

pub fn test_config(call_timeout: Option<Duration>) -> BridgeConfig {
    BridgeConfig::new(TEST_APP_ID, TEST_CLIENT_DATA).with_call_timeout(call_timeout)
}

/// Channel environment with a spawned main thread loop
pub fn test_env(call_timeout: Option<Duration>) -> (Arc<ChannelEnv>, tokio::task::JoinHandle<()>) {
    test_env_with(test_config(call_timeout))
}

pub fn test_env_with(config: BridgeConfig) -> (Arc<ChannelEnv>, tokio::task::JoinHandle<()>) {
    let (main_thread, task) = MainThread::spawn();
    let env = Arc::new(ChannelEnv {
        session: Arc::new(SessionState::new()),
        app: config.app,
        timing: config.timing,
        main_thread,
        runtime: tokio::runtime::Handle::current(),
        ui: None,
    });
    (env, task)
}

/// Script context that records everything the bridge does to it
pub struct RecordingContext {
    id: ContextId,
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    exposed: Mutex<Option<(String, Arc<dyn HostInterface>)>>,
    reloads: AtomicUsize,
}

impl RecordingContext {
    pub fn new(id: u64) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: ContextId(id),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            exposed: Mutex::new(None),
            reloads: AtomicUsize::new(0),
        })
    }

    /// Wait for the next evaluated script
    pub async fn next_script(&self) -> String {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no script evaluated within 5s")
            .expect("script channel closed")
    }

    /// Scripts evaluated so far and not yet consumed
    pub fn scripts(&self) -> Vec<String> {
        let mut scripts = Vec::new();
        if let Ok(mut rx) = self.rx.try_lock() {
            while let Ok(script) = rx.try_recv() {
                scripts.push(script);
            }
        }
        scripts
    }

    /// Let spawned work run and flush the main thread queue
    pub async fn settle(&self, main_thread: &MainThread) {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        main_thread.run(|| ()).await.unwrap();
    }

    pub fn exposed_name(&self) -> Option<String> {
        self.exposed.lock().as_ref().map(|(name, _)| name.clone())
    }

    /// The interface page script would call into
    pub fn interface(&self) -> Arc<dyn HostInterface> {
        self.exposed
            .lock()
            .as_ref()
            .map(|(_, interface)| interface.clone())
            .expect("no interface exposed")
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    /// First quoted argument of a rendered call
    pub fn call_id(script: &str) -> String {
        let start = script.find("('").expect("call has no arguments") + 2;
        let len = script[start..].find('\'').expect("unterminated argument");
        script[start..start + len].to_string()
    }
}

impl ScriptContext for RecordingContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn evaluate(&self, script: &str) {
        let _ = self.tx.send(script.to_string());
    }

    fn expose(&self, name: &str, interface: Arc<dyn HostInterface>) {
        *self.exposed.lock() = Some((name.to_string(), interface));
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Container whose context list tests edit directly
#[derive(Default)]
pub struct RecordingContainer {
    contexts: Mutex<Vec<Arc<dyn ScriptContext>>>,
    scans: AtomicUsize,
}

impl RecordingContainer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, context: Arc<dyn ScriptContext>) {
        self.contexts.lock().push(context);
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextContainer for RecordingContainer {
    async fn contexts(&self) -> Vec<Arc<dyn ScriptContext>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().clone()
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub immersive: AtomicUsize,
}

impl ReaderUi for RecordingUi {
    fn enter_immersive_mode(&self) {
        self.immersive.fetch_add(1, Ordering::SeqCst);
    }
}
