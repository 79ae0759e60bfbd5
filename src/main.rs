//! LingVis bridge demo
//!
//! Drives the bridge against an in-process loopback page that answers the
//! `lingVisSdk.*` calls the way the script SDK would.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lingvis_bridge::channel::{script, ContextId, HostInterface, ScriptContext};
use lingvis_bridge::session::{ChangeLanguageParams, LanguageHooks};
use lingvis_bridge::{Bridge, BridgeConfig, MainThread, Publication, Result};

/// Settings the loopback page keeps for its signed-in user
#[derive(Debug, Clone)]
struct PageAccount {
    email: String,
    l2: String,
    l1: String,
    level: String,
}

/// Page script stand-in that answers every call synchronously
struct LoopbackPage {
    id: ContextId,
    interface: Mutex<Option<Arc<dyn HostInterface>>>,
    account: Arc<Mutex<PageAccount>>,
}

impl LoopbackPage {
    fn new(id: u64, account: Arc<Mutex<PageAccount>>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId(id),
            interface: Mutex::new(None),
            account,
        })
    }

    fn reply(&self, method: &str, args: String) {
        let interface = self.interface.lock().clone();
        if let Some(interface) = interface {
            interface.dispatch(method, &args);
        }
    }
}

impl ScriptContext for LoopbackPage {
    fn id(&self) -> ContextId {
        self.id
    }

    fn evaluate(&self, source: &str) {
        let Some((method, args)) = parse_call(source) else {
            tracing::warn!(context_id = %self.id, source, "Page could not parse call");
            return;
        };
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let id = arg(0);

        match method.as_str() {
            script::SIGN_IN if !id.is_empty() => {
                self.account.lock().email = arg(2);
                self.reply("token", format!("{}|token-for-{}|", id, arg(2)));
            }
            script::SIGN_IN => {
                let token = arg(1);
                if token.is_empty() {
                    self.reply("token", "||no stored session".to_string());
                } else {
                    self.reply("log", format!("signed in for book '{}'", arg(5)));
                }
            }
            script::GET_SETTINGS => {
                let account = self.account.lock().clone();
                let payload = format!(
                    "{},{},{},{}",
                    account.l2, account.l1, account.level, account.email
                );
                self.reply("callback", format!("{}|{}|", id, payload));
            }
            script::UPDATE_SETTINGS => {
                {
                    let mut account = self.account.lock();
                    if !arg(1).is_empty() {
                        account.l2 = arg(1);
                    }
                    if !arg(2).is_empty() {
                        account.l1 = arg(2);
                    }
                    if !arg(3).is_empty() {
                        account.level = arg(3);
                    }
                }
                self.reply("callback", format!("{}||", id));
            }
            script::SIGN_OUT => {
                self.account.lock().email.clear();
                self.reply("callback", format!("{}||", id));
            }
            other => {
                self.reply("callback", format!("{}||unknown method {}", id, other));
            }
        }
    }

    fn expose(&self, _name: &str, interface: Arc<dyn HostInterface>) {
        *self.interface.lock() = Some(interface);
    }

    fn reload(&self) {
        self.reply("ready", String::new());
    }
}

/// Split `lingVisSdk.method('a', 'b', true)` into its method and arguments
fn parse_call(source: &str) -> Option<(String, Vec<String>)> {
    let rest = source.strip_prefix(script::SCRIPT_OBJECT)?.strip_prefix('.')?;
    let open = rest.find('(')?;
    let body = rest[open + 1..].strip_suffix(')')?;

    let mut args = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next()? {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            'u' => {
                                let hex: String = chars.by_ref().take(4).collect();
                                value.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
                            }
                            other => value.push(other),
                        },
                        '\'' => break,
                        c => value.push(c),
                    }
                }
                args.push(value);
            }
            ',' | ' ' => {}
            c => {
                let mut bare = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next == ',' {
                        break;
                    }
                    bare.push(next);
                    chars.next();
                }
                args.push(bare.trim().to_string());
            }
        }
    }
    Some((rest[..open].to_string(), args))
}

/// Logs and accepts every proposed language change
struct LoggingHooks;

impl LanguageHooks for LoggingHooks {
    fn will_change_language(&self, publication: &Publication) -> ChangeLanguageParams {
        tracing::info!(title = %publication.title, "Accepting language change");
        ChangeLanguageParams::default()
    }

    fn did_change_language(&self, result: &Result<String>) {
        tracing::info!(ok = result.is_ok(), "Language change finished");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "lingvis_bridge=debug,lingvis=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = BridgeConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        BridgeConfig::new("lingvis-demo", "demo/0.1")
    });

    tracing::info!("Starting LingVis bridge demo v{}", env!("CARGO_PKG_VERSION"));

    let (main_thread, main_loop) = MainThread::spawn();
    let bridge = Bridge::new(config, main_thread.clone());

    let account = Arc::new(Mutex::new(PageAccount {
        email: String::new(),
        l2: "sv".to_string(),
        l1: "en".to_string(),
        level: "1".to_string(),
    }));
    bridge
        .attach_primary(LoopbackPage::new(0, account.clone()))
        .context("attaching primary page")?;
    bridge.session().set_current_language("sv");

    let token = bridge
        .sign_in("reader@example.com", "correct horse", false)
        .await
        .context("signing in")?;
    tracing::info!(%token, "Signed in");

    let settings = bridge.settings().await.context("reading settings")?;
    tracing::info!(?settings, "Current settings");

    bridge
        .update_settings("", "", "3")
        .await
        .context("updating level")?;

    let publication = Publication::new(
        "Der Process",
        Some("urn:isbn:9783150093197"),
        vec!["de".to_string()],
    );
    let mut session = bridge.open_publication(publication, None, Some(Arc::new(LoggingHooks)));
    session.registry().created(LoopbackPage::new(1, account.clone()));
    let outcome = session.ready().await.context("binding publication")?;
    tracing::info!(?outcome, language = %bridge.session().current_language(), "Publication bound");

    let settings = bridge.settings().await.context("reading settings")?;
    tracing::info!(?settings, "Settings after switch");

    bridge.sign_out().await.context("signing out")?;
    drop(session);

    // Let queued page work finish before the loop goes away
    main_thread.run(|| ()).await?;
    drop(bridge);
    drop(main_thread);
    main_loop.abort();

    tracing::info!("Demo finished");
    Ok(())
}
