//! Concrete collaborators for the terminal: HTTP fetcher, stdin prompter,
//! tracing setup, and the [`Session`] that wires them into a context.

use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;

use shelf_core::{config, Catalog, CatalogStore, JsonCatalogStore, ShelfConfig};
use shelf_sync::{Confirmation, Fetcher, Prompter, StateHandle, SyncContext, SyncError, SystemClock};

use crate::GlobalArgs;

/// Filter used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Loaded config plus catalog store for one invocation.
pub struct Session {
    pub config: ShelfConfig,
    pub library: PathBuf,
    store: Arc<JsonCatalogStore>,
}

impl Session {
    /// Resolve the home directory and load `config.yaml`.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let (home, config) = match &global.home {
            Some(home) => {
                let cfg = config::load_at(home).with_context(|| {
                    format!("failed to load {}", config::config_path_at(home).display())
                })?;
                (home.clone(), cfg)
            }
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                (home, config::load().context("failed to load ~/.shelf/config.yaml")?)
            }
        };
        let library = config.library_dir(&home);
        Ok(Self {
            config,
            library,
            store: Arc::new(JsonCatalogStore::at(&home)),
        })
    }

    /// Snapshot of the persisted catalog without building a full context.
    pub fn catalog(&self) -> Result<Catalog> {
        self.store
            .load()
            .with_context(|| format!("failed to read {}", self.store.path().display()))
    }

    pub fn context(&self, global: &GlobalArgs) -> Result<SyncContext> {
        let state = StateHandle::load(self.store.clone())
            .with_context(|| format!("failed to read {}", self.store.path().display()))?;
        Ok(SyncContext::new(
            state,
            Arc::new(UreqFetcher::new()),
            Arc::new(TerminalPrompter {
                assume_yes: global.yes,
            }),
            Arc::new(SystemClock),
            self.config.clone(),
            self.library.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// HTTP fetcher
// ---------------------------------------------------------------------------

/// Blocking `ureq` agent driven from the blocking thread pool.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(120))
            .user_agent(concat!("shelf/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }
}

#[async_trait]
impl Fetcher for UreqFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || fetch_blocking(&agent, &url)).await?
    }
}

fn fetch_blocking(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, SyncError> {
    let network = |message: String| SyncError::Network {
        url: url.to_string(),
        message,
    };
    let response = agent.get(url).call().map_err(|err| match err {
        ureq::Error::Status(code, response) => {
            network(format!("HTTP {code} {}", response.status_text()))
        }
        ureq::Error::Transport(transport) => network(transport.to_string()),
    })?;

    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| network(format!("failed to read body: {e}")))?;
    tracing::debug!(url, bytes = body.len(), "fetched");
    Ok(body)
}

// ---------------------------------------------------------------------------
// Terminal prompter
// ---------------------------------------------------------------------------

/// Asks on stderr, reads `y`/`n` from stdin. End of input means no.
pub struct TerminalPrompter {
    pub assume_yes: bool,
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm(&self, question: Confirmation) -> bool {
        eprintln!("\n{}\n{}", question.title.bold(), question.body);
        if self.assume_yes {
            eprintln!("{} {}", "→".green(), question.affirm);
            return true;
        }
        let prompt = format!(
            "{} y = {}, n = {}: ",
            "?".yellow().bold(),
            question.affirm,
            question.decline
        );
        tokio::task::spawn_blocking(move || ask(&prompt))
            .await
            .unwrap_or(false)
    }

    fn notify(&self, message: &str, _duration: Duration) {
        eprintln!("{} {message}", "•".cyan());
    }
}

fn ask(prompt: &str) -> bool {
    let stdin = std::io::stdin();
    loop {
        eprint!("{prompt}");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "" | "n" | "no" => return false,
                _ => continue,
            },
        }
    }
}
