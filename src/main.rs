//! streamhost - remote-play session supervisor
//!
//! Runs the streaming client under supervision and prints every outbound
//! event as one JSON object per line on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser as ClapParser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamhost::catalog::{CatalogStore, MemoryCatalog};
use streamhost::config::{default_config_path, SupervisorConfig};
use streamhost::events::{DisconnectOrigin, EventPayload};
use streamhost::geometry::{HostGeometry, HostWindow};
use streamhost::launch::{resolve_executable, Launch, LaunchProfile};
use streamhost::presence::LogPresence;
use streamhost::supervisor::{Collaborators, Supervisor};

/// streamhost - remote-play session supervisor
#[derive(ClapParser, Debug)]
#[command(name = "streamhost", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "STREAMHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Streaming client executable (overrides config and search)
    #[arg(long, global = true)]
    client: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ProfileArgs {
    /// Remote device address
    #[arg(long)]
    host: Option<String>,

    /// Registration key
    #[arg(long, env = "STREAMHOST_REGIST_KEY")]
    regist_key: Option<String>,

    /// Morning (session) token
    #[arg(long)]
    morning: Option<String>,

    /// Client profile name
    #[arg(long)]
    profile: Option<String>,

    /// Run the client windowed
    #[arg(long)]
    windowed: bool,
}

impl ProfileArgs {
    /// Layer the flags over the configured profile.
    fn apply(self, base: &LaunchProfile) -> LaunchProfile {
        let mut profile = base.clone();
        if let Some(host) = self.host {
            profile.host = host;
        }
        if let Some(key) = self.regist_key {
            profile.registration_key = key;
        }
        if let Some(morning) = self.morning {
            profile.morning = morning;
        }
        if let Some(name) = self.profile {
            profile.profile = name;
        }
        if self.windowed {
            profile.fullscreen = false;
        }
        profile
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a supervised session and stream its events as JSON lines
    Stream {
        /// Tracking key (catalog entry id) to credit playtime to
        #[arg(long, default_value = "default")]
        key: String,

        /// Host window handle for the embedding helper
        #[arg(long, default_value = "0")]
        parent: String,

        #[command(flatten)]
        launch: ProfileArgs,
    },

    /// Launch the client in GUI-only mode and exit
    Gui,

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "streamhost=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SupervisorConfig> {
    let Some(path) = path.or_else(default_config_path) else {
        return Ok(SupervisorConfig::default());
    };
    let config = SupervisorConfig::load(&path)?;
    if config.is_none() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
    }
    Ok(config.unwrap_or_default())
}

fn client_executable(config: &SupervisorConfig, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let configured = flag.or_else(|| config.client.executable.clone());
    resolve_executable(configured.as_deref(), &config.client.search_paths)
        .context("streaming client not found; set [client] executable or pass --client")
}

fn open_catalog(config: &SupervisorConfig) -> anyhow::Result<Arc<dyn CatalogStore>> {
    let catalog = match &config.catalog.path {
        Some(path) => MemoryCatalog::open(path)
            .with_context(|| format!("failed to open catalog {}", path.display()))?,
        None => MemoryCatalog::new(),
    };
    Ok(Arc::new(catalog))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config)?;
    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Gui => {
            let exe = client_executable(&config, cli.client)?;
            run_gui(config, exe).await
        }
        Commands::Stream {
            key,
            parent,
            launch,
        } => {
            let exe = client_executable(&config, cli.client)?;
            let profile = launch.apply(&config.client.profile);
            if profile.to_args().is_empty() {
                bail!("no connection details; pass --host or set [client.profile] in the config");
            }
            let launch = Launch::from_profile(exe, &profile);
            run_stream(config, key, parent, launch).await
        }
    }
}

async fn run_gui(config: SupervisorConfig, exe: PathBuf) -> anyhow::Result<()> {
    let supervisor = Supervisor::spawn(
        config.clone(),
        Collaborators::new(open_catalog(&config)?, Arc::new(LogPresence), headless_host("0")),
    );
    supervisor
        .start("gui", Launch::new(exe, Vec::new()))
        .await?;
    tracing::info!("client launched in GUI mode");
    Ok(())
}

fn headless_host(handle: &str) -> HostWindow {
    HostWindow {
        handle: handle.to_string(),
        geometry: HostGeometry::default(),
    }
}

async fn run_stream(
    config: SupervisorConfig,
    key: String,
    parent: String,
    launch: Launch,
) -> anyhow::Result<()> {
    let catalog = open_catalog(&config)?;
    let supervisor = Supervisor::spawn(
        config,
        Collaborators::new(catalog, Arc::new(LogPresence), headless_host(&parent)),
    );
    let mut events = supervisor.events();
    supervisor.start(key.as_str(), launch).await?;

    let printer = async {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event printer fell behind");
                    continue;
                }
                Err(RecvError::Closed) => return anyhow::Ok(()),
            };
            println!("{}", serde_json::to_string(&event)?);

            let process_ended = matches!(
                &event.payload,
                EventPayload::Disconnected(d) if d.origin == DisconnectOrigin::Process
            );
            // A pending reconnect keeps the session registered.
            if process_ended && event.tracking_key == key {
                let sessions = supervisor.sessions().await?;
                if !sessions.iter().any(|s| s.key == key) {
                    return anyhow::Ok(());
                }
            }
        }
    };

    tokio::select! {
        result = printer => {
            result?;
            tracing::info!(key, "session ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
            supervisor.stop(key.as_str()).await?;
        }
    }

    supervisor.shutdown().await?;
    Ok(())
}
