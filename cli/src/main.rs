// dimy: command-line front end for encounter nodes and the exposure backend
//
// A node broadcasts shares on a UDP port ("location"); nodes on the same port
// meet. Commands typed on stdin move the node, report it positive or query
// the backend.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dimy_core::bloom::BloomParams;
use dimy_core::node::NodeEvent;
use dimy_core::store::{MemoryStorage, SledStorage, StorageBackend};
use dimy_core::{
    BackendServer, BackendStore, Location, NodeHandle, NodeRuntime, PositiveFilterStore,
    RemoteBackend, UdpTransport,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "dimy")]
#[command(about = "DIMY: Did I Meet You? Privacy-preserving encounter discovery", long_about = None)]
#[command(version)]
struct Cli {
    /// Use this config file instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an encounter node
    Node {
        /// UDP port to broadcast and listen on
        #[arg(short, long)]
        location: Option<u16>,
        /// Backend address for uploads and queries
        #[arg(short, long)]
        backend: Option<SocketAddr>,
        /// Run without a backend
        #[arg(long, conflicts_with = "backend")]
        offline: bool,
    },
    /// Start the positive-filter backend
    Backend {
        #[arg(short, long)]
        port: Option<u16>,
        /// Sled directory; overrides the configured storage path
        #[arg(short, long)]
        storage: Option<PathBuf>,
        /// Keep filters in memory only; they are lost when the backend stops
        #[arg(long, conflicts_with = "storage")]
        memory: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Suggest bloom filter parameters for an expected load
    Sizing {
        /// Encounters expected across the retained windows
        #[arg(short, long)]
        expected: usize,
        /// Target false-positive rate
        #[arg(short, long, default_value = "0.000001")]
        fpr: f64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Node {
            location,
            backend,
            offline,
        } => cmd_node(config, location, backend, offline).await,
        Commands::Backend {
            port,
            storage,
            memory,
        } => cmd_backend(config, port, storage, memory).await,
        Commands::Config { action } => cmd_config(config, action),
        Commands::Sizing { expected, fpr } => cmd_sizing(expected, fpr),
    }
}

async fn cmd_node(
    config: config::Config,
    location: Option<u16>,
    backend: Option<SocketAddr>,
    offline: bool,
) -> Result<()> {
    let location = Location(location.unwrap_or(config.location));
    let backend_addr = if offline {
        None
    } else {
        backend.or(config.backend_addr)
    };

    let transport = UdpTransport::bind(location, config.broadcast_ip)
        .await
        .context("Failed to bind UDP transport")?;
    let backend: Option<Arc<dyn BackendStore>> = backend_addr
        .map(|addr| Arc::new(RemoteBackend::new(addr)) as Arc<dyn BackendStore>);

    let runtime = NodeRuntime::new(config.protocol.clone(), Arc::new(transport), backend)
        .context("Failed to start node")?;
    let (handle, task) = runtime.spawn();

    println!("{}", "DIMY node started".bold());
    println!();
    println!("  Location: {}", location.to_string().bright_cyan());
    println!(
        "  Epoch:    {}s, {}-of-{} shares",
        config.protocol.epoch_duration().as_secs(),
        config.protocol.share_threshold,
        config.protocol.share_count
    );
    match backend_addr {
        Some(addr) => println!("  Backend:  {}", addr.to_string().bright_cyan()),
        None => println!("  Backend:  {}", "(offline)".dimmed()),
    }
    println!();
    print_node_help();

    tokio::spawn(print_events(handle.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match run_node_command(&handle, line.trim()).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => println!("{} {:#}", "✗".red(), e),
        }
    }

    // stdin closed or `quit`: either way the node winds down
    let _ = handle.stop().await;
    task.await
        .context("Node task panicked")?
        .context("Node stopped with an error")?;
    println!("{}", "Node stopped.".dimmed());
    Ok(())
}

fn print_node_help() {
    println!("{}", "Commands:".bold());
    println!("  {} <port>        move to another location", "move".bright_green());
    println!("  {} [seconds]  report positive, keep uploading", "positive".bright_green());
    println!("  {}               query the backend now", "query".bright_green());
    println!("  {}              show engine state", "status".bright_green());
    println!("  {}                stop the node", "quit".bright_green());
    println!();
}

/// Returns true when the node should stop
async fn run_node_command(handle: &NodeHandle, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(false);
    };

    match command {
        "move" => {
            let port: u16 = parts
                .next()
                .context("Usage: move <port>")?
                .parse()
                .context("Invalid port number")?;
            handle.move_to(Location(port)).await?;
        }
        "positive" => {
            let seconds: u64 = match parts.next() {
                Some(value) => value.parse().context("Invalid number of seconds")?,
                None => 0,
            };
            handle.report_positive(Duration::from_secs(seconds)).await?;
        }
        "query" => handle.query().await?,
        "status" => print_status(handle),
        "help" => print_node_help(),
        "quit" | "stop" | "exit" => return Ok(true),
        other => bail!("Unknown command: {} (try 'help')", other),
    }
    Ok(false)
}

fn print_status(handle: &NodeHandle) {
    let stats = handle.engine().stats();
    println!("{}", "Node Status".bold());
    match (stats.identity_version, stats.own_tag) {
        (Some(version), Some(tag)) => {
            println!("  Identity:   v{} ({})", version, tag.short().bright_cyan());
        }
        _ => println!("  Identity:   {}", "(not yet rotated)".dimmed()),
    }
    println!("  Shares left: {}", stats.remaining_shares);
    println!("  Peers:      {}", stats.peer_buffers);
    println!(
        "  Window:     #{} ({} encounters)",
        stats.window_id, stats.encounters_in_window
    );
    println!(
        "  Shares:     {} received, {} duplicate, {} reconstructed, {} rejected",
        stats.aggregator.received,
        stats.aggregator.duplicates,
        stats.aggregator.reconstructed,
        stats.aggregator.rejected
    );
}

async fn print_events(mut events: broadcast::Receiver<NodeEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                println!("{}", format!("({} events skipped)", missed).dimmed());
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            NodeEvent::Rotated { version } => {
                println!("{} New ephemeral identity v{}", "↻".bright_blue(), version)
            }
            NodeEvent::Encounter(enc_id) => {
                println!("{} Encounter {}", "★".bright_yellow(), enc_id.to_string().bright_cyan())
            }
            NodeEvent::WindowRolled { window_id } => {
                println!("{} Window #{} started", "▸".dimmed(), window_id)
            }
            NodeEvent::Uploaded { window_id } => {
                println!("{} Uploaded filter for window #{}", "✓".green(), window_id)
            }
            NodeEvent::Verdict(verdict) if verdict.matched => println!(
                "{} {} ({} of {} positive filters)",
                "⚠".bright_red(),
                "Possible exposure".bright_red().bold(),
                verdict.match_count(),
                verdict.per_filter.len()
            ),
            NodeEvent::Verdict(verdict) => println!(
                "{} No exposure ({} positive filters checked)",
                "✓".green(),
                verdict.per_filter.len()
            ),
            NodeEvent::Moved(location) => {
                println!("{} Moved to {}", "→".bright_green(), location.to_string().bright_cyan())
            }
            NodeEvent::BackendError(message) => {
                println!("{} Backend: {}", "✗".red(), message)
            }
        }
    }
}

async fn cmd_backend(
    config: config::Config,
    port: Option<u16>,
    storage: Option<PathBuf>,
    memory: bool,
) -> Result<()> {
    let port = port.unwrap_or(config.backend_port);

    let storage_path = resolve_storage_path(&config, storage, memory)?;
    let backend: Arc<dyn StorageBackend> = match &storage_path {
        Some(path) => Arc::new(SledStorage::open(path).context("Failed to open filter storage")?),
        None => Arc::new(MemoryStorage::new()),
    };
    let store = Arc::new(
        PositiveFilterStore::new(backend, config.protocol.bloom, config.protocol.match_policy)
            .context("Failed to open positive filter store")?,
    );

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind backend port {}", port))?;

    println!("{}", "DIMY backend started".bold());
    println!();
    println!("  Listening: {}", listener.local_addr()?.to_string().bright_cyan());
    match &storage_path {
        Some(path) => println!("  Storage:   {}", path.display().to_string().bright_cyan()),
        None => println!("  Storage:   {}", "(memory)".dimmed()),
    }
    println!("  Filters:   {}", store.len()?);
    println!(
        "  Shape:     m={} k={}",
        store.params().size_slots,
        store.params().hash_count
    );
    println!("  Policy:    {:?}", store.policy());
    println!();

    let server = BackendServer::new(store);
    tokio::select! {
        result = server.serve(listener) => result.context("Backend server failed")?,
        _ = tokio::signal::ctrl_c() => println!("{}", "Backend stopped.".dimmed()),
    }
    Ok(())
}

/// Sled directory for the backend, `None` for in-memory storage
///
/// Persistent by default: the explicit path, then the configured one, then
/// `<data dir>/filters`.
fn resolve_storage_path(
    config: &config::Config,
    storage: Option<PathBuf>,
    memory: bool,
) -> Result<Option<PathBuf>> {
    if memory {
        return Ok(None);
    }
    match storage.or_else(|| config.storage_path.as_ref().map(PathBuf::from)) {
        Some(path) => Ok(Some(path)),
        None => Ok(Some(config::Config::data_dir()?.join("filters"))),
    }
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => println!("{}", config.path().display()),
    }

    Ok(())
}

fn cmd_sizing(expected: usize, fpr: f64) -> Result<()> {
    if expected == 0 || !(fpr > 0.0 && fpr < 1.0) {
        bail!("Expected count must be positive and the rate within (0, 1)");
    }
    let params = BloomParams::optimal(expected, fpr);
    params.validate().context("No valid filter shape for that load")?;

    println!("{}", "Bloom Sizing".bold());
    println!("  bloom_size:   {} ({} KB)", params.size_slots, params.size_slots / 8 / 1024);
    println!("  bloom_hashes: {}", params.hash_count);
    println!("  Expected FPR: {:.3e}", params.false_positive_rate(expected));
    Ok(())
}
