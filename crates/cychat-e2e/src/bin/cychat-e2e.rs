//! cychat-e2e: Command-line tool for Cychat end-to-end key management.
//!
//! Keys live in a JSON key-value file (default `./cychat-e2e.json`), laid out
//! exactly like the browser client's local storage.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cychat_e2e::defaults::{ENV_STORE_PATH, STORE_PATH};
use cychat_e2e::{E2eEngine, EngineConfig, FileStore, NativeCrypto};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "cychat_e2e=info";

#[derive(Parser)]
#[command(name = "cychat-e2e")]
#[command(author, version, about = "End-to-end key management for Cychat")]
#[command(propagate_version = true)]
struct Cli {
    /// Key store file (overrides CYCHAT_E2E_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load or generate this device's identity key pair
    Init,

    /// Print this device's public key
    PublicKey,

    /// Show the fingerprint of a public key (default: this device's)
    Fingerprint {
        /// Portable public key to fingerprint
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Show key state without revealing secrets
    Status,

    /// Run an encrypt/decrypt round trip with throwaway keys
    SelfTest,

    /// Delete the identity, derived keys and all room keys
    Clear,

    /// Encrypt a direct message for a peer
    Encrypt {
        /// Recipient public key
        #[arg(short, long)]
        to: String,

        /// Message text
        #[arg(short, long)]
        message: String,
    },

    /// Decrypt a direct message from a peer
    Decrypt {
        /// Sender public key
        #[arg(short, long)]
        from: String,

        /// Envelope text
        #[arg(short, long)]
        envelope: String,
    },

    /// Room key operations
    #[command(subcommand)]
    Room(RoomCommands),
}

#[derive(Subcommand)]
enum RoomCommands {
    /// Generate and store a key for a new room
    Create {
        /// Room name
        room: String,
    },

    /// Wrap a room's key for a member
    Wrap {
        /// Room name
        room: String,

        /// Member public key
        #[arg(short, long)]
        recipient: String,
    },

    /// Unwrap and store a room key received from a member
    Accept {
        /// Room name
        room: String,

        /// Sender public key
        #[arg(short, long)]
        sender: String,

        /// Wrapped key envelope
        #[arg(short, long)]
        envelope: String,
    },

    /// Encrypt a message for a room
    Encrypt {
        /// Room name
        room: String,

        /// Message text
        #[arg(short, long)]
        message: String,
    },

    /// Decrypt a room message
    Decrypt {
        /// Room name
        room: String,

        /// Envelope text
        #[arg(short, long)]
        envelope: String,
    },

    /// Forget a room's key
    Clear {
        /// Room name
        room: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, logs go to stderr otherwise)
///   RUST_LOG    - standard env filter (default: "cychat_e2e=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("cychat-e2e.log");
        let file_appender = tracing_appender::rolling::never(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
        }
        Some(guard)
    } else {
        // stdout carries command output, so logs go to stderr
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store_path = cli
        .store
        .or_else(|| std::env::var(ENV_STORE_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(STORE_PATH));

    let store = FileStore::open(&store_path).await?;
    info!(store = %store_path.display(), "Key store opened");

    let engine = E2eEngine::with_provider(
        Arc::new(store),
        Arc::new(NativeCrypto::new()),
        EngineConfig::from_env(),
    );

    let output = match cli.command {
        Commands::Init => {
            let outcome = engine.initialize().await?;
            let fingerprint = engine.fingerprint(&outcome.public_key)?;
            serde_json::json!({
                "public_key": outcome.public_key,
                "is_new": outcome.is_new,
                "fingerprint": fingerprint,
            })
        }
        Commands::PublicKey => {
            let public_key = engine
                .identity()
                .stored_public_key()
                .await?
                .ok_or_else(|| anyhow::anyhow!("No identity; run `cychat-e2e init` first"))?;
            serde_json::json!({ "public_key": public_key })
        }
        Commands::Fingerprint { key } => {
            let key = match key {
                Some(key) => key,
                None => engine
                    .identity()
                    .stored_public_key()
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("No identity; pass --key or run init"))?,
            };
            serde_json::json!({ "fingerprint": engine.fingerprint(&key)? })
        }
        Commands::Status => serde_json::to_value(engine.debug_state().await?)?,
        Commands::SelfTest => {
            let passed = engine.self_test()?;
            if !passed {
                anyhow::bail!("Self test failed");
            }
            serde_json::json!({ "passed": passed })
        }
        Commands::Clear => {
            engine.clear_keys().await?;
            serde_json::json!({ "cleared": true })
        }
        Commands::Encrypt { to, message } => {
            let envelope = engine.encrypt_for(&message, &to, None).await?;
            serde_json::json!({ "envelope": envelope })
        }
        Commands::Decrypt { from, envelope } => {
            let message = engine.decrypt_from(&envelope, &from, None).await?;
            serde_json::json!({ "message": message })
        }
        Commands::Room(command) => run_room(&engine, command).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_room(engine: &E2eEngine, command: RoomCommands) -> anyhow::Result<serde_json::Value> {
    let output = match command {
        RoomCommands::Create { room } => {
            let room_key = engine.create_room_key(&room).await?;
            serde_json::json!({ "room": room, "room_key": room_key })
        }
        RoomCommands::Wrap { room, recipient } => {
            let envelope = engine.share_room_key(&room, &recipient).await?;
            serde_json::json!({ "room": room, "envelope": envelope })
        }
        RoomCommands::Accept {
            room,
            sender,
            envelope,
        } => {
            engine.accept_room_key(&room, &envelope, &sender).await?;
            serde_json::json!({ "room": room, "accepted": true })
        }
        RoomCommands::Encrypt { room, message } => {
            let envelope = engine.rooms().encrypt_for_room(&message, &room).await?;
            serde_json::json!({ "room": room, "envelope": envelope })
        }
        RoomCommands::Decrypt { room, envelope } => {
            let message = engine.rooms().decrypt_from_room(&envelope, &room).await?;
            serde_json::json!({ "room": room, "message": message })
        }
        RoomCommands::Clear { room } => {
            engine.rooms().clear_room_key(&room).await?;
            serde_json::json!({ "room": room, "cleared": true })
        }
    };
    Ok(output)
}
