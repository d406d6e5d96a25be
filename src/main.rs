#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use rsmsl::store::FileStore;
use rsmsl::transport::HttpTransport;
use rsmsl::utils::ensure_parent_dir;
use rsmsl::{ManifestCapabilities, MslClient, MslConfig};

use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "rsmsl", version, disable_version_flag = true, about = "rsmsl CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// YAML client configuration.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Directory holding the persisted MSL state.
    #[arg(short = 's', long = "state-dir", default_value = ".")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Capability switches for the manifest profile list.
#[derive(Args)]
struct CapabilityArgs {
    #[arg(long, action = ArgAction::SetTrue)]
    hevc: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    hdr: bool,
    #[arg(long = "dolby-vision", action = ArgAction::SetTrue)]
    dolby_vision: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    vp9: bool,
    #[arg(long = "dolby-audio", action = ArgAction::SetTrue)]
    dolby_audio: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    hdcp: bool,
}

impl From<&CapabilityArgs> for ManifestCapabilities {
    fn from(args: &CapabilityArgs) -> Self {
        ManifestCapabilities {
            hevc: args.hevc,
            hdr: args.hdr,
            dolby_vision: args.dolby_vision,
            vp9: args.vp9,
            dolby_audio: args.dolby_audio,
            hdcp_engaged: args.hdcp,
        }
    }
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a key exchange and persist the new master token.
    Handshake,
    /// Fetch a manifest and write it as a DASH MPD.
    ///
    /// Prints the MPD to stdout unless an output path is given.
    Manifest {
        viewable_id: u64,
        #[command(flatten)]
        capabilities: CapabilityArgs,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Exchange a base64 Widevine challenge for a base64 license.
    License {
        challenge: String,
        session_id: String,
    },
    /// Show the persisted master token.
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("rsmsl version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    let Some(command) = cli.command else {
        error!("No command given, see --help");
        return Ok(());
    };
    let config_path = cli
        .config
        .as_deref()
        .context("--config is required for this command")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;
    runtime.block_on(run(command, config_path, &cli.state_dir))
}

async fn run(command: Commands, config_path: &Path, state_dir: &Path) -> anyhow::Result<()> {
    let config = MslConfig::from_path(config_path).context("Failed to load config")?;
    if config.effective_backend() != rsmsl::crypto::Backend::Software {
        warn!("Hardware DRM is not available from the CLI");
    }
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;
    let store = Arc::new(FileStore::new(state_dir));
    let transport = HttpTransport::new()?;
    let client = MslClient::new(config, transport, store, None)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match command {
        Commands::Handshake => {
            client.perform_handshake(&cancel).await?;
            print_status(&client).await?;
        }
        Commands::Manifest {
            viewable_id,
            capabilities,
            output,
        } => {
            let mpd = client
                .request_manifest(viewable_id, &(&capabilities).into(), &cancel)
                .await?;
            match output {
                Some(path) => {
                    ensure_parent_dir(&path)?;
                    std::fs::write(&path, mpd)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("[+] Wrote MPD to {}", path.display());
                }
                None => println!("{}", mpd),
            }
        }
        Commands::License {
            challenge,
            session_id,
        } => {
            let license = client
                .request_license(&challenge, &session_id, &cancel)
                .await?;
            println!("{}", license);
        }
        Commands::Status => print_status(&client).await?,
    }
    Ok(())
}

async fn print_status(client: &MslClient<HttpTransport>) -> anyhow::Result<()> {
    let status = client.status().await?;
    info!("Backend: {}", status.backend);
    match (status.sequence_number, status.expiration, status.remaining_secs) {
        (Some(sequence), Some(expiration), Some(remaining)) => {
            info!("Master token sequence: {}", sequence);
            info!("Expires: {} ({}s remaining)", expiration, remaining);
        }
        _ => info!("No master token, the next request will handshake"),
    }
    Ok(())
}
