use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use shore_client_core::config::ClientConfig;
use shore_client_core::media::SyntheticDevices;
use shore_client_core::negotiation::RtcNegotiatorFactory;
use shore_client_core::signaling::{SignalingClient, bridge_signals};
use shore_client_core::telemetry::logging::{self, LogConfig, LogLevel};
use shore_client_core::{CallState, ControllerConfig, ControllerHandle, SessionController};
use shore_proto::{CallKind, Identity, PeerProfile};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "shore")]
#[command(about = "Peer-to-peer audio/video calls over a shore relay")]
struct Cli {
    /// Identity to register with the relay
    #[arg(long, short = 'u', env = "SHORE_USER_ID")]
    user: Option<String>,

    /// Name shown to the people you call
    #[arg(long, env = "SHORE_DISPLAY_NAME")]
    name: Option<String>,

    /// Relay base URL (e.g., ws://localhost:8080)
    #[arg(long, env = "SHORE_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Call an identity and stay on the line until either side hangs up
    Call {
        peer: String,
        #[arg(long)]
        video: bool,
    },
    /// Wait for incoming calls
    Listen {
        #[arg(long)]
        auto_accept: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    };
    if let Err(err) = logging::init(&log_config) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(2);
    }

    if let Err(err) = run(cli).await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env();
    if let Some(relay_url) = cli.relay_url {
        config.relay_url = relay_url;
    }
    let user = cli
        .user
        .or(config.user_id.clone())
        .ok_or_else(|| anyhow!("no identity; pass --user or set SHORE_USER_ID"))?;
    let mut profile = PeerProfile::new(user.as_str());
    if let Some(name) = cli.name.or(config.display_name.clone()) {
        profile = profile.with_display_name(name);
    }

    let controller_config =
        ControllerConfig::new(profile.clone()).with_ring_timeout(config.ring_timeout);
    if let Mode::Call { peer, .. } = &cli.command {
        controller_config.check_callee(&Identity::new(peer.as_str()))?;
    }

    let signaling = SignalingClient::connect(&config.relay_url, &profile.id)
        .await
        .with_context(|| format!("connecting to relay {}", config.relay_url))?;
    let incoming = signaling
        .take_incoming()
        .ok_or_else(|| anyhow!("signaling stream already taken"))?;

    let (controller, handle) = SessionController::new(
        controller_config,
        Arc::new(SyntheticDevices::new(profile.id.as_str())),
        Arc::new(RtcNegotiatorFactory::new(config.effective_ice_servers())),
        signaling.clone(),
    );
    let bridge = bridge_signals(incoming, handle.input_sender());
    let controller_task = tokio::spawn(controller.run());
    info!(identity = %profile.id, relay = %config.relay_url, "ready");

    let auto_accept = matches!(cli.command, Mode::Listen { auto_accept: true });
    let watcher = tokio::spawn(watch_calls(handle.clone(), auto_accept));

    match cli.command {
        Mode::Call { peer, video } => {
            let kind = if video { CallKind::Video } else { CallKind::Audio };
            let started_at = handle.snapshot().generation;
            handle.start_call(PeerProfile::new(peer), kind).await?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("hanging up"),
                result = wait_for_hangup(&handle, started_at) => result?,
            }
        }
        Mode::Listen { .. } => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    if let Err(err) = handle.shutdown().await {
        warn!(error = %err, "controller already stopped");
    }
    let _ = controller_task.await;
    watcher.abort();
    bridge.abort();
    signaling.close();
    Ok(())
}

// Starting the call bumps the generation once; tearing it down bumps it again.
async fn wait_for_hangup(handle: &ControllerHandle, started_at: u64) -> Result<()> {
    handle
        .wait_for(|s| s.state == CallState::Idle && s.generation >= started_at + 2)
        .await?;
    Ok(())
}

async fn watch_calls(handle: ControllerHandle, auto_accept: bool) {
    let mut snapshots = handle.subscribe();
    let mut last_state = CallState::Idle;
    let mut last_online: Vec<Identity> = Vec::new();
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.online_users != last_online {
            let names: Vec<&str> = snapshot.online_users.iter().map(Identity::as_str).collect();
            println!("online: {}", names.join(", "));
            last_online = snapshot.online_users.clone();
        }
        if snapshot.state == last_state {
            continue;
        }
        last_state = snapshot.state;
        match (&snapshot.peer, snapshot.kind) {
            (Some(peer), Some(kind)) => println!("{} ({kind} call with {})", snapshot.state, peer.label()),
            _ => println!("{}", snapshot.state),
        }
        if auto_accept && snapshot.state == CallState::Ringing {
            if let Err(err) = handle.accept().await {
                warn!(error = %err, "auto-accept failed");
            }
        }
    }
}
