//! crawd binary: wire the coordinator, gateway, chat sources, and the
//! HTTP/overlay server together and run until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use crawd::chat::multiplexer::ChatSources;
use crawd::config::CoordinatorConfig;
use crawd::coordinator::autonomy::AutonomyMode;
use crawd::coordinator::Coordinator;
use crawd::gateway::{GatewayConfig, OneShotGateway, PersistentGateway, TriggerAgent};
use crawd::overlay::bus::OverlayBus;
use crawd::overlay::gate::SpeechGate;
use crawd::server::{ApiServer, AppState};
use crawd::tools::{LateBoundInvoker, ToolSurface};

#[derive(Parser, Debug)]
#[command(name = "crawd", version, about = "Livestream agent coordinator")]
struct Args {
    /// Bind address for the HTTP and overlay server.
    #[arg(long, env = "CRAWD_BIND", default_value = "127.0.0.1:3001")]
    bind: SocketAddr,

    /// WebSocket URL of the agent gateway.
    #[arg(long, env = "CRAWD_GATEWAY_URL", default_value = "ws://127.0.0.1:18789")]
    gateway_url: String,

    /// Bearer token for the gateway handshake.
    #[arg(long, env = "CRAWD_GATEWAY_TOKEN")]
    gateway_token: Option<String>,

    /// Session key stamped onto every agent request.
    #[arg(long, env = "CRAWD_SESSION_KEY", default_value = "main")]
    session_key: String,

    /// Open a fresh gateway connection per turn instead of keeping one.
    #[arg(long)]
    one_shot: bool,

    /// Autonomy mode at startup.
    #[arg(long, value_enum, default_value_t = ModeArg::Vibe)]
    mode: ModeArg,

    /// Chat batch window, seconds.
    #[arg(long, default_value_t = 20)]
    batch_window_secs: u64,

    /// Inactivity before idle, seconds.
    #[arg(long, default_value_t = 180)]
    idle_after_secs: u64,

    /// Idle before sleep, seconds.
    #[arg(long, default_value_t = 180)]
    sleep_after_idle_secs: u64,

    /// Interval between vibe prompts, seconds.
    #[arg(long, default_value_t = 30)]
    vibe_interval_secs: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Vibe,
    Plan,
    None,
}

impl From<ModeArg> for AutonomyMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Vibe => AutonomyMode::Vibe,
            ModeArg::Plan => AutonomyMode::Plan,
            ModeArg::None => AutonomyMode::None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crawd=info")),
        )
        .init();

    let args = Args::parse();

    let config = CoordinatorConfig {
        mode: args.mode.into(),
        batch_window_ms: args.batch_window_secs * 1_000,
        idle_after_ms: args.idle_after_secs * 1_000,
        sleep_after_idle_ms: args.sleep_after_idle_secs * 1_000,
        vibe_interval_ms: args.vibe_interval_secs * 1_000,
        ..CoordinatorConfig::default()
    };

    let mut gateway_config = GatewayConfig::new(&args.gateway_url);
    gateway_config.session_key = args.session_key.clone();
    gateway_config.token = args.gateway_token.map(SecretString::from);

    let bus = OverlayBus::new();
    let invoker = Arc::new(LateBoundInvoker::new());
    let gateway: Arc<dyn TriggerAgent> = if args.one_shot {
        Arc::new(OneShotGateway::new(gateway_config))
    } else {
        Arc::new(PersistentGateway::spawn(
            gateway_config,
            Some(invoker.clone()),
        ))
    };

    let coordinator = Coordinator::spawn(config, gateway, bus.clone());
    let gate = SpeechGate::new(bus.clone(), coordinator.clone());
    invoker.bind(Arc::new(ToolSurface::new(gate.clone(), coordinator.clone())));

    // Chat fan-in: adapters are registered here as platforms come online.
    let (chat_tx, mut chat_rx) = tokio::sync::mpsc::channel(256);
    let sources = Arc::new(ChatSources::new(chat_tx));
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            while let Some(msg) = chat_rx.recv().await {
                coordinator.ingest(msg).await;
            }
        });
    }
    sources.connect_all().await;

    let mut server = ApiServer::new(args.bind);
    server
        .start(AppState {
            coordinator: coordinator.clone(),
            gate,
            bus,
            sources: Arc::clone(&sources),
        })
        .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    coordinator.stop().await;
    sources.disconnect_all().await;
    server.shutdown().await;
    Ok(())
}
