// Framework bootstrap for the sync server runtime.

use crate::domain::WorldRules;
use crate::frameworks::config;
use crate::interface_adapters::net::{create_lobby_handler, spawn_lobby_serializer, ws_handler};
use crate::interface_adapters::protocol::MessageCodec;
use crate::interface_adapters::state::AppState;
use crate::use_cases::{LobbyRegistry, LobbySettings, MessageRouter};

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::{io::Result, sync::Arc};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state().await?;
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/lobbies", post(create_lobby_handler))
        .with_state(state);

    tracing::info!(%address, "listening");

    // Serve app and report errors rather than panicking
    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([127, 0, 0, 1], config::http_port()));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

async fn build_state() -> Result<Arc<AppState>> {
    let codec = Arc::new(MessageCodec::standard());
    let router = Arc::new(MessageRouter::standard());

    let tick_interval = config::tick_interval();
    let resync = config::resync_settings();
    tracing::debug!(
        tick_ms = tick_interval.as_millis(),
        retry_after_ticks = resync.retry_after_ticks,
        max_pending_ticks = resync.max_pending_ticks,
        "resync configured"
    );

    // This owns the set of active lobby world tasks.
    let lobby_registry = Arc::new(LobbyRegistry::new(
        LobbySettings {
            input_channel_capacity: config::INPUT_CHANNEL_CAPACITY,
            broadcast_capacity: config::COMMAND_BROADCAST_CAPACITY,
            tick_interval,
            start_delay: config::start_delay(),
            resync,
            latency: config::latency_settings(),
            rules: WorldRules {
                tick_period: tick_interval.as_secs_f32(),
                ..WorldRules::default()
            },
        },
        router.clone(),
    ));

    // The default lobby is always available for clients that do not name one.
    let default_lobby = lobby_registry
        .create_lobby(config::DEFAULT_LOBBY_ID.to_string(), Vec::new())
        .await
        .map_err(|e| std::io::Error::other(format!("failed to create default lobby: {e}")))?;
    spawn_lobby_serializer(&default_lobby, codec.clone());

    Ok(Arc::new(AppState {
        lobby_registry,
        default_lobby_id: default_lobby.lobby_id.clone(),
        codec,
        router,
    }))
}
