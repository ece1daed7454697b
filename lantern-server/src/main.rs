use anyhow::Result;
use clap::Parser;
use lantern_server::fanout::events::ServerEvent;
use lantern_server::{
    AppState, Dispatcher, IngestAuth, IngestServer, PerfCounters, RoomManager, ServerConfig,
    SubscriberAuth, SubscriptionManager, Throttler, create_router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lantern-server")]
#[command(about = "Lantern - Live log, metric, and trace aggregation server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Subscriber WebSocket/metrics port
    #[arg(long)]
    http_port: Option<u16>,

    /// Producer ingest port
    #[arg(long)]
    ingest_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::default()
    };
    config.apply_env();

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }
    if let Some(port) = args.ingest_port {
        config.server.ingest_port = port;
    }
    config.validate()?;

    // Initialize tracing based on config
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .init();
        }
    }

    info!("Starting Lantern Server v{}", env!("CARGO_PKG_VERSION"));
    lantern_server::metrics::init_metrics();

    // Core state
    let rooms = Arc::new(RoomManager::new(config.to_room_config()));
    let subs = Arc::new(SubscriptionManager::new(rooms.clone()));
    let counters = Arc::new(PerfCounters::new());
    let throttler = Arc::new(Throttler::new(
        subs.clone(),
        counters.clone(),
        Duration::from_millis(config.timing.entry_throttle_ms),
        Duration::from_millis(config.timing.watch_throttle_ms),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        rooms.clone(),
        subs.clone(),
        throttler,
        counters.clone(),
    ));

    // Newly created rooms are announced to every subscriber
    {
        let subs = subs.clone();
        rooms.set_on_created(Box::new(move |room| {
            subs.broadcast_all(ServerEvent::RoomCreated {
                room: room.to_string(),
            });
        }));
    }

    // Background tasks: 1 Hz counters, trace aging sweeper
    counters.clone().start_ticker();
    {
        let rooms = rooms.clone();
        let subs = subs.clone();
        let interval = Duration::from_millis(config.timing.trace_sweep_interval_ms.max(1_000));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = lantern_server::core::now_ms();
                for room in rooms.all_rooms() {
                    for summary in room.sweep_traces(now) {
                        subs.broadcast_trace(room.id(), summary);
                    }
                }
            }
        });
    }

    // Producer ingest listener
    let ingest = Arc::new(IngestServer::new(dispatcher, IngestAuth {
        token: config.auth.token.clone(),
        required: config.auth.required,
    }));
    let ingest_listener = lantern_server::ingest::session::bind(&config.ingest_addr()).await?;
    info!("Ingest (TCP) listening on {}", config.ingest_addr());
    tokio::spawn(async move {
        if let Err(e) = ingest.run(ingest_listener).await {
            tracing::error!("Ingest listener failed: {}", e);
        }
    });

    // Subscriber HTTP/WebSocket surface
    let app = create_router(AppState {
        rooms,
        subs,
        counters,
        auth: SubscriberAuth {
            token: config.auth.token.clone(),
            required: config.auth.required,
        },
    });
    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;
    info!("Subscriber channel (WebSocket) on {}", config.http_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Lantern Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
