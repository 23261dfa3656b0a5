use clap::Parser;
use gridmq::{Broker, BrokerConfig, LocalGrid, Result, StompServer};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gridmq")]
#[command(about = "Grid-backed message broker with a STOMP-style wire adapter")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value = "61613")]
    port: u16,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = "1000")]
    max_connections: usize,

    /// Largest accepted wire frame in bytes
    #[arg(long, default_value = "1048576")]
    max_frame_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    info!("Starting GridMQ broker on {}:{}", args.host, args.port);
    info!("Max connections: {}", args.max_connections);
    info!("Max frame size: {} bytes", args.max_frame_size);

    let config = BrokerConfig {
        host: args.host,
        port: args.port,
        max_connections: args.max_connections,
        max_frame_size: args.max_frame_size,
    };

    // The bundled server embeds a single-node grid; a clustered deployment
    // would hand Broker a connector to the external grid instead.
    let grid = Arc::new(LocalGrid::new());
    let broker = Arc::new(Broker::new(grid, config));
    let server = Arc::new(StompServer::new(broker).await?);

    let run_server = Arc::clone(&server);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_server.run().await {
            error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.shutdown();
        }
        _ = server_handle => {
            info!("Server task completed");
        }
    }

    info!("GridMQ shut down successfully");
    Ok(())
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("Invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
