//! live-relay server binary
//!
//! Run with: live-relay --config relay.toml [--listen 0.0.0.0:8083]
//!
//! Feed a stream with ffmpeg:
//!   ffmpeg -re -i rtsp://camera/stream -c copy -f flv "tcp://0.0.0.0:9000?listen"
//! and register it as `url = "tcp://127.0.0.1:9000"`.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use live_relay::settings::LoggingSettings;
use live_relay::{RelayServer, Settings};

#[derive(Parser, Debug)]
#[command(name = "live-relay")]
#[command(about = "Relay live media to browsers over WebRTC and MSE", long_about = None)]
struct Args {
    /// Configuration file (toml, json, yaml)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.listen`
    #[arg(long, env = "RELAY_LISTEN")]
    listen: Option<String>,
}

fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.format == "json" {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(fmt::layer().compact().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> live_relay::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }
    init_logging(&settings.logging);

    let server = RelayServer::new(settings.server_config()?);
    for (id, stream) in &settings.streams {
        server.add_stream(id, stream.clone()).await;
    }

    tracing::info!(
        streams = settings.streams.len(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting live-relay"
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
}
