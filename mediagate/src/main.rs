mod bootstrap;
mod nginx;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use mediagate_core::{logging, Config};

#[derive(Parser)]
#[command(name = "mediagate", about = "Library enrichment and orchestration gateway")]
struct Cli {
    /// Configuration file (defaults to config/mediagate.*)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Render the nginx front-end config from live settings and exit.
    GenerateNginxConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    if let Some(Command::GenerateNginxConfig) = cli.command {
        print!("{}", nginx::render(&config)?);
        return Ok(());
    }

    config.validate()?;

    // Hold the guard so buffered log entries flush on shutdown.
    let _log_guard = logging::init_logging(&config.logging)?;
    info!("MediaGate starting...");

    let pool = bootstrap::init_database(&config).await?;
    info!("database ready");

    let listen = format!("{}:{}", config.server.host, config.server.http_port);
    let runtime = bootstrap::build_runtime(config, pool).await?;
    info!("services initialized");

    // Management API + webhook take precedence; everything else falls
    // through to the reverse proxy.
    let app = mediagate_api::router(runtime.state.clone())
        .merge(runtime.proxy.clone().router())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(address = %listen, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
